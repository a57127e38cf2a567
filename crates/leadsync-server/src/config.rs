use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// HTTP listener settings (the `[server]` table of the service config).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// When set, every non-health request must carry
    /// `Authorization: Bearer <api_token>`.
    pub api_token: Option<String>,
    /// Upper bound for `GET /v1/leads?limit=`.
    pub max_list_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8787)),
            api_token: None,
            max_list_limit: 1000,
        }
    }
}
