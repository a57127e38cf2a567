use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::auth::{AllowAllAuth, AuthProvider, StaticTokenAuth};
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::router::build_router;
use crate::state::AppState;

/// LeadSync HTTP server.
pub struct SyncServer {
    config: ServerConfig,
    state: AppState,
}

impl SyncServer {
    /// Applies the configured auth mode and list limit to `state`.
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        let auth: Arc<dyn AuthProvider> = match &config.api_token {
            Some(token) => Arc::new(StaticTokenAuth::new(token.clone())),
            None => Arc::new(AllowAllAuth),
        };
        let state = state
            .with_auth(auth)
            .with_max_list_limit(config.max_list_limit);
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    /// In-flight requests are allowed to finish.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        tracing::info!(
            addr = %listener.local_addr()?,
            token_auth = self.config.api_token.is_some(),
            "LeadSync server listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("LeadSync server stopped");
        Ok(())
    }
}
