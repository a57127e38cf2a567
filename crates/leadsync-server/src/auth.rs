use async_trait::async_trait;
use axum::http::{header, HeaderMap};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".into(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Anonymous,
}

impl Credentials {
    /// Read credentials from an `Authorization` header, if any.
    pub fn from_headers(headers: &HeaderMap) -> ServerResult<Self> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(Self::Anonymous);
        };
        let value = value
            .to_str()
            .map_err(|_| ServerError::AuthFailed("authorization header is not ASCII".into()))?;
        match value.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Ok(Self::Bearer(token.trim().to_string())),
            _ => Err(ServerError::AuthFailed(
                "expected `Authorization: Bearer <token>`".into(),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Publish events on behalf of a source, named as it appears in the
    /// request path (it may not be a configured source).
    Ingest { source: String },
    ReadLeads,
    ReadDeadLetters,
    ReadStats,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest { source } => write!(f, "ingest:{source}"),
            Self::ReadLeads => f.write_str("read:leads"),
            Self::ReadDeadLetters => f.write_str("read:dead-letters"),
            Self::ReadStats => f.write_str("read:stats"),
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity>;
    async fn authorize(&self, identity: &Identity, action: &Action) -> ServerResult<bool>;
}

/// Accepts everyone, with or without a token.
pub struct AllowAllAuth;

#[async_trait]
impl AuthProvider for AllowAllAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity> {
        match credentials {
            Credentials::Bearer(token) => Ok(Identity::user(format!(
                "bearer:{}",
                token.chars().take(8).collect::<String>()
            ))),
            Credentials::Anonymous => Ok(Identity::anonymous()),
        }
    }

    async fn authorize(&self, _identity: &Identity, _action: &Action) -> ServerResult<bool> {
        Ok(true)
    }
}

/// A single shared API token grants every action.
pub struct StaticTokenAuth {
    token: String,
}

impl StaticTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity> {
        match credentials {
            Credentials::Bearer(token) if constant_time_eq(token.as_bytes(), self.token.as_bytes()) => {
                Ok(Identity::user("api-token"))
            }
            Credentials::Bearer(_) => Ok(Identity::anonymous()),
            Credentials::Anonymous => Err(ServerError::AuthFailed("missing bearer token".into())),
        }
    }

    async fn authorize(&self, identity: &Identity, _action: &Action) -> ServerResult<bool> {
        Ok(identity.name == "api-token")
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(v) = auth {
            h.insert(header::AUTHORIZATION, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn credentials_from_headers() {
        assert_eq!(
            Credentials::from_headers(&headers(None)).unwrap(),
            Credentials::Anonymous
        );
        assert_eq!(
            Credentials::from_headers(&headers(Some("Bearer abc"))).unwrap(),
            Credentials::Bearer("abc".into())
        );
        assert!(Credentials::from_headers(&headers(Some("Basic abc"))).is_err());
        assert!(Credentials::from_headers(&headers(Some("Bearer  "))).is_err());
    }

    #[test]
    fn action_display() {
        let source = "sourceA".to_string();
        assert_eq!(Action::Ingest { source }.to_string(), "ingest:sourceA");
        assert_eq!(Action::ReadDeadLetters.to_string(), "read:dead-letters");
    }

    #[tokio::test]
    async fn allow_all_auth() {
        let auth = AllowAllAuth;
        let id = auth.authenticate(&Credentials::Anonymous).await.unwrap();
        assert_eq!(id, Identity::anonymous());
        assert!(auth.authorize(&id, &Action::ReadStats).await.unwrap());

        let id = auth
            .authenticate(&Credentials::Bearer("mytoken123".into()))
            .await
            .unwrap();
        assert_eq!(id.name, "bearer:mytoken1");
    }

    #[tokio::test]
    async fn static_token_auth() {
        let auth = StaticTokenAuth::new("s3cret");

        assert!(matches!(
            auth.authenticate(&Credentials::Anonymous).await,
            Err(ServerError::AuthFailed(_))
        ));

        let good = auth
            .authenticate(&Credentials::Bearer("s3cret".into()))
            .await
            .unwrap();
        assert!(auth.authorize(&good, &Action::ReadLeads).await.unwrap());

        let bad = auth
            .authenticate(&Credentials::Bearer("guess".into()))
            .await
            .unwrap();
        assert!(!auth.authorize(&bad, &Action::ReadLeads).await.unwrap());
    }

    #[test]
    fn token_comparison() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
