//! Access tokens for member-scoped resources.

use async_trait::async_trait;

use super::FetchError;

/// Environment variable read by [`StaticTokenSource::from_env`].
pub const ACCESS_TOKEN_ENV: &str = "INGESTOR_ACCESS_TOKEN";

/// Supplies bearer tokens for authenticated requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a bearer token valid for `member_id`.
    async fn access_token(&self, member_id: i64) -> Result<String, FetchError>;
}

/// A single fixed token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenSource {
    token: Option<String>,
}

impl StaticTokenSource {
    /// Wraps a fixed token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A source that has no token; authenticated requests fail with [`FetchError::Token`].
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Reads the token from `INGESTOR_ACCESS_TOKEN`; blank values count as absent.
    #[must_use]
    pub fn from_env() -> Self {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self { token }
    }

    /// True when a token is configured.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self, member_id: i64) -> Result<String, FetchError> {
        self.token
            .clone()
            .ok_or_else(|| FetchError::token(member_id, format!("{ACCESS_TOKEN_ENV} is not set")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_source_returns_token() {
        let source = StaticTokenSource::new("secret");
        assert!(source.has_token());
        assert_eq!(source.access_token(1).await.unwrap(), "secret");
    }

    #[tokio::test]
    async fn test_static_token_source_none_is_token_error() {
        let err = StaticTokenSource::none().access_token(7).await.unwrap_err();
        assert!(matches!(err, FetchError::Token { member_id: 7, .. }));
    }
}
