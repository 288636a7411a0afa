//! Bearer credentials for the response engine.

use async_trait::async_trait;

use toolgate_tool_runtime::EngineError;

/// Supplies the bearer token sent with every engine request.
///
/// Called once per request, so implementations that refresh tokens can hand
/// out a fresh one each time.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, EngineError>;
}

/// A fixed token, e.g. an API key read at startup.
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn bearer_token(&self) -> Result<String, EngineError> {
        Ok(self.token.clone())
    }
}

/// Stands in when no credential is configured. Every request fails with
/// [`EngineError::Credential`] before anything is sent.
pub struct MissingCredential {
    pub hint: String,
}

#[async_trait]
impl CredentialProvider for MissingCredential {
    async fn bearer_token(&self) -> Result<String, EngineError> {
        Err(EngineError::Credential(self.hint.clone()))
    }
}

// Debug output must never show the token.
impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticCredential(****)")
    }
}
