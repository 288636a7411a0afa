use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("tool server '{server}': {reason}")]
    InvalidServer { server: String, reason: String },

    #[error("duplicate tool server name: {0}")]
    DuplicateServer(String),
}
