//! Common error type for TubeMirror services

/// Errors produced by the shared core plumbing
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a configuration error tied to a specific environment variable
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}
