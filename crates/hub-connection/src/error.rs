//! Error types for the hub client.

/// Errors produced by the hub client and by [`HubTransport`] implementations.
///
/// [`HubTransport`]: crate::transport::HubTransport
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// Shorthand for a [`HubError::Transport`] built from anything displayable.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }
}
