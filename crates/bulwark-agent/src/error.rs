//! Error types for the agent

use thiserror::Error;

use bulwark_daemon::ClientError;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// The daemon could not be reached
    #[error("daemon error: {0}")]
    Client(#[from] ClientError),

    /// Transport failure talking to the management server
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The management server answered with a failure
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Config(e.to_string())
    }
}
