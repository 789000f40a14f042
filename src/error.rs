use std::time::Duration;
use thiserror::Error;

pub use crate::host::CommandError;

/// Connection phase that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Handshake,
    Auth,
    Request,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TimeoutPhase::Connect => "connect",
            TimeoutPhase::Handshake => "handshake",
            TimeoutPhase::Auth => "authentication",
            TimeoutPhase::Request => "request",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Timed out during {phase} after {after:?}")]
    Timeout { phase: TimeoutPhase, after: Duration },

    #[error("TrueNAS API error: {0}")]
    TrueNasApi(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    pub fn connection(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        DiscoveryError::Connection {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
