//! Error types for the regression harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegressError {
    /// Navigation or connection-level failure (DNS, connection refused).
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Node.js not found. Install Node and run: npx playwright install chromium")]
    BridgeNotFound,

    #[error("Playwright bridge error: {0}")]
    Bridge(String),

    #[error("Bridge protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session unavailable: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RegressError {
    /// Whether this error means the target could not be reached at all.
    pub fn is_transport(&self) -> bool {
        match self {
            RegressError::Transport(_) => true,
            RegressError::Http(e) => e.is_connect(),
            _ => false,
        }
    }
}

pub type RegressResult<T> = Result<T, RegressError>;
