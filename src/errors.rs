//! Error types.
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Misconfigured multiplexer: {0}")]
    Misconfigured(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid message type: {0}")]
    InvalidMessageType(String),
    #[error("Key fields not found, not sending {0}")]
    KeyDerivation(String),
    #[error("Duplicate key '{0}' detected.")]
    DuplicateCorrelationKey(String),
    #[error("Multiplexer {0} is not connected.")]
    NotConnected(String),
    #[error("No usable member available in pool {0}.")]
    NoUsableMember(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Tokio error: {0}")]
    Tokio(#[from] tokio::task::JoinError),
}
