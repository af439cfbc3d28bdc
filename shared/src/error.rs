//! Error types for pasteport.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout")]
    Timeout,

    #[error("Fallback error: {0}")]
    Fallback(String),

    #[error("Access denied by agent")]
    Denied,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame of {0} bytes exceeds the maximum message size")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),
}

impl Error {
    /// True for failures that end the connection rather than a single call.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed | Error::Protocol(_) | Error::FrameTooLarge(_) | Error::Io(_)
        )
    }
}
