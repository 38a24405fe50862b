//! Error taxonomy shared by the codec, transfer loops and both endpoints

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Malformed, truncated or unexpected frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Requested remote file is absent
    #[error("file does not exist on the server: {0}")]
    NotFound(String),

    /// Local filesystem or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Filename would escape the storage root
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// Failure reported by the peer that fits no other category
    #[error("server error: {0}")]
    Remote(String),
}

impl TransferError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        TransferError::Protocol(msg.into())
    }

    /// Short label used in status lines and journal entries
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Protocol(_) => "protocol",
            TransferError::NotFound(_) => "not-found",
            TransferError::Io(_) => "io",
            TransferError::InvalidName(_) => "invalid-name",
            TransferError::Remote(_) => "remote",
        }
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
