//! Protocol error types

use thiserror::Error;

/// Errors that can occur while reading or writing protocol frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON for the expected message shape
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame was not valid UTF-8
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Frame exceeds maximum size
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the peer sent something we could not understand, as opposed
    /// to the transport failing underneath us.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}
