use thiserror::Error;

/// Errors that can occur during binary operations.
#[derive(Error, Debug)]
pub enum BinaryError {
    /// Not enough bytes remaining in the buffer for the requested operation.
    #[error("not enough bytes in buffer: needed {needed}, remaining {remaining}")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// An invalid value was encountered while decoding.
    #[error("invalid data encountered: {0}")]
    InvalidData(String),
}

/// Result type alias for binary operations.
pub type Result<T> = std::result::Result<T, BinaryError>;
