use std::io;
use std::path::PathBuf;

use citrine_binary::BinaryError;
use thiserror::Error;

/// Errors that can occur while setting up or running a transfer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// An I/O error on a socket or the file being transferred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An error during wire serialization or deserialization.
    #[error("wire format error: {0}")]
    Binary(#[from] BinaryError),

    /// The receiver endpoint could not be resolved to an address.
    #[error("cannot resolve receiver address: {0}")]
    Resolve(String),

    /// The requested path exists but is not a regular file.
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    /// The file name cannot be carried in the transfer header.
    #[error("invalid file name: {0}")]
    InvalidFileName(PathBuf),

    /// The peer violated the transfer protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The transfer machinery was shut down while an operation was pending.
    #[error("transfer channel closed")]
    Closed,
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
