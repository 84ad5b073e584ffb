//! Error types for persistence operations

use std::io;

use retcon_core::RetconErr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// MessagePack serialization errors
    #[error("MessagePack serialization error: {0}")]
    MessagePack(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization errors
    #[error("MessagePack deserialization error: {0}")]
    MessagePackDecode(#[from] rmp_serde::decode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid magic bytes in file header
    #[error("Invalid file format: expected RTCN magic bytes")]
    InvalidMagic,

    /// Unsupported format version
    #[error("Unsupported format version: {0} (expected {1})")]
    UnsupportedVersion(u16, u16),

    /// Truncated or otherwise inconsistent store data
    #[error("Corrupt store data: {0}")]
    CorruptData(String),
}

impl From<PersistenceError> for RetconErr {
    fn from(err: PersistenceError) -> Self {
        Self::Persistence(err.to_string())
    }
}
