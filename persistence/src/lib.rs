//! Conversation persistence for Retcon with Zstd compression
//!
//! This crate provides the file-backed implementation of
//! [`retcon_core::Persistence`]: the full conversation list is stored in a
//! single file, either as Zstd-compressed MessagePack behind a small binary
//! header or as pretty-printed JSON.

pub mod compression;
pub mod error;
pub mod storage;

#[cfg(test)]
mod tests;

pub use compression::CompressionLevel;
pub use compression::Compressor;
pub use error::PersistenceError;
pub use error::Result;
pub use storage::FileStore;

/// Magic bytes at the start of compact store files
pub const RTCN_MAGIC: &[u8] = b"RTCN";

/// Current store format version
pub const FORMAT_VERSION: u16 = 1;
