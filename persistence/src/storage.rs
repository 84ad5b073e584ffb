//! File-backed conversation store
//!
//! The whole conversation list lives in one file that is rewritten on every
//! save. Writes go to a temporary sibling first and are renamed into place,
//! so a crash mid-write leaves the previous file intact.

use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

use retcon_core::Conversation;
use retcon_core::Persistence;
use retcon_core::StorageConfig;
use retcon_core::StorageFormat;
use serde::Deserialize;
use serde::Serialize;
use tokio::fs as async_fs;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::FORMAT_VERSION;
use crate::RTCN_MAGIC;
use crate::compression::CompressionLevel;
use crate::compression::Compressor;
use crate::error::PersistenceError;
use crate::error::Result;

/// Magic (4) + format version (2) + payload length (8)
const HEADER_LEN: usize = 4 + 2 + 8;

/// JSON document layout.
#[derive(Debug, Serialize, Deserialize)]
struct JsonDocument {
    format_version: u16,
    conversations: Vec<Conversation>,
}

pub struct FileStore {
    path: PathBuf,
    format: StorageFormat,
    compressor: Compressor,
}

impl FileStore {
    pub fn new(path: PathBuf, format: StorageFormat, compression_level: CompressionLevel) -> Self {
        Self {
            path,
            format,
            compressor: Compressor::new(compression_level),
        }
    }

    /// Build a store from the `[storage]` config section at `path`.
    pub fn from_config(path: PathBuf, config: &StorageConfig) -> Self {
        Self::new(
            path,
            config.format,
            CompressionLevel::Custom(config.compression_level),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn format(&self) -> StorageFormat {
        self.format
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Where an undecodable store file is moved on load.
    pub fn corrupt_path(&self) -> PathBuf {
        self.sibling(".corrupt")
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    pub fn encode(&self, conversations: &[Conversation]) -> Result<Vec<u8>> {
        match self.format {
            StorageFormat::Compact => {
                let payload = rmp_serde::to_vec_named(conversations)?;
                let compressed = self.compressor.compress(&payload)?;
                debug!(
                    "Compressed {} bytes to {} ({:.0}% saved)",
                    payload.len(),
                    compressed.len(),
                    Compressor::compression_ratio(payload.len(), compressed.len()) * 100.0
                );

                let mut bytes = Vec::with_capacity(HEADER_LEN + compressed.len());
                bytes.extend_from_slice(RTCN_MAGIC);
                bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
                bytes.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
                bytes.extend_from_slice(&compressed);
                Ok(bytes)
            }
            StorageFormat::Json => {
                let document = JsonDocument {
                    format_version: FORMAT_VERSION,
                    conversations: conversations.to_vec(),
                };
                Ok(serde_json::to_vec_pretty(&document)?)
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<Conversation>> {
        match self.format {
            StorageFormat::Compact => {
                if bytes.len() < HEADER_LEN {
                    return Err(PersistenceError::CorruptData("File too small".to_string()));
                }
                if &bytes[0..4] != RTCN_MAGIC {
                    return Err(PersistenceError::InvalidMagic);
                }
                let version = u16::from_le_bytes([bytes[4], bytes[5]]);
                if version != FORMAT_VERSION {
                    return Err(PersistenceError::UnsupportedVersion(
                        version,
                        FORMAT_VERSION,
                    ));
                }
                let mut len_bytes = [0u8; 8];
                len_bytes.copy_from_slice(&bytes[6..HEADER_LEN]);
                let payload_len = u64::from_le_bytes(len_bytes);
                let payload = &bytes[HEADER_LEN..];
                if payload.len() as u64 != payload_len {
                    return Err(PersistenceError::CorruptData(format!(
                        "payload is {} bytes, header says {payload_len}",
                        payload.len()
                    )));
                }
                let decompressed = self.compressor.decompress(payload)?;
                Ok(rmp_serde::from_slice(&decompressed)?)
            }
            StorageFormat::Json => {
                let document: JsonDocument = serde_json::from_slice(bytes)?;
                if document.format_version != FORMAT_VERSION {
                    return Err(PersistenceError::UnsupportedVersion(
                        document.format_version,
                        FORMAT_VERSION,
                    ));
                }
                Ok(document.conversations)
            }
        }
    }

    /// Read the store. A missing file is an empty store; a file that fails to
    /// decode is moved to [`Self::corrupt_path`] and also reads as empty.
    pub async fn read(&self) -> Result<Vec<Conversation>> {
        if !self.path.exists() {
            info!("No conversation store at {:?}, starting empty", self.path);
            return Ok(Vec::new());
        }

        let bytes = async_fs::read(&self.path).await?;
        match self.decode(&bytes) {
            Ok(conversations) => {
                debug!(
                    "Loaded {} conversations from {:?}",
                    conversations.len(),
                    self.path
                );
                Ok(conversations)
            }
            Err(e) => {
                let corrupt = self.corrupt_path();
                warn!(
                    "Conversation store {:?} is unreadable ({}); moving it to {:?}",
                    self.path, e, corrupt
                );
                async_fs::rename(&self.path, &corrupt).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Replace the store contents.
    pub async fn write(&self, conversations: &[Conversation]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            async_fs::create_dir_all(parent).await?;
        }

        let bytes = self.encode(conversations)?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        async_fs::write(&temp_path, &bytes).await?;

        // Atomic rename
        async_fs::rename(&temp_path, &self.path).await?;

        debug!(
            "Saved {} conversations ({} bytes) to {:?}",
            conversations.len(),
            bytes.len(),
            self.path
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Persistence for FileStore {
    async fn load(&self) -> retcon_core::Result<Vec<Conversation>> {
        Ok(self.read().await?)
    }

    async fn save(&self, conversations: &[Conversation]) -> retcon_core::Result<()> {
        Ok(self.write(conversations).await?)
    }
}
