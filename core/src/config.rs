//! User configuration loaded from `~/.retcon/config.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::error::RetconErr;
use crate::models::TITLE_MAX_CHARS;

/// Environment variable holding the Gemini API key.
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Overrides the `~/.retcon` directory, mostly for tests.
pub const RETCON_HOME_ENV_VAR: &str = "RETCON_HOME";

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Chat model name, e.g. "gemini-2.5-flash"
    #[serde(default = "default_model")]
    pub model: String,

    /// API endpoint (for custom/proxy endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Sent with every request; empty disables it.
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_endpoint: None,
            system_instruction: default_system_instruction(),
            title_max_chars: default_title_max_chars(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_system_instruction() -> String {
    "You are a helpful, concise assistant. Use Google Search when a question depends on current information, and cite your sources.".to_string()
}

const fn default_title_max_chars() -> usize {
    TITLE_MAX_CHARS
}

/// On-disk encoding of the conversation store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Zstd-compressed MessagePack behind a small binary header
    #[default]
    Compact,
    /// Pretty-printed JSON
    Json,
}

impl StorageFormat {
    pub const fn default_file_name(self) -> &'static str {
        match self {
            Self::Compact => "conversations.rtcn",
            Self::Json => "conversations.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Store file; defaults to a file under the retcon home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub format: StorageFormat,

    /// Zstd level used by the compact format (1-22)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: StorageFormat::default(),
            compression_level: default_compression_level(),
        }
    }
}

const fn default_compression_level() -> i32 {
    3
}

impl Config {
    /// Load `path`, or the default config file when `path` is `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => retcon_home()?.join(CONFIG_FILE_NAME),
        };
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&raw)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RetconErr::Config("model must not be empty".to_string()));
        }
        if self.title_max_chars == 0 {
            return Err(RetconErr::Config(
                "title_max_chars must be at least 1".to_string(),
            ));
        }
        if !(1..=22).contains(&self.storage.compression_level) {
            return Err(RetconErr::Config(format!(
                "compression_level {} is outside 1..=22",
                self.storage.compression_level
            )));
        }
        Ok(())
    }

    /// Resolved store file location.
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(retcon_home()?.join(self.storage.format.default_file_name())),
        }
    }
}

/// `$RETCON_HOME`, or `~/.retcon`.
pub fn retcon_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(RETCON_HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".retcon"))
        .ok_or_else(|| RetconErr::Config("could not determine home directory".to_string()))
}

/// Pick the explicit key if given, else the environment variable.
pub fn resolve_api_key(explicit: Option<String>) -> Result<String> {
    explicit
        .or_else(|| std::env::var(API_KEY_ENV_VAR).ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            RetconErr::Config(format!(
                "no API key: pass --api-key or set {API_KEY_ENV_VAR}"
            ))
        })
}
