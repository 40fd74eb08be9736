use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{WhisperError, WhisperResult};
use crate::limits::Limits;

/// Where an identity lives when nothing else says otherwise.
pub const DEFAULT_IDENTITY_FILE: &str = "~/.config/whisper/identity";

/// Top-level configuration (loaded from whisper.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub keys: KeysConfig,
    pub output: OutputConfig,
    pub limits: Limits,
    pub log: LogConfig,
}

impl WhisperConfig {
    pub fn load(path: &Path) -> WhisperResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| WhisperError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn to_toml(&self) -> WhisperResult<String> {
        toml::to_string_pretty(self).map_err(|e| WhisperError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// File holding the base64url private key (default: ~/.config/whisper/identity)
    pub identity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where `encode` writes archives and `decode` materializes them
    pub directory: PathBuf,
    /// Archive names are `<prefix>-YYYYMMDD-HHMMSS.bin`
    pub file_prefix: String,
}

impl OutputConfig {
    /// Archive file name for a message created at `at`.
    pub fn archive_name_at(&self, at: DateTime<Utc>) -> String {
        format!("{}-{}.bin", self.file_prefix, at.format("%Y%m%d-%H%M%S"))
    }

    pub fn archive_name(&self) -> String {
        self.archive_name_at(Utc::now())
    }

    pub fn archive_path(&self) -> PathBuf {
        expand_tilde(&self.directory).join(self.archive_name())
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            file_prefix: "Whisper".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
