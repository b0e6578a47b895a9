//! Run configuration.
//!
//! [`RunConfig`] is the immutable input of a download run. [`ConfigFile`]
//! holds the optional user settings read from
//! `<config_dir>/manifestdown/config.ini`:
//!
//! ```ini
//! [download]
//! concurrency = 8
//! cache = true
//! cache_dir = /var/cache/manifestdown
//! chunk_base_url = https://cdn.example.com/CloudDir/
//! output_dir = /games/build
//! length_policy = strict
//! verify_checksums = true
//!
//! [logging]
//! level = debug
//! file = /tmp/manifestdown.log
//! ```
//!
//! Front ends apply command line flags over the file, and the file over the
//! defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

use crate::provider::ManifestOptions;

/// Copy buffer size per file.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

const CDN_BUILDS_URL: &str = "https://epicgames-download1.akamaized.net/Builds";

/// Chunk base address for game builds or content builds.
pub fn chunk_base_url(content_build: bool) -> String {
    if content_build {
        format!("{}/Fortnite/Content/CloudDir/", CDN_BUILDS_URL)
    } else {
        format!("{}/Fortnite/CloudDir/", CDN_BUILDS_URL)
    }
}

/// Number of concurrent units when none is configured.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default on-disk chunk cache directory.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("ManifestDownloader").join("cache").join("chunks"))
}

/// What to do when a stream's length differs from its declared length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LengthPolicy {
    /// Fail the file.
    #[default]
    Strict,
    /// Keep the file and attach a warning.
    Warn,
}

impl FromStr for LengthPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(LengthPolicy::Strict),
            "warn" => Ok(LengthPolicy::Warn),
            other => Err(ConfigError::InvalidValue {
                key: "length_policy".to_string(),
                value: other.to_string(),
                reason: "expected 'strict' or 'warn'".to_string(),
            }),
        }
    }
}

impl fmt::Display for LengthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthPolicy::Strict => write!(f, "strict"),
            LengthPolicy::Warn => write!(f, "warn"),
        }
    }
}

/// Configuration of one download run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Directory files are written under.
    pub output_root: PathBuf,

    /// Maximum number of files materialized at once. Never below 1.
    pub concurrency: usize,

    /// Base address chunks are fetched from.
    pub chunk_base_url: String,

    /// Chunk cache directory. `None` disables caching.
    pub cache_dir: Option<PathBuf>,

    pub length_policy: LengthPolicy,

    /// Whether declared SHA-256 digests are checked.
    pub verify_checksums: bool,

    /// Copy buffer size per file.
    pub buffer_size: usize,
}

impl RunConfig {
    /// Create a configuration writing under `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            concurrency: default_concurrency(),
            chunk_base_url: chunk_base_url(false),
            cache_dir: None,
            length_policy: LengthPolicy::Strict,
            verify_checksums: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the concurrency bound. Values below 1 become 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the chunk base address.
    pub fn with_chunk_base_url(mut self, url: impl Into<String>) -> Self {
        self.chunk_base_url = url.into();
        self
    }

    /// Enable the chunk cache in `dir`, or disable it with `None`.
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    /// Set the length mismatch policy.
    pub fn with_length_policy(mut self, policy: LengthPolicy) -> Self {
        self.length_policy = policy;
        self
    }

    /// Enable or disable checksum verification.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Set the copy buffer size. Values below 1 become 1.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Options for decoding a manifest under this configuration.
    pub fn manifest_options(&self) -> ManifestOptions {
        let options = ManifestOptions::new(self.chunk_base_url.clone());
        match &self.cache_dir {
            Some(dir) => options.with_cache_dir(dir.clone()),
            None => options,
        }
    }
}

/// Errors reading the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Settings from `config.ini`. Unset keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub concurrency: Option<usize>,
    pub cache: Option<bool>,
    pub cache_dir: Option<PathBuf>,
    pub chunk_base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub length_policy: Option<LengthPolicy>,
    pub verify_checksums: Option<bool>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl ConfigFile {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("manifestdown").join("config.ini"))
    }

    /// Load the file at the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load the file at `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse settings from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("download")) {
            config.concurrency = section
                .get("concurrency")
                .map(|v| parse_value("concurrency", v))
                .transpose()?;
            config.cache = section.get("cache").map(|v| parse_bool("cache", v)).transpose()?;
            config.cache_dir = non_empty(section.get("cache_dir")).map(PathBuf::from);
            config.chunk_base_url = non_empty(section.get("chunk_base_url")).map(str::to_string);
            config.output_dir = non_empty(section.get("output_dir")).map(PathBuf::from);
            config.length_policy = section
                .get("length_policy")
                .map(LengthPolicy::from_str)
                .transpose()?;
            config.verify_checksums = section
                .get("verify_checksums")
                .map(|v| parse_bool("verify_checksums", v))
                .transpose()?;
        }

        if let Some(section) = ini.section(Some("logging")) {
            config.log_level = non_empty(section.get("level")).map(str::to_string);
            config.log_file = non_empty(section.get("file")).map(PathBuf::from);
        }

        Ok(config)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
