//! TOML configuration file for run defaults.
//!
//! Every key is optional. Command-line flags override the file, the file
//! overrides built-in defaults. Values are checked against the same ranges
//! the command line enforces.
//!
//! ```toml
//! output_dir = "/srv/downloads"
//! concurrency = 8
//! retry_delay_secs = 30
//! max_attempts = 0
//! trust_existing_files = false
//! verbosity = "verbose"
//! ```

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        expected: &'static str,
    },
}

/// Verbosity labels accepted in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

/// TOML-backed file configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Directory receiving downloads.
    pub output_dir: Option<PathBuf>,
    /// Admission ceiling (1..=100).
    pub concurrency: Option<u8>,
    /// Fixed retry delay in seconds (0..=3600).
    pub retry_delay_secs: Option<u64>,
    /// Attempts per phase before deferring; 0 means unlimited.
    pub max_attempts: Option<u32>,
    /// Accept an existing target file without verifying it.
    pub trust_existing_files: Option<bool>,
    /// Provider API base URL.
    pub api_base: Option<String>,
    /// Link host served by the API strategy.
    pub api_host: Option<String>,
    /// Content-type substring marking a payload response.
    pub download_marker: Option<String>,
    pub verbosity: Option<VerbositySetting>,
    /// HTTP connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// Idle time allowed between HTTP body reads, in seconds (1..=3600).
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::OutOfRange`] for values outside their range.
    pub fn from_toml(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates config values against the command-line ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::OutOfRange`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("concurrency", self.concurrency.map(u64::from), 1, 100, "1..=100")?;
        check_range("retry_delay_secs", self.retry_delay_secs, 0, 3600, "0..=3600")?;
        check_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600, "1..=3600")?;
        check_range("read_timeout_secs", self.read_timeout_secs, 1, 3600, "1..=3600")?;
        Ok(())
    }
}

fn check_range(
    field: &'static str,
    value: Option<u64>,
    min: u64,
    max: u64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    match value {
        Some(value) if !(min..=max).contains(&value) => Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        }),
        _ => Ok(()),
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/linkfetch/config.toml`
/// 2. `$HOME/.config/linkfetch/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("linkfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("linkfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads a config file.
///
/// With an explicit path the file must exist. Without one, the default
/// location is used when present and `Ok(None)` is returned otherwise.
///
/// # Errors
///
/// [`ConfigError`] when a file that should be read cannot be read, parsed or validated.
pub fn load_config_file(explicit: Option<&Path>) -> Result<Option<FileConfig>, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(None),
        },
    };

    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    FileConfig::from_toml(&raw, &path).map(Some)
}
