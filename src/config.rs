//! Configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by a `config.toml` in the data directory:
//!
//! ```text
//! data/
//! ├── config.toml              # Optional, overrides stock defaults
//! ├── uploads/                 # Local storage root
//! │   ├── .metadata.json
//! │   └── benchy.gcode
//! └── thumbnails/              # Thumbnail cache
//!     └── benchy.png
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! uploads = "uploads"          # Local storage root
//! cache_dir = "thumbnails"     # Thumbnail cache root
//! route_prefix = "plugin/prusaslicerthumbnails/thumbnail/"
//! identifier = "prusaslicerthumbnails"
//! machine_code_extensions = ["gcode", "gco", "g"]
//! ```
//!
//! Relative directories resolve against the data directory. Unknown keys are
//! rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Local storage root.
    pub uploads: String,
    /// Thumbnail cache root.
    pub cache_dir: String,
    /// URL prefix written into the `thumbnail` metadata value.
    pub route_prefix: String,
    /// Written into `thumbnail_src`; recognizes URLs this tool produced.
    pub identifier: String,
    /// Extensions classified as machine code, without the dot.
    pub machine_code_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uploads: "uploads".to_string(),
            cache_dir: "thumbnails".to_string(),
            route_prefix: "plugin/prusaslicerthumbnails/thumbnail/".to_string(),
            identifier: "prusaslicerthumbnails".to_string(),
            machine_code_extensions: vec!["gcode".into(), "gco".into(), "g".into()],
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identifier.is_empty() {
            return Err(ConfigError::Validation(
                "identifier must not be empty".into(),
            ));
        }
        if self.route_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "route_prefix must not be empty".into(),
            ));
        }
        if !self.route_prefix.ends_with('/') {
            return Err(ConfigError::Validation(
                "route_prefix must end with '/'".into(),
            ));
        }
        if self.machine_code_extensions.is_empty() {
            return Err(ConfigError::Validation(
                "machine_code_extensions must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Storage root, resolved against `data_dir`.
    pub fn uploads_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.uploads)
    }

    /// Cache root, resolved against `data_dir`.
    pub fn cache_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.cache_dir)
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Config::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no `config.toml`.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the data directory.
pub fn load_config(data_dir: &Path) -> Result<Config, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(data_dir)?)
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# slicer-thumbs configuration
# ===========================
# All settings are optional. Values shown below are the defaults.
# Place this file at <data-dir>/config.toml. Unknown keys cause an error.

# Local storage root holding the uploaded gcode files.
# Relative paths resolve against the data directory.
uploads = "uploads"

# Thumbnail cache root. Mirrors the storage tree, one .png per gcode file.
# Relative paths resolve against the data directory.
cache_dir = "thumbnails"

# URL prefix written into each file's "thumbnail" metadata value.
# Must end with "/".
route_prefix = "plugin/prusaslicerthumbnails/thumbnail/"

# Written into "thumbnail_src". A "thumbnail" URL containing this string
# counts as produced by this tool during crawls.
identifier = "prusaslicerthumbnails"

# File extensions (without the dot) treated as machine code.
machine_code_extensions = ["gcode", "gco", "g"]
"##
}
