// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host settings.
//!
//! Stored as RON in `stagewire.ron`. Every field has a default so a partial
//! file (or no file at all) still yields a usable configuration.

use serde::{Deserialize, Serialize};
use stagewire_graph::UidMode;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Default settings file name
pub const SETTINGS_FILE_NAME: &str = "stagewire.ron";

/// Settings failures
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading or writing the file failed
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid RON for [`Settings`]
    #[error("invalid settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Serializing the settings failed
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] ron::Error),
    /// The file was written by a newer build
    #[error("settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Highest version this build reads
        supported: u32,
    },
}

/// Host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Settings format version
    pub version: u32,
    /// Name reported by `app/request`
    pub name: String,
    /// Address reported to clients as the host address
    pub host_address: String,
    /// Graph document loaded at startup and written on autosave
    pub graph_file: PathBuf,
    /// Save the graph back to `graph_file` on shutdown
    pub autosave: bool,
    /// Directory that receives `uploads/`
    pub base_dir: PathBuf,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_filter: String,
    /// How fresh node UIDs are generated
    pub uid_mode: UidMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            name: "stagewire".to_string(),
            host_address: "stdio".to_string(),
            graph_file: PathBuf::from("graph.json"),
            autosave: false,
            base_dir: PathBuf::from("."),
            log_filter: "info".to_string(),
            uid_mode: UidMode::Random,
        }
    }
}

impl Settings {
    /// Load settings from a RON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = ron::from_str(&content)?;

        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }

        Ok(settings)
    }

    /// Load settings if the file exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to a RON file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        let content = ron::ser::to_string_pretty(self, config)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Graph file resolved against the settings file's directory
    pub fn graph_path(&self, settings_dir: &Path) -> PathBuf {
        resolve(settings_dir, &self.graph_file)
    }

    /// Upload base directory resolved against the settings file's directory
    pub fn base_path(&self, settings_dir: &Path) -> PathBuf {
        resolve(settings_dir, &self.base_dir)
    }
}

fn resolve(settings_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        settings_dir.join(path)
    }
}
