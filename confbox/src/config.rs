//! Configuration for the export/import engine.
//!
//! All paths the engine touches are resolved against an explicit working
//! root injected at construction time; there is no ambient process-wide
//! state.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Working root that relative target paths resolve against, and the
    /// destination root archives are unpacked into.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Directories included in every export/import cycle.
    #[serde(default = "default_targets")]
    pub targets: Vec<PathBuf>,

    /// Capacity of the progress message queue drained by the polling
    /// observer. A full queue briefly blocks the pipeline worker.
    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_targets() -> Vec<PathBuf> {
    vec![PathBuf::from("conf"), PathBuf::from("drivers")]
}

fn default_message_capacity() -> usize {
    512
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            targets: default_targets(),
            message_capacity: default_message_capacity(),
        }
    }
}

impl Config {
    /// Load config from file path, or create default
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
        } else {
            let config = Config::default();
            // Try to save default config
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(path);
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Create the working root and every target directory that does not
    /// exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root_dir)?;
        for target in &self.targets {
            fs::create_dir_all(self.resolve(target))?;
        }
        Ok(())
    }

    /// Resolve a path against the working root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }
}
