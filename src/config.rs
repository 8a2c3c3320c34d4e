//! Board configuration
//!
//! Selects the TV timing standard and the chip-to-CPU clock ratio. The
//! configuration is plain data and can be loaded from or saved to TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse board configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize board configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid CPU clock divider: {0} (must be at least 1)")]
    InvalidDivider(u32),
}

/// TV timing standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TvMode {
    #[default]
    Ntsc,
    Pal,
    Secam,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Timing standard the chip generates frames for
    #[serde(default)]
    pub tv_mode: TvMode,

    /// Chip clocks per CPU clock
    #[serde(default = "default_cpu_divider")]
    pub cpu_divider: u32,
}

fn default_cpu_divider() -> u32 {
    3
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            tv_mode: TvMode::default(),
            cpu_divider: default_cpu_divider(),
        }
    }
}

impl BoardConfig {
    pub fn new(tv_mode: TvMode) -> Self {
        Self {
            tv_mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_divider == 0 {
            return Err(ConfigError::InvalidDivider(self.cpu_divider));
        }
        Ok(())
    }

    /// Parse and validate a configuration from a TOML document
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: BoardConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        log::info!(
            "Loaded board configuration from {}: {:?}, divider {}",
            path.display(),
            config.tv_mode,
            config.cpu_divider
        );
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        log::info!("Saved board configuration to: {}", path.display());
        Ok(())
    }
}
