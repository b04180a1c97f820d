// src/config.rs

//! Dashboard configuration.
//! Loaded once from a TOML file at startup and passed by reference into the
//! ranking components; nothing in the core reads ambient global state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use tracing::instrument;

// --- Constants for Validation ---
pub const MAX_PAGE_SIZE_LIMIT: usize = 10_000;
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_MAX_PAGE_SIZE: usize = 1000;
const DEFAULT_VIOLATION_COLOR: &str = "#D22B2B";
const DEFAULT_VIOLATION_SEVERITY: i64 = 1;
const DEFAULT_UNKNOWN_MINER_NAME: &str = "UNKNOWN";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    Load {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to save configuration to '{path}': {source}")]
    Save {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Validation failed: {0}")]
    Validation(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Bind address handed to the HTTP collaborator.
    pub api_address: String,
    pub logging: LoggingConfig,
    pub ranking: RankingConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Display color attached to every surfaced violation.
    pub violation_color: String,
    pub violation_severity: i64,
    /// Shown in the `name` column until miner names are resolvable.
    pub unknown_miner_name: String,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            violation_color: DEFAULT_VIOLATION_COLOR.to_string(),
            violation_severity: DEFAULT_VIOLATION_SEVERITY,
            unknown_miner_name: DEFAULT_UNKNOWN_MINER_NAME.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_address: "127.0.0.1:5050".to_string(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            ranking: RankingConfig::default(),
        }
    }
}

impl Config {
    /// Loads the file at `path`, writing and returning defaults if it does
    /// not exist yet.
    #[instrument]
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            let default_config = Config::default();
            default_config
                .save(path)
                .context("Failed to create a default configuration file.")
                .map_err(|source| ConfigError::Save {
                    path: path.to_string(),
                    source,
                })?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)
            .context("Failed to read configuration file.")
            .map_err(|source| ConfigError::Load {
                path: path.to_string(),
                source,
            })?;
        let config: Config = toml::from_str(&content)
            .context("Failed to parse TOML from configuration file.")
            .map_err(|source| ConfigError::Load {
                path: path.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    #[instrument(skip(self))]
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)
            .context("Failed to serialize configuration to TOML.")
            .map_err(|source| ConfigError::Save {
                path: path.to_string(),
                source,
            })?;
        fs::write(path, toml_string)
            .context("Failed to write configuration to file.")
            .map_err(|source| ConfigError::Save {
                path: path.to_string(),
                source,
            })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_address.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "Invalid API address format: '{}'",
                self.api_address
            ))
        })?;

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown log level '{}', expected one of {LOG_LEVELS:?}",
                self.logging.level
            )));
        }

        let ranking = &self.ranking;
        if !(1..=MAX_PAGE_SIZE_LIMIT).contains(&ranking.max_page_size) {
            return Err(ConfigError::Validation(format!(
                "max_page_size must be between 1 and {MAX_PAGE_SIZE_LIMIT}"
            )));
        }
        if !(1..=ranking.max_page_size).contains(&ranking.default_page_size) {
            return Err(ConfigError::Validation(format!(
                "default_page_size must be between 1 and max_page_size ({})",
                ranking.max_page_size
            )));
        }
        if !is_hex_color(&ranking.violation_color) {
            return Err(ConfigError::Validation(format!(
                "violation_color must look like #RRGGBB, got '{}'",
                ranking.violation_color
            )));
        }

        Ok(())
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}
