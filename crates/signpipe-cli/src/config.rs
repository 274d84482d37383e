//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use signpipe_core::{DEFAULT_QUEUE_CAPACITY, DigestSigner, PipelineConfig, default_max_in_flight};

/// Global configuration for signpipe
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSection,
    pub signer: SignerSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Capacity of each inter-stage queue
    pub queue_capacity: usize,
    /// Items processed at once per hashing stage
    pub max_in_flight: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Simulated latency of the default signer's hash functions
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SignerSection {
    pub fast_delay_ms: u64,
    pub slow_delay_ms: u64,
}

impl Default for SignerSection {
    fn default() -> Self {
        Self {
            fast_delay_ms: 0,
            slow_delay_ms: 10,
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./signpipe.toml (current directory)
    /// 2. ~/.config/signpipe/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("signpipe.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "signpipe") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.pipeline.queue_capacity,
            max_in_flight: self.pipeline.max_in_flight,
        }
    }

    pub fn signer(&self) -> DigestSigner {
        DigestSigner::new(
            Duration::from_millis(self.signer.fast_delay_ms),
            Duration::from_millis(self.signer.slow_delay_ms),
        )
    }
}
