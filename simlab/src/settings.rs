//! Layered configuration: embedded defaults, an optional local file, and
//! `SIMLAB__*` environment variables.

use anyhow::{anyhow, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Simulation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Rounds over the information-need batch per pair.
    pub repetitions: u32,
    /// Skip pairs whose transcript file already exists.
    pub resume: bool,
    /// Abort the run on the first failing pair.
    pub fail_fast: bool,
    /// Root of `dialogue_export_{task}/{batch_id}` directories.
    pub output_root: PathBuf,
    pub readiness_retries: u32,
    pub readiness_delay_ms: u64,
    /// Hard cap on utterances per dialogue; unlimited when absent.
    pub max_utterances: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            repetitions: 3,
            resume: false,
            fail_fast: false,
            output_root: PathBuf::from("data"),
            readiness_retries: 30,
            readiness_delay_ms: 1_000,
            max_utterances: Some(100),
        }
    }
}

impl SimulationConfig {
    pub fn readiness_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/simlab.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    pub binary: String,
    pub command_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            enable_target: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("simlab").required(false))
            .add_source(
                Environment::with_prefix("SIMLAB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.simulation.repetitions == 0 {
            return Err(anyhow!("simulation.repetitions must be at least 1"));
        }
        if self.simulation.readiness_retries == 0 {
            return Err(anyhow!("simulation.readiness_retries must be at least 1"));
        }
        if self.simulation.max_utterances == Some(0) {
            return Err(anyhow!("simulation.max_utterances must be at least 1"));
        }
        if self.simulation.output_root.as_os_str().is_empty() {
            return Err(anyhow!("simulation.output_root cannot be empty"));
        }
        if self.storage.db_path.as_os_str().is_empty() {
            return Err(anyhow!("storage.db_path cannot be empty"));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(anyhow!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_are_valid() {
        let config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();

        settings.validate().unwrap();
        assert_eq!(settings.simulation.repetitions, 3);
        assert!(!settings.simulation.resume);
        assert_eq!(settings.simulation.max_utterances, Some(100));
        assert_eq!(settings.simulation.max_utterances, SimulationConfig::default().max_utterances);
        assert_eq!(settings.docker.binary, "docker");
    }

    #[test]
    fn test_validation_rejects_zero_repetitions() {
        let mut settings = Settings::default();
        settings.simulation.repetitions = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.logging.format = "xml".to_string();
        assert!(settings.validate().is_err());
    }
}
