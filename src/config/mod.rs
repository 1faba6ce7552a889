//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod execution;
mod server;
mod storage;

pub use execution::{ExecutionConfig, RetryConfig, RetryPolicy};
pub use server::ServerConfig;
pub use storage::{StorageConfig, STORAGE_TYPE_MEMORY, STORAGE_TYPE_SQLITE};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SAGA_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SAGA";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SAGA_LOG";

use serde::Deserialize;

use crate::model::StepDefinition;

/// Remote participant reachable over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParticipantEndpoint {
    /// Registry name referenced by step definitions.
    pub name: String,
    /// Base URL; `/execute` and `/compensate` are appended.
    pub url: String,
}

/// Named saga template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SagaDefinitionConfig {
    /// Saga type clients submit as `sagaType`.
    pub name: String,
    /// Ordered steps.
    pub steps: Vec<StepDefinition>,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Status store configuration.
    pub storage: StorageConfig,
    /// Timeouts and concurrency limits.
    pub execution: ExecutionConfig,
    /// Retry tables for steps and compensations.
    pub retry: RetryConfig,
    /// Remote HTTP participants.
    pub participants: Vec<ParticipantEndpoint>,
    /// Additional saga definitions beyond the built-in ones.
    pub sagas: Vec<SagaDefinitionConfig>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document, ignoring files and environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Create config for testing: in-memory storage and fast retries.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig::memory(),
            execution: ExecutionConfig {
                step_timeout_ms: 1_000,
                ..Default::default()
            },
            retry: RetryConfig {
                step: RetryPolicy::fast(3),
                compensation: RetryPolicy::fast(3),
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.storage_type, STORAGE_TYPE_SQLITE);
        assert!(config.participants.is_empty());
        assert!(config.sagas.is_empty());
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.storage_type, STORAGE_TYPE_MEMORY);
        assert_eq!(config.retry.step.max_attempts, 3);
    }

    #[test]
    fn test_config_from_yaml() {
        let config = Config::from_yaml(
            r#"
server:
  port: 9090
storage:
  storage_type: memory
execution:
  step_timeout_ms: 250
  saga_timeout_secs: 60
retry:
  compensation:
    max_attempts: 7
    min_delay_ms: 5
participants:
  - name: payments
    url: http://payments:8000
sagas:
  - name: refund
    steps:
      - name: reverse-charge
        participant: payments
        timeout_ms: 100
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.storage_type, STORAGE_TYPE_MEMORY);
        assert_eq!(config.execution.step_timeout_ms, 250);
        assert_eq!(config.execution.saga_timeout_secs, Some(60));
        assert_eq!(config.retry.compensation.max_attempts, 7);
        assert_eq!(config.retry.compensation.min_delay_ms, 5);
        assert_eq!(config.retry.step, RetryPolicy::default());
        assert_eq!(config.participants[0].name, "payments");
        assert_eq!(config.sagas[0].steps[0].participant, "payments");
        assert_eq!(config.sagas[0].steps[0].timeout_ms, Some(100));
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_yaml(include_str!("../../config.example.yaml")).unwrap();
        assert_eq!(config.storage.storage_type, STORAGE_TYPE_SQLITE);
        assert_eq!(config.retry.compensation.max_attempts, 5);
        assert_eq!(config.participants[0].name, "notifications");
        assert_eq!(config.sagas[0].steps.len(), 7);
        assert_eq!(config.sagas[0].steps[6].timeout_ms, Some(5000));
    }

    #[test]
    #[serial]
    fn test_config_load_env_override() {
        std::env::set_var("SAGA__SERVER__PORT", "7070");
        let config = Config::load(None);
        std::env::remove_var("SAGA__SERVER__PORT");

        let config = config.unwrap();
        assert_eq!(config.server.port, 7070);
    }

    #[test]
    #[serial]
    fn test_config_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saga.yaml");
        std::fs::write(&path, "execution:\n  max_concurrent_sagas: 3\n").unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.execution.max_concurrent_sagas, 3);
    }
}
