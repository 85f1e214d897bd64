//! Configuration Loader
//!
//! Layers pump options from defaults, an optional configuration file, and
//! `BUSROUTE__`-prefixed environment variables, then validates the result.
//!
//! Nested keys use `__` as separator, so
//! `BUSROUTE__CIRCUIT_BREAKER__MESSAGE_RECOVERY_PERIOD=60000` overrides
//! `circuit_breaker.message_recovery_period`. Durations are milliseconds.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::ServiceBusMessagePumpOptions;
use crate::constants::CONFIG_ENV_PREFIX;

/// Loads [`ServiceBusMessagePumpOptions`] from layered sources
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: CONFIG_ENV_PREFIX.to_string(),
        }
    }

    /// Read options from a file; the format follows its extension
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load and validate the options
    pub fn load(&self) -> ConfigResult<ServiceBusMessagePumpOptions> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigurationError::load_error(
                    path.display().to_string(),
                    "configuration file not found",
                ));
            }
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let source_name = self.source_name();
        let options: ServiceBusMessagePumpOptions = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ConfigurationError::load_error(&source_name, e))?;

        options.validate()?;

        debug!(
            source = %source_name,
            job_id = %options.job_id,
            max_messages_per_batch = options.max_messages_per_batch,
            prefetch_count = options.prefetch_count,
            "Message pump configuration loaded"
        );

        Ok(options)
    }

    fn source_name(&self) -> String {
        match &self.file {
            Some(path) => path.display().to_string(),
            None => format!("{} environment", self.env_prefix),
        }
    }
}
