//! Process settings for samplebox
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML settings file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use samplebox::config::Settings;
//!
//! let settings = Settings::load().expect("Failed to load settings");
//! println!("Default capacity: {}", settings.harness.default_capacity);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `SAMPLEBOX__<section>__<key>`:
//! - `SAMPLEBOX__HARNESS__DEFAULT_CAPACITY=10M`
//! - `SAMPLEBOX__HARNESS__PUSH_TIMEOUT=30s`
//! - `SAMPLEBOX__DEFAULTS__SAMPLE__NUM_WARMUP=500`
//!
//! # Settings File
//!
//! By default, settings are read from `config/samplebox.toml`.
//! This can be overridden using the `SAMPLEBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{Count, HumanDuration};
pub use models::{HarnessSettings, JobSettings, LoggingSettings, ModelSettings, Settings};
pub use sources::config_path;
pub use validation::ValidationError;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::defaults::{DefaultRegistry, RegistryError};
use crate::harness::{HarnessOptions, JobRequest};
use crate::worker::ModelError;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Settings validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Invalid defaults override: {0}")]
    DefaultsError(#[from] RegistryError),

    #[error("Job '{job}' has an invalid model: {source}")]
    ModelError { job: String, source: ModelError },
}

impl Settings {
    /// Load settings from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The settings file is malformed
    /// - Validation fails (duplicate jobs, zero capacities, bad log filter, etc.)
    pub fn load() -> Result<Self, SettingsError> {
        let settings = sources::load()?;
        validation::validate(&settings)?;
        Ok(settings)
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: PathBuf) -> Result<Self, SettingsError> {
        let settings = sources::load_from_sources(path)?;
        validation::validate(&settings)?;
        Ok(settings)
    }

    pub fn harness_options(&self) -> HarnessOptions {
        HarnessOptions {
            push_timeout: self.harness.push_timeout.map(|t| t.as_duration()),
            pop_timeout: self.harness.pop_timeout.map(|t| t.as_duration()),
        }
    }

    /// Built-in defaults with the `[defaults.*]` tables layered on top
    pub fn default_registry(&self) -> Result<Arc<DefaultRegistry>, SettingsError> {
        let builtin = DefaultRegistry::builtin();
        if self.defaults.is_empty() {
            return Ok(builtin);
        }

        let overrides = DefaultRegistry::from_overrides(&self.defaults)?;
        tracing::info!(overrides = overrides.len(), "Applying default overrides");
        Ok(Arc::new(builtin.with_overrides(&overrides)))
    }

    /// Requests for every configured job
    pub fn job_requests(&self) -> Result<Vec<JobRequest>, SettingsError> {
        self.jobs
            .iter()
            .map(|job| {
                let model = job.model.build().map_err(|source| SettingsError::ModelError {
                    job: job.name.clone(),
                    source,
                })?;
                let capacity = job.capacity.unwrap_or(self.harness.default_capacity).get();

                Ok(JobRequest::new(job.name.clone(), capacity)
                    .method(job.method)
                    .args(job.args.clone())
                    .model(model))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{DefaultSource, Method, ParamValue};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[[jobs]]\nname = \"only\"\n").unwrap();

        let settings = Settings::load_from_path(config_path).unwrap();
        let requests = settings.job_requests().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].name, "only");
        assert_eq!(requests[0].capacity, 10_000_000);
        assert_eq!(requests[0].method, Method::Sample);
    }

    #[test]
    fn test_validation_catches_duplicate_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            "[[jobs]]\nname = \"a\"\n\n[[jobs]]\nname = \"a\"\n",
        )
        .unwrap();

        let result = Settings::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            SettingsError::ValidationError(ValidationError::DuplicateJobName { .. })
        ));
    }

    #[test]
    fn test_default_overrides_layer_on_builtin() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[defaults.sample]\nnum_warmup = 250\n").unwrap();

        let settings = Settings::load_from_path(config_path).unwrap();
        let source = settings.default_registry().unwrap();
        assert_eq!(
            source.lookup(Method::Sample, "num_warmup").unwrap(),
            ParamValue::Int(250)
        );
        assert_eq!(
            source.lookup(Method::Sample, "num_samples").unwrap(),
            ParamValue::Int(1000)
        );
    }

    #[test]
    fn test_harness_options_from_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[harness]\npush_timeout = \"2s\"\n").unwrap();

        let options = Settings::load_from_path(config_path)
            .unwrap()
            .harness_options();
        assert_eq!(options.push_timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.pop_timeout, None);
    }
}
