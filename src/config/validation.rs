use super::models::{ModelSettings, Settings};
use crate::defaults::Method;
use std::collections::HashSet;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("harness.default_capacity must be at least 1")]
    ZeroDefaultCapacity,

    #[error("harness.{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },

    #[error("Invalid logging filter '{filter}': {reason}")]
    InvalidLogFilter { filter: String, reason: String },

    #[error("Defaults table for unknown method '{method}'")]
    UnknownDefaultsMethod { method: String },

    #[error("Job name must not be empty")]
    EmptyJobName,

    #[error("Duplicate job name '{name}'")]
    DuplicateJobName { name: String },

    #[error("Job '{job}' has capacity 0")]
    ZeroJobCapacity { job: String },

    #[error("Job '{job}' has an invalid model: {reason}")]
    InvalidModel { job: String, reason: String },
}

/// Validate the entire settings tree
pub fn validate(settings: &Settings) -> Result<(), ValidationError> {
    validate_harness(settings)?;
    validate_logging(settings)?;
    validate_defaults(settings)?;
    validate_jobs(settings)?;
    Ok(())
}

fn validate_harness(settings: &Settings) -> Result<(), ValidationError> {
    if settings.harness.default_capacity.get() == 0 {
        return Err(ValidationError::ZeroDefaultCapacity);
    }

    let timeouts = [
        ("push_timeout", settings.harness.push_timeout),
        ("pop_timeout", settings.harness.pop_timeout),
    ];
    for (field, timeout) in timeouts {
        if timeout.is_some_and(|t| t.as_duration().is_zero()) {
            return Err(ValidationError::ZeroTimeout { field });
        }
    }

    Ok(())
}

fn validate_logging(settings: &Settings) -> Result<(), ValidationError> {
    EnvFilter::try_new(&settings.logging.filter)
        .map(|_| ())
        .map_err(|err| ValidationError::InvalidLogFilter {
            filter: settings.logging.filter.clone(),
            reason: err.to_string(),
        })
}

fn validate_defaults(settings: &Settings) -> Result<(), ValidationError> {
    for method in settings.defaults.keys() {
        if method.parse::<Method>().is_err() {
            return Err(ValidationError::UnknownDefaultsMethod {
                method: method.clone(),
            });
        }
    }
    Ok(())
}

/// Job names must be unique and non-empty; explicit capacities and models must be usable
fn validate_jobs(settings: &Settings) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();

    for job in &settings.jobs {
        if job.name.trim().is_empty() {
            return Err(ValidationError::EmptyJobName);
        }
        if !seen.insert(job.name.as_str()) {
            return Err(ValidationError::DuplicateJobName {
                name: job.name.clone(),
            });
        }
        if job.capacity.is_some_and(|c| c.get() == 0) {
            return Err(ValidationError::ZeroJobCapacity {
                job: job.name.clone(),
            });
        }

        let invalid_model = |reason: String| ValidationError::InvalidModel {
            job: job.name.clone(),
            reason,
        };
        match &job.model {
            ModelSettings::StdNormal { dim: 0 } => {
                return Err(invalid_model("dim must be at least 1".into()));
            }
            model => {
                model.build().map_err(|err| invalid_model(err.to_string()))?;
            }
        }
    }

    Ok(())
}
