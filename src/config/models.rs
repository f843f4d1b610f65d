use crate::defaults::{Method, OverrideTables};
use crate::humanize::{Count, HumanDuration};
use crate::worker::{DiagNormal, LogDensity, ModelError, SamplerArgs, StdNormal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Top-level process settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub harness: HarnessSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Per-method tables replacing built-in argument defaults
    #[serde(default)]
    pub defaults: OverrideTables,
    #[serde(default)]
    pub jobs: Vec<JobSettings>,
}

/// Channel sizing and bounded waits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessSettings {
    #[serde(default = "default_capacity")]
    pub default_capacity: Count,
    pub push_timeout: Option<HumanDuration>,
    pub pop_timeout: Option<HumanDuration>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
            push_timeout: None,
            pop_timeout: None,
        }
    }
}

fn default_capacity() -> Count {
    Count(10_000_000)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

/// One job to run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSettings {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: Method,
    /// Falls back to `harness.default_capacity`
    pub capacity: Option<Count>,
    #[serde(default)]
    pub args: SamplerArgs,
    #[serde(default)]
    pub model: ModelSettings,
}

fn default_method() -> Method {
    Method::Sample
}

/// Built-in target densities
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSettings {
    StdNormal {
        #[serde(default = "default_dim")]
        dim: usize,
    },
    DiagNormal {
        mean: Vec<f64>,
        sd: Vec<f64>,
    },
}

impl Default for ModelSettings {
    fn default() -> Self {
        ModelSettings::StdNormal { dim: default_dim() }
    }
}

fn default_dim() -> usize {
    1
}

impl ModelSettings {
    pub fn build(&self) -> Result<Arc<dyn LogDensity>, ModelError> {
        match self {
            ModelSettings::StdNormal { dim } => Ok(Arc::new(StdNormal::new(*dim))),
            ModelSettings::DiagNormal { mean, sd } => {
                Ok(Arc::new(DiagNormal::new(mean.clone(), sd.clone())?))
            }
        }
    }
}
