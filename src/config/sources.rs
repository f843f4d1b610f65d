use super::models::Settings;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "SAMPLEBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/samplebox.toml";
const ENV_PREFIX: &str = "SAMPLEBOX";
const ENV_SEPARATOR: &str = "__";

/// Path of the settings file: `SAMPLEBOX_CONFIG` or the default location
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load settings with priority (lowest to highest):
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables
pub fn load() -> Result<Settings, ConfigError> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    load_from_sources(config_path())
}

/// Load settings from a specific path plus the environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading settings from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Settings file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // SAMPLEBOX__HARNESS__DEFAULT_CAPACITY -> harness.default_capacity
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let settings = builder.build()?;
    settings.try_deserialize()
}
