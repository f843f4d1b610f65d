//! Sampler arguments: caller-supplied values, default merging and validation

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults::{DefaultSource, LookupError, Method, ParamValue};

/// Argument names accepted by the sampling worker, in reporting order
pub const ARGUMENT_NAMES: [&str; 18] = [
    "random_seed",
    "chain",
    "init_radius",
    "num_warmup",
    "num_samples",
    "num_thin",
    "save_warmup",
    "refresh",
    "stepsize",
    "stepsize_jitter",
    "max_depth",
    "delta",
    "gamma",
    "kappa",
    "t0",
    "init_buffer",
    "term_buffer",
    "window",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required argument '{field}'")]
    MissingField { field: &'static str },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("default for '{field}' is a {found}, expected {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("method '{0}' is not supported by the sampling worker")]
    UnsupportedMethod(Method),
}

impl ConfigError {
    /// Name of the offending argument, if the error concerns one
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::MissingField { field }
            | ConfigError::InvalidValue { field, .. }
            | ConfigError::TypeMismatch { field, .. } => Some(field),
            ConfigError::UnsupportedMethod(_) => None,
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Sampler arguments as supplied by a caller; absent fields are resolved from defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerArgs {
    pub random_seed: Option<i64>,
    pub chain: Option<i64>,
    pub init_radius: Option<f64>,
    pub num_warmup: Option<i64>,
    pub num_samples: Option<i64>,
    pub num_thin: Option<i64>,
    pub save_warmup: Option<bool>,
    pub refresh: Option<i64>,
    pub stepsize: Option<f64>,
    pub stepsize_jitter: Option<f64>,
    pub max_depth: Option<i64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub kappa: Option<f64>,
    pub t0: Option<f64>,
    pub init_buffer: Option<i64>,
    pub term_buffer: Option<i64>,
    pub window: Option<i64>,
}

impl SamplerArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn random_seed(mut self, seed: i64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn chain(mut self, chain: i64) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn num_warmup(mut self, n: i64) -> Self {
        self.num_warmup = Some(n);
        self
    }

    pub fn num_samples(mut self, n: i64) -> Self {
        self.num_samples = Some(n);
        self
    }

    pub fn num_thin(mut self, n: i64) -> Self {
        self.num_thin = Some(n);
        self
    }

    pub fn save_warmup(mut self, save: bool) -> Self {
        self.save_warmup = Some(save);
        self
    }

    pub fn refresh(mut self, n: i64) -> Self {
        self.refresh = Some(n);
        self
    }

    pub fn stepsize(mut self, stepsize: f64) -> Self {
        self.stepsize = Some(stepsize);
        self
    }

    pub fn stepsize_jitter(mut self, jitter: f64) -> Self {
        self.stepsize_jitter = Some(jitter);
        self
    }

    pub fn max_depth(mut self, depth: i64) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Fill every absent argument from `source`
    ///
    /// Caller-supplied values always win. Names the source does not know are left empty so
    /// that validation can report them; a default of the wrong type is an error.
    pub fn merge_defaults(
        mut self,
        method: Method,
        source: &dyn DefaultSource,
    ) -> Result<Self, ConfigError> {
        let fill = Filler { method, source };

        fill.int(&mut self.random_seed, "random_seed")?;
        fill.int(&mut self.chain, "chain")?;
        fill.float(&mut self.init_radius, "init_radius")?;
        fill.int(&mut self.num_warmup, "num_warmup")?;
        fill.int(&mut self.num_samples, "num_samples")?;
        fill.int(&mut self.num_thin, "num_thin")?;
        fill.bool(&mut self.save_warmup, "save_warmup")?;
        fill.int(&mut self.refresh, "refresh")?;
        fill.float(&mut self.stepsize, "stepsize")?;
        fill.float(&mut self.stepsize_jitter, "stepsize_jitter")?;
        fill.int(&mut self.max_depth, "max_depth")?;
        fill.float(&mut self.delta, "delta")?;
        fill.float(&mut self.gamma, "gamma")?;
        fill.float(&mut self.kappa, "kappa")?;
        fill.float(&mut self.t0, "t0")?;
        fill.int(&mut self.init_buffer, "init_buffer")?;
        fill.int(&mut self.term_buffer, "term_buffer")?;
        fill.int(&mut self.window, "window")?;

        Ok(self)
    }
}

struct Filler<'a> {
    method: Method,
    source: &'a dyn DefaultSource,
}

impl Filler<'_> {
    fn lookup(&self, field: &'static str) -> Option<ParamValue> {
        match self.source.lookup(self.method, field) {
            Ok(value) => Some(value),
            Err(LookupError::NotFound { .. }) => {
                tracing::debug!(method = %self.method, field, "No default available");
                None
            }
        }
    }

    fn int(&self, slot: &mut Option<i64>, field: &'static str) -> Result<(), ConfigError> {
        if slot.is_none() {
            if let Some(value) = self.lookup(field) {
                *slot = Some(value.as_i64().ok_or(ConfigError::TypeMismatch {
                    field,
                    expected: "integer",
                    found: value.kind(),
                })?);
            }
        }
        Ok(())
    }

    fn float(&self, slot: &mut Option<f64>, field: &'static str) -> Result<(), ConfigError> {
        if slot.is_none() {
            if let Some(value) = self.lookup(field) {
                *slot = Some(value.as_f64().ok_or(ConfigError::TypeMismatch {
                    field,
                    expected: "float",
                    found: value.kind(),
                })?);
            }
        }
        Ok(())
    }

    fn bool(&self, slot: &mut Option<bool>, field: &'static str) -> Result<(), ConfigError> {
        if slot.is_none() {
            if let Some(value) = self.lookup(field) {
                *slot = Some(value.as_bool().ok_or(ConfigError::TypeMismatch {
                    field,
                    expected: "bool",
                    found: value.kind(),
                })?);
            }
        }
        Ok(())
    }
}

/// Fully resolved and validated sampler configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerConfig {
    pub seed: u32,
    pub chain: u32,
    pub init_radius: f64,
    pub num_warmup: u64,
    pub num_samples: u64,
    pub num_thin: u64,
    pub save_warmup: bool,
    pub refresh: u64,
    pub stepsize: f64,
    pub stepsize_jitter: f64,
    pub max_depth: u32,
    pub delta: f64,
    pub gamma: f64,
    pub kappa: f64,
    pub t0: f64,
    pub init_buffer: u64,
    pub term_buffer: u64,
    pub window: u64,
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::MissingField { field })
}

fn non_negative(value: Option<i64>, field: &'static str) -> Result<u64, ConfigError> {
    let value = required(value, field)?;
    u64::try_from(value).map_err(|_| ConfigError::invalid(field, format!("{value} is negative")))
}

fn positive_int(value: Option<i64>, field: &'static str) -> Result<u64, ConfigError> {
    match non_negative(value, field)? {
        0 => Err(ConfigError::invalid(field, "must be greater than 0")),
        n => Ok(n),
    }
}

fn positive_float(value: Option<f64>, field: &'static str) -> Result<f64, ConfigError> {
    let value = required(value, field)?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be positive and finite")))
    }
}

fn resolve_seed(value: Option<i64>) -> Result<u32, ConfigError> {
    match required(value, "random_seed")? {
        -1 => {
            let seed = rand::random::<u32>();
            tracing::info!(seed, "Derived random seed from entropy");
            Ok(seed)
        }
        seed => u32::try_from(seed).map_err(|_| {
            ConfigError::invalid(
                "random_seed",
                format!("{seed} is outside 0..={} (or -1 for a random seed)", u32::MAX),
            )
        }),
    }
}

impl TryFrom<SamplerArgs> for WorkerConfig {
    type Error = ConfigError;

    fn try_from(args: SamplerArgs) -> Result<Self, Self::Error> {
        let chain = non_negative(args.chain, "chain")?;
        let chain = u32::try_from(chain)
            .map_err(|_| ConfigError::invalid("chain", format!("{chain} exceeds {}", u32::MAX)))?;

        let init_radius = required(args.init_radius, "init_radius")?;
        // Initial values are drawn from (-r, r), whose width must stay finite
        if !(init_radius >= 0.0 && (2.0 * init_radius).is_finite()) {
            return Err(ConfigError::invalid(
                "init_radius",
                format!("{init_radius} must be non-negative with a finite range width"),
            ));
        }

        let stepsize_jitter = required(args.stepsize_jitter, "stepsize_jitter")?;
        if !(0.0..=1.0).contains(&stepsize_jitter) {
            return Err(ConfigError::invalid(
                "stepsize_jitter",
                format!("{stepsize_jitter} is outside [0, 1]"),
            ));
        }

        let max_depth = positive_int(args.max_depth, "max_depth")?;
        let max_depth = u32::try_from(max_depth)
            .map_err(|_| ConfigError::invalid("max_depth", format!("{max_depth} is too large")))?;

        let delta = required(args.delta, "delta")?;
        if !(delta > 0.0 && delta < 1.0) {
            return Err(ConfigError::invalid("delta", format!("{delta} is outside (0, 1)")));
        }

        let config = WorkerConfig {
            seed: resolve_seed(args.random_seed)?,
            chain,
            init_radius,
            num_warmup: non_negative(args.num_warmup, "num_warmup")?,
            num_samples: non_negative(args.num_samples, "num_samples")?,
            num_thin: positive_int(args.num_thin, "num_thin")?,
            save_warmup: required(args.save_warmup, "save_warmup")?,
            refresh: non_negative(args.refresh, "refresh")?,
            stepsize: positive_float(args.stepsize, "stepsize")?,
            stepsize_jitter,
            max_depth,
            delta,
            gamma: positive_float(args.gamma, "gamma")?,
            kappa: positive_float(args.kappa, "kappa")?,
            t0: positive_float(args.t0, "t0")?,
            init_buffer: non_negative(args.init_buffer, "init_buffer")?,
            term_buffer: non_negative(args.term_buffer, "term_buffer")?,
            window: positive_int(args.window, "window")?,
        };

        if config
            .init_buffer
            .checked_add(config.window)
            .and_then(|sum| sum.checked_add(config.term_buffer))
            .is_none()
        {
            return Err(ConfigError::invalid(
                "window",
                "init_buffer + window + term_buffer overflows",
            ));
        }

        Ok(config)
    }
}

impl WorkerConfig {
    pub fn total_iterations(&self) -> u64 {
        self.num_warmup + self.num_samples
    }

    /// Whether iteration `m` (0-based within a phase starting at `start`) reports progress
    pub fn is_progress_step(&self, start: u64, m: u64) -> bool {
        self.refresh > 0
            && (m == 0 || (m + 1) % self.refresh == 0 || start + m + 1 == self.total_iterations())
    }

    pub fn progress_messages(&self) -> u64 {
        progress_in_phase(self.num_warmup, self.refresh, self.num_samples == 0)
            + progress_in_phase(self.num_samples, self.refresh, true)
    }

    pub fn draw_messages(&self) -> u64 {
        let saved_warmup = if self.save_warmup {
            self.num_warmup.div_ceil(self.num_thin)
        } else {
            0
        };
        saved_warmup + self.num_samples.div_ceil(self.num_thin)
    }

    /// Exact number of messages a successful run produces
    pub fn expected_messages(&self) -> u64 {
        let adaptation = u64::from(self.num_warmup > 0);
        self.progress_messages() + self.draw_messages() + adaptation
    }
}

fn progress_in_phase(iterations: u64, refresh: u64, ends_run: bool) -> u64 {
    if iterations == 0 || refresh == 0 {
        return 0;
    }
    // First iteration plus every multiple of `refresh`; with refresh == 1 those coincide
    let mut count = 1 + iterations / refresh;
    if refresh == 1 {
        count -= 1;
    }
    if ends_run && iterations > 1 && iterations % refresh != 0 {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::DefaultRegistry;

    fn resolved(args: SamplerArgs) -> SamplerArgs {
        args.merge_defaults(Method::Sample, DefaultRegistry::builtin().as_ref())
            .unwrap()
    }

    #[test]
    fn test_merge_keeps_caller_values() {
        let args = resolved(SamplerArgs::new().num_warmup(100).delta(0.9).random_seed(7));
        assert_eq!(args.num_warmup, Some(100));
        assert_eq!(args.delta, Some(0.9));
        assert_eq!(args.random_seed, Some(7));
        assert_eq!(args.num_samples, Some(1000));
        assert_eq!(args.max_depth, Some(10));
        assert_eq!(args.init_radius, Some(2.0));
    }

    #[test]
    fn test_default_config_validates() {
        let config = WorkerConfig::try_from(resolved(SamplerArgs::new().random_seed(1))).unwrap();
        assert_eq!(config.seed, 1);
        assert_eq!(config.num_thin, 1);
        assert_eq!(config.window, 25);
        assert!(!config.save_warmup);
    }

    #[test]
    fn test_random_seed_from_entropy() {
        let args = resolved(SamplerArgs::new());
        assert_eq!(args.random_seed, Some(-1));

        // Each resolution draws a fresh seed; both must pass validation
        let first = WorkerConfig::try_from(args.clone()).unwrap();
        let second = WorkerConfig::try_from(args).unwrap();
        assert_eq!(first.chain, second.chain);
        assert!(resolve_seed(Some(-1)).is_ok());
        assert_eq!(resolve_seed(Some(i64::from(u32::MAX))), Ok(u32::MAX));
    }

    #[test]
    fn test_missing_field_named() {
        let err = WorkerConfig::try_from(SamplerArgs::new().random_seed(1)).unwrap_err();
        assert_eq!(err.field(), Some("chain"));
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_invalid_values_named() {
        let cases = [
            (SamplerArgs::new().num_thin(0), "num_thin"),
            (SamplerArgs::new().num_warmup(-5), "num_warmup"),
            (SamplerArgs::new().delta(1.5), "delta"),
            (SamplerArgs::new().stepsize(0.0), "stepsize"),
            (SamplerArgs::new().stepsize_jitter(2.0), "stepsize_jitter"),
            (SamplerArgs::new().max_depth(0), "max_depth"),
            (SamplerArgs::new().random_seed(-2), "random_seed"),
            (
                SamplerArgs::new().random_seed(i64::from(u32::MAX) + 1),
                "random_seed",
            ),
            (
                SamplerArgs {
                    init_radius: Some(-1.0),
                    ..SamplerArgs::new()
                },
                "init_radius",
            ),
            (
                SamplerArgs {
                    init_radius: Some(1e308),
                    ..SamplerArgs::new()
                },
                "init_radius",
            ),
            (
                SamplerArgs {
                    gamma: Some(0.0),
                    ..SamplerArgs::new()
                },
                "gamma",
            ),
            (
                SamplerArgs {
                    kappa: Some(-1.0),
                    ..SamplerArgs::new()
                },
                "kappa",
            ),
            (
                SamplerArgs {
                    t0: Some(0.0),
                    ..SamplerArgs::new()
                },
                "t0",
            ),
            (
                SamplerArgs {
                    window: Some(0),
                    ..SamplerArgs::new()
                },
                "window",
            ),
            (
                SamplerArgs {
                    init_buffer: Some(i64::MAX),
                    window: Some(i64::MAX),
                    term_buffer: Some(5),
                    ..SamplerArgs::new().num_warmup(30)
                },
                "window",
            ),
        ];

        for (args, field) in cases {
            let err = WorkerConfig::try_from(resolved(args)).unwrap_err();
            assert_eq!(err.field(), Some(field), "unexpected error: {err}");
        }
    }

    #[test]
    fn test_type_mismatch_from_defaults() {
        let overrides = DefaultRegistry::from_toml_str("[sample]\nnum_warmup = \"many\"\n").unwrap();
        let registry = DefaultRegistry::builtin().with_overrides(&overrides);

        let err = SamplerArgs::new()
            .merge_defaults(Method::Sample, &registry)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::TypeMismatch {
                field: "num_warmup",
                expected: "integer",
                found: "string"
            }
        );
    }

    #[test]
    fn test_integer_default_widens_to_float() {
        let overrides = DefaultRegistry::from_toml_str("[sample]\nstepsize = 2\n").unwrap();
        let registry = DefaultRegistry::builtin().with_overrides(&overrides);

        let args = SamplerArgs::new().merge_defaults(Method::Sample, &registry).unwrap();
        assert_eq!(args.stepsize, Some(2.0));
    }

    #[test]
    fn test_expected_messages_reference_run() {
        let config = WorkerConfig::try_from(resolved(
            SamplerArgs::new()
                .random_seed(1)
                .num_warmup(100)
                .num_samples(100)
                .refresh(10),
        ))
        .unwrap();

        assert_eq!(config.progress_messages(), 22);
        assert_eq!(config.draw_messages(), 100);
        assert_eq!(config.expected_messages(), 123);
    }

    #[test]
    fn test_progress_steps_match_count() {
        for (warmup, samples, refresh) in [(0, 7, 3), (15, 0, 10), (5, 5, 1), (3, 9, 0), (1, 1, 10)] {
            let config = WorkerConfig::try_from(resolved(
                SamplerArgs::new()
                    .random_seed(1)
                    .num_warmup(warmup)
                    .num_samples(samples)
                    .refresh(refresh),
            ))
            .unwrap();

            let counted = (0..config.num_warmup)
                .filter(|&m| config.is_progress_step(0, m))
                .count()
                + (0..config.num_samples)
                    .filter(|&m| config.is_progress_step(config.num_warmup, m))
                    .count();
            assert_eq!(counted as u64, config.progress_messages(), "{warmup}/{samples}/{refresh}");
        }
    }

    #[test]
    fn test_thinning_and_saved_warmup() {
        let config = WorkerConfig::try_from(resolved(
            SamplerArgs::new()
                .random_seed(1)
                .num_warmup(10)
                .num_samples(10)
                .num_thin(3)
                .save_warmup(true),
        ))
        .unwrap();
        assert_eq!(config.draw_messages(), 4 + 4);
    }
}
