use thiserror::Error;

use super::types::{Method, ParamValue};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no default for '{name}' under method '{method}'")]
    NotFound { method: Method, name: String },
}

/// Read-only source of per-method argument defaults
///
/// Lookups are deterministic: the same method/name pair always yields the same value.
/// Unknown names are reported as [`LookupError::NotFound`] so callers can decide whether
/// the argument was optional.
pub trait DefaultSource: Send + Sync {
    fn lookup(&self, method: Method, name: &str) -> Result<ParamValue, LookupError>;
}
