//! Default resolution for method arguments
//!
//! Jobs only need to name the arguments they care about. Everything else is looked up
//! per method through a [`DefaultSource`]:
//!
//! - [`DefaultRegistry::builtin`] - immutable CmdStan defaults, built once per process
//! - [`DefaultRegistry::with_overrides`] - settings-supplied tables layered on top
//!
//! ```rust
//! use samplebox::defaults::{DefaultRegistry, DefaultSource, Method, ParamValue};
//!
//! let registry = DefaultRegistry::builtin();
//! assert_eq!(registry.lookup(Method::Sample, "max_depth").unwrap(), ParamValue::Int(10));
//! assert!(registry.lookup(Method::Sample, "queue").is_err());
//! ```

mod registry;
mod tables;
mod traits;
mod types;

pub use registry::{DefaultRegistry, OverrideTables, RegistryError};
pub use traits::{DefaultSource, LookupError};
pub use types::{Method, ParamValue, UnknownMethod};
