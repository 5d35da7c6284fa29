//! CEL (Common Expression Language) support for label-scope expressions
//!
//! Compiles expressions once, caches the compiled program by its exact source
//! string, and evaluates it against a resource's label map.

pub mod context;
pub mod engine;
pub mod error;

pub use context::LabelContext;
pub use engine::{CacheStats, Compiled, Engine};
pub use error::{CelError, Result};
