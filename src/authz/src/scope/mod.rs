//! Label-scope predicates
//!
//! The decision engine only asks one question of a role's scope: does it
//! accept these labels? [`ScopePredicate`] is that seam. The default
//! implementation, [`LabelScopeEvaluator`], compiles scope expressions with
//! CEL and caches the compiled programs.
//!
//! # Examples
//!
//! ```
//! use stategate_authz::scope::{LabelScopeEvaluator, ScopePredicate};
//! use stategate_authz::types::Labels;
//!
//! let evaluator = LabelScopeEvaluator::new();
//! let mut labels = Labels::new();
//! labels.insert("env".to_string(), "dev".to_string());
//!
//! assert!(evaluator.evaluate("env == \"dev\"", &labels));
//! assert!(evaluator.evaluate("", &labels));
//! assert!(!evaluator.evaluate("env == ", &labels));
//! ```

mod evaluator;


pub use evaluator::LabelScopeEvaluator;

use crate::types::Labels;
use thiserror::Error;

/// Scope expression errors surfaced at definition time
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("malformed scope expression '{expression}': {message}")]
    Malformed { expression: String, message: String },
}

/// Result type for scope operations
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

/// Predicate deciding whether a role's scope covers a resource.
pub trait ScopePredicate: Send + Sync {
    /// Evaluate `expr` against `labels`.
    ///
    /// Empty or whitespace-only expressions match everything. Any failure
    /// must evaluate to `false`.
    fn evaluate(&self, expr: &str, labels: &Labels) -> bool;

    /// Check that `expr` is well formed, for role definition time
    fn validate(&self, expr: &str) -> ScopeResult<()>;
}

/// Whether `expr` is the unconditional scope
pub fn is_unconditional(expr: &str) -> bool {
    expr.trim().is_empty()
}
