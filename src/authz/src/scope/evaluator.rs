//! CEL-backed label-scope evaluator

use tracing::debug;

use super::{is_unconditional, ScopeError, ScopePredicate, ScopeResult};
use crate::cel::{CacheStats, CelError, Engine};
use crate::types::Labels;

/// Evaluates label-scope expressions, failing closed.
///
/// Compiled programs are cached by exact expression string in a concurrent
/// map, so evaluating one scope against many resources compiles it once.
/// Malformed expressions are logged when first compiled and never match.
pub struct LabelScopeEvaluator {
    engine: Engine,
}

impl LabelScopeEvaluator {
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            engine: Engine::with_capacity(capacity),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.engine.cache_stats()
    }

    pub fn clear_cache(&self) {
        self.engine.clear_cache();
    }
}

impl Default for LabelScopeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopePredicate for LabelScopeEvaluator {
    fn evaluate(&self, expr: &str, labels: &Labels) -> bool {
        if is_unconditional(expr) {
            return true;
        }

        match self.engine.evaluate_expression(expr, labels) {
            Ok(matched) => matched,
            // already reported by the engine when it was compiled
            Err(CelError::CompilationError(_)) => false,
            Err(e) => {
                debug!(expression = expr, error = %e, "scope expression did not evaluate to true");
                false
            }
        }
    }

    fn validate(&self, expr: &str) -> ScopeResult<()> {
        if is_unconditional(expr) {
            return Ok(());
        }

        Engine::compile_uncached(expr)
            .map(|_| ())
            .map_err(|e| ScopeError::Malformed {
                expression: expr.to_string(),
                message: e.to_string(),
            })
    }
}
