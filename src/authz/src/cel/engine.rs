//! CEL expression engine with compiled program caching

use cel_interpreter::objects::Value as CelValue;
use cel_interpreter::Program;
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cel::{
    context::LabelContext,
    error::{CelError, Result},
};
use crate::types::Labels;

/// Default upper bound on cached programs
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Outcome of compiling one expression.
///
/// Failures are cached as well so a broken expression is parsed (and
/// reported) once rather than on every request.
pub enum Compiled {
    Program(Program),
    Malformed(CelError),
}

/// CEL engine for compiling and evaluating label-scope expressions
pub struct Engine {
    /// Compiled program cache keyed by exact expression source
    program_cache: DashMap<String, Arc<Compiled>>,

    /// Cache size limit; the cache is cleared when it is exceeded
    capacity: usize,
}

impl Engine {
    /// Create a new CEL engine
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            program_cache: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Compile an expression without touching the cache
    ///
    /// The parser can panic on some malformed input; the panic is caught and
    /// reported as a compilation error.
    pub fn compile_uncached(expr: &str) -> Result<Program> {
        match panic::catch_unwind(AssertUnwindSafe(|| Program::compile(expr))) {
            Ok(Ok(program)) => Ok(program),
            Ok(Err(e)) => Err(CelError::CompilationError(e.to_string())),
            Err(_) => Err(CelError::CompilationError(
                "parser failed on this expression".to_string(),
            )),
        }
    }

    /// Fetch the compiled form of `expr`, compiling and caching on first use
    pub fn compile(&self, expr: &str) -> Arc<Compiled> {
        if let Some(compiled) = self.program_cache.get(expr) {
            return compiled.clone();
        }

        let compiled = match Self::compile_uncached(expr) {
            Ok(program) => Compiled::Program(program),
            Err(e) => {
                warn!(expression = expr, error = %e, "malformed scope expression, treating as non-matching");
                Compiled::Malformed(e)
            }
        };

        if self.program_cache.len() >= self.capacity {
            debug!(capacity = self.capacity, "scope program cache full, clearing");
            self.program_cache.clear();
        }

        self.program_cache
            .entry(expr.to_string())
            .or_insert_with(|| Arc::new(compiled))
            .clone()
    }

    /// Evaluate `expr` against `labels`
    ///
    /// # Errors
    /// Returns error if the expression does not compile, evaluation fails, or
    /// the result is not boolean
    pub fn evaluate_expression(&self, expr: &str, labels: &Labels) -> Result<bool> {
        match &*self.compile(expr) {
            Compiled::Program(program) => Self::evaluate(program, labels),
            Compiled::Malformed(e) => Err(e.clone()),
        }
    }

    /// Evaluate a compiled program against `labels`
    pub fn evaluate(program: &Program, labels: &Labels) -> Result<bool> {
        let referenced = program.references();
        let ctx = LabelContext::new(labels).to_cel_context(&referenced.variables());

        let result = panic::catch_unwind(AssertUnwindSafe(|| program.execute(&ctx)))
            .map_err(|_| CelError::EvaluationError("interpreter panicked".to_string()))?
            .map_err(|e| CelError::EvaluationError(e.to_string()))?;

        Self::to_bool(&result)
    }

    /// Clear the compiled program cache
    pub fn clear_cache(&self) {
        self.program_cache.clear();
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        let malformed = self
            .program_cache
            .iter()
            .filter(|entry| matches!(**entry.value(), Compiled::Malformed(_)))
            .count();

        CacheStats {
            size: self.program_cache.len(),
            malformed,
        }
    }

    fn to_bool(value: &CelValue) -> Result<bool> {
        match value {
            CelValue::Bool(b) => Ok(*b),
            _ => Err(CelError::NonBooleanResult),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached expressions
    pub size: usize,

    /// Cached expressions that failed to compile
    pub malformed: usize,
}
