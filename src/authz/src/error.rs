//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
///
/// Denials are not errors: a request that is refused by policy still produces
/// a [`Decision`](crate::engine::Decision). These variants cover invalid input,
/// administrative failures and infrastructure problems.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Role definition rejected
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Scope expression failed to compile at role definition time
    #[error("Malformed scope expression for role '{role}': {message}")]
    MalformedScopeExpression { role: String, message: String },

    /// Role not found
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Another role already uses this name
    #[error("Role name already in use: {0}")]
    DuplicateRoleName(String),

    /// Role deletion rejected while bindings reference it
    #[error("Role '{role}' is still referenced by {bindings} binding(s)")]
    RoleInUse { role: String, bindings: usize },

    /// Optimistic concurrency check failed on role update
    #[error("Role version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// The presented token has been revoked
    #[error("Token revoked: {0}")]
    TokenRevoked(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AuthzError {
    fn from(err: sqlx::Error) -> Self {
        AuthzError::Database(err.to_string())
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
