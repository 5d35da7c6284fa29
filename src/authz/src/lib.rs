//! # StateGate Authorization Engine
//!
//! Label-scoped role-based authorization for a multi-tenant infrastructure
//! state service.
//!
//! ## Features
//!
//! - **Roles with label scopes**: each role carries one CEL expression over
//!   resource labels; roles combine as a union
//! - **Group and direct bindings** resolved per request from an immutable,
//!   atomically swapped policy snapshot
//! - **Create constraints and immutable keys** checked against the role that
//!   allowed the request
//! - **Lock-holder override** for in-flight state writes
//! - **Token revocation** checked before every decision
//! - **PostgreSQL** storage for roles, bindings and revocations (feature
//!   `postgres`)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stategate_authz::{
//!     AccessRequest, AuthenticatedPrincipal, Authorizer, EngineConfig, InMemoryPolicyStore,
//!     InMemoryRevocationRegistry, Principal, RoleSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let authorizer = Authorizer::from_config(
//!         EngineConfig::default(),
//!         Arc::new(InMemoryPolicyStore::new()),
//!         Arc::new(InMemoryRevocationRegistry::new()),
//!     )
//!     .await?;
//!
//!     let role = authorizer
//!         .repository()
//!         .create_role(RoleSpec::new("dev-writer").allow("tfstate:write").with_scope("env == \"dev\""))
//!         .await?;
//!     authorizer.repository().bind_group_to_role("platform-engineers", role.id).await?;
//!
//!     let alice = AuthenticatedPrincipal::new(Principal::user("alice"))
//!         .with_groups(["platform-engineers"]);
//!     let request = AccessRequest::new("tfstate:write", "state").with_label("env", "dev");
//!
//!     let decision = authorizer.authorize(&alice, &request).await?;
//!     assert!(decision.allowed);
//!
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod cel; // CEL expression engine
pub mod config;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod policy;
pub mod resolver;
pub mod revocation;
pub mod scope; // Label-scope predicates
pub mod types;

// Re-export commonly used types
pub use action::{ActionGrant, KNOWN_ACTIONS};
pub use config::EngineConfig;
pub use engine::{Authorizer, Decision, DecisionEngine, DecisionReason, EffectivePermissions};
pub use error::{AuthzError, Result};
pub use integrity::{LabelIntegrityValidator, LabelPolicy, PermissiveIntegrity};
pub use policy::{
    CreateConstraint, InMemoryPolicyStore, PolicyBundle, PolicyRepository, PolicyStore, Role, RoleId,
    RoleSpec,
};
pub use resolver::{resolve_roles, EffectiveRoles};
pub use revocation::{InMemoryRevocationRegistry, RevocationRegistry, TokenRef};
pub use scope::{LabelScopeEvaluator, ScopePredicate};
pub use types::{AccessRequest, AuthenticatedPrincipal, Labels, LockOwnership, Principal};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
