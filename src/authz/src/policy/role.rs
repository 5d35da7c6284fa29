//! Role definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::action::ActionGrant;
use crate::error::{AuthzError, Result};
use crate::scope::{is_unconditional, ScopeError, ScopePredicate};

/// Stable role identifier; survives renames
pub type RoleId = Uuid;

/// Per-key restriction applied when a resource is created under a role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConstraint {
    /// Values the key may take; empty means any value
    #[serde(default)]
    pub allowed_values: BTreeSet<String>,

    /// Whether the key must be present
    #[serde(default)]
    pub required: bool,
}

impl CreateConstraint {
    pub fn allowed<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_values: values.into_iter().map(Into::into).collect(),
            required: false,
        }
    }

    pub fn required() -> Self {
        Self {
            allowed_values: BTreeSet::new(),
            required: true,
        }
    }

    pub fn and_required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Editable part of a role, used to create or update one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub permissions: Vec<ActionGrant>,

    /// Boolean predicate over resource labels; empty grants unconditionally
    #[serde(default)]
    pub label_scope_expr: String,

    #[serde(default)]
    pub create_constraints: BTreeMap<String, CreateConstraint>,

    #[serde(default)]
    pub immutable_keys: BTreeSet<String>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn grant(mut self, grant: ActionGrant) -> Self {
        self.permissions.push(grant);
        self
    }

    /// Grant `action` on any resource type
    pub fn allow(self, action: impl Into<String>) -> Self {
        self.grant(ActionGrant::new(action))
    }

    pub fn with_scope(mut self, expr: impl Into<String>) -> Self {
        self.label_scope_expr = expr.into();
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, constraint: CreateConstraint) -> Self {
        self.create_constraints.insert(key.into(), constraint);
        self
    }

    pub fn with_immutable_key(mut self, key: impl Into<String>) -> Self {
        self.immutable_keys.insert(key.into());
        self
    }

    /// Validate the definition.
    ///
    /// The scope expression must compile here; a malformed expression is
    /// never stored.
    pub fn validate(&self, predicate: &dyn ScopePredicate) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AuthzError::InvalidRole("role name cannot be empty".to_string()));
        }

        if self.name.trim() != self.name {
            return Err(AuthzError::InvalidRole(format!(
                "role name '{}' has leading or trailing whitespace",
                self.name
            )));
        }

        for grant in &self.permissions {
            grant.validate()?;
        }

        for key in self.create_constraints.keys().chain(self.immutable_keys.iter()) {
            if key.is_empty() {
                return Err(AuthzError::InvalidRole(format!(
                    "role '{}' constrains an empty label key",
                    self.name
                )));
            }
        }

        if !is_unconditional(&self.label_scope_expr) {
            predicate
                .validate(&self.label_scope_expr)
                .map_err(|ScopeError::Malformed { message, .. }| {
                    AuthzError::MalformedScopeExpression {
                        role: self.name.clone(),
                        message,
                    }
                })?;
        }

        Ok(())
    }
}

/// Stored role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,

    /// Incremented on every update
    pub version: u64,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub permissions: Vec<ActionGrant>,

    /// Single scope applied to every grant of this role
    pub label_scope_expr: String,

    pub create_constraints: BTreeMap<String, CreateConstraint>,

    pub immutable_keys: BTreeSet<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Build version 1 of a new role from its spec
    pub fn from_spec(spec: RoleSpec) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            version: 1,
            name: spec.name,
            description: spec.description,
            permissions: spec.permissions,
            label_scope_expr: spec.label_scope_expr,
            create_constraints: spec.create_constraints,
            immutable_keys: spec.immutable_keys,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next version of this role with `spec` applied; id and creation time kept
    pub fn updated(&self, spec: RoleSpec) -> Self {
        Self {
            id: self.id,
            version: self.version + 1,
            name: spec.name,
            description: spec.description,
            permissions: spec.permissions,
            label_scope_expr: spec.label_scope_expr,
            create_constraints: spec.create_constraints,
            immutable_keys: spec.immutable_keys,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Editable fields of this role
    pub fn spec(&self) -> RoleSpec {
        RoleSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            permissions: self.permissions.clone(),
            label_scope_expr: self.label_scope_expr.clone(),
            create_constraints: self.create_constraints.clone(),
            immutable_keys: self.immutable_keys.clone(),
        }
    }

    /// Whether any grant of this role covers `action` on `resource_type`
    pub fn grants(&self, action: &str, resource_type: &str) -> bool {
        self.permissions
            .iter()
            .any(|grant| grant.grants(action, resource_type))
    }

    /// Whether the role applies regardless of labels
    pub fn is_unscoped(&self) -> bool {
        is_unconditional(&self.label_scope_expr)
    }
}
