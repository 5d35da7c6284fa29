//! Authorization decisions and the union-of-roles decision engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::constraints::ConstraintViolation;
use crate::policy::{Role, RoleId};
use crate::resolver::EffectiveRoles;
use crate::scope::ScopePredicate;
use crate::types::Labels;

/// Why a decision came out the way it did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    /// A role grants the action and its scope matches the resource
    Granted,

    /// Scope denial lifted because the requester holds the resource lock
    LockHeldOverride,

    /// No effective role grants the action
    NoActionGrant,

    /// Some role grants the action but none of those roles' scopes match
    LabelScopeMismatch,

    /// Proposed labels rejected by the label-integrity collaborator
    LabelIntegrityViolation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        message: String,
    },

    /// Proposed labels violate the create constraints of the allowing role
    CreateConstraintViolation {
        role: String,
        violation: ConstraintViolation,
    },

    /// A label update touches a key the allowing role marks immutable
    ImmutableKeyViolation { role: String, key: String },
}

impl DecisionReason {
    /// Stable short name, used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::LockHeldOverride => "lock_held_override",
            Self::NoActionGrant => "no_action_grant",
            Self::LabelScopeMismatch => "label_scope_mismatch",
            Self::LabelIntegrityViolation { .. } => "label_integrity_violation",
            Self::CreateConstraintViolation { .. } => "create_constraint_violation",
            Self::ImmutableKeyViolation { .. } => "immutable_key_violation",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Granted | Self::LockHeldOverride)
    }
}

/// Role reference carried in decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: RoleId,
    pub name: String,
}

impl From<&Role> for RoleRef {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
        }
    }
}

/// Authorization decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision ID
    pub id: Uuid,

    pub allowed: bool,

    pub reason: DecisionReason,

    /// Role that allowed the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_role: Option<RoleRef>,

    /// Roles that grant the action, in evaluation order
    #[serde(default)]
    pub scope_candidates: Vec<String>,

    pub timestamp: DateTime<Utc>,
}

impl Decision {
    fn new(reason: DecisionReason, matched_role: Option<RoleRef>, scope_candidates: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            allowed: reason.is_allow(),
            reason,
            matched_role,
            scope_candidates,
            timestamp: Utc::now(),
        }
    }

    /// Allow through `role`
    pub fn granted(role: &Role, scope_candidates: Vec<String>) -> Self {
        Self::new(DecisionReason::Granted, Some(RoleRef::from(role)), scope_candidates)
    }

    /// Deny with `reason`
    pub fn deny(reason: DecisionReason, scope_candidates: Vec<String>) -> Self {
        debug_assert!(!reason.is_allow());
        Self::new(reason, None, scope_candidates)
    }

    /// Same decision context under a different reason
    pub fn with_reason(mut self, reason: DecisionReason) -> Self {
        self.allowed = reason.is_allow();
        if !self.allowed {
            self.matched_role = None;
        }
        self.reason = reason;
        self
    }

    /// Replace the matched role
    pub fn with_matched_role(mut self, role: &Role) -> Self {
        self.matched_role = Some(RoleRef::from(role));
        self
    }
}

/// Evaluates effective roles against an action and a resource's labels.
///
/// Roles combine as a union: the request is allowed when any single role
/// both grants the action and has a scope matching the labels. A role never
/// narrows what another role allows.
#[derive(Clone)]
pub struct DecisionEngine {
    predicate: Arc<dyn ScopePredicate>,
}

impl DecisionEngine {
    pub fn new(predicate: Arc<dyn ScopePredicate>) -> Self {
        Self { predicate }
    }

    pub fn predicate(&self) -> &Arc<dyn ScopePredicate> {
        &self.predicate
    }

    /// Decide `action` on a resource of `resource_type` carrying `labels`
    pub fn decide(
        &self,
        roles: &EffectiveRoles,
        action: &str,
        resource_type: &str,
        labels: &Labels,
    ) -> Decision {
        let granting: Vec<&Arc<Role>> = roles
            .roles()
            .filter(|role| role.grants(action, resource_type))
            .collect();

        if granting.is_empty() {
            debug!(action, resource_type, roles = roles.len(), "No role grants action");
            return Decision::deny(DecisionReason::NoActionGrant, Vec::new());
        }

        let candidates: Vec<String> = granting.iter().map(|role| role.name.clone()).collect();

        match granting
            .iter()
            .find(|role| self.predicate.evaluate(&role.label_scope_expr, labels))
        {
            Some(role) => {
                debug!(action, role = %role.name, "Granted");
                Decision::granted(role, candidates)
            }
            None => {
                debug!(action, candidates = ?candidates, "No granting role's scope matches");
                Decision::deny(DecisionReason::LabelScopeMismatch, candidates)
            }
        }
    }

    /// Every role that would allow the request, in evaluation order
    pub fn matching_roles(
        &self,
        roles: &EffectiveRoles,
        action: &str,
        resource_type: &str,
        labels: &Labels,
    ) -> Vec<Arc<Role>> {
        roles
            .roles()
            .filter(|role| role.grants(action, resource_type))
            .filter(|role| self.predicate.evaluate(&role.label_scope_expr, labels))
            .cloned()
            .collect()
    }
}
