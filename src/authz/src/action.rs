//! Action identifiers, grant patterns and the known-action catalogue

use crate::error::{AuthzError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Wildcard matching any category, operation or resource type
pub const WILDCARD: &str = "*";

pub const STATE_CREATE: &str = "state:create";
pub const STATE_READ: &str = "state:read";
pub const STATE_LIST: &str = "state:list";
pub const STATE_UPDATE_LABELS: &str = "state:update-labels";
pub const STATE_DELETE: &str = "state:delete";
pub const TFSTATE_READ: &str = "tfstate:read";
pub const TFSTATE_WRITE: &str = "tfstate:write";
pub const TFSTATE_LOCK: &str = "tfstate:lock";
pub const TFSTATE_UNLOCK: &str = "tfstate:unlock";
pub const DEPENDENCY_CREATE: &str = "dependency:create";
pub const DEPENDENCY_READ: &str = "dependency:read";
pub const DEPENDENCY_DELETE: &str = "dependency:delete";
pub const POLICY_READ: &str = "policy:read";
pub const POLICY_WRITE: &str = "policy:write";
pub const ADMIN_ROLE_MANAGE: &str = "admin:role-manage";
pub const ADMIN_GROUP_ASSIGN: &str = "admin:group-assign";

pub const RESOURCE_STATE: &str = "state";
pub const RESOURCE_POLICY: &str = "policy";
pub const RESOURCE_ROLE: &str = "role";

/// Data-plane actions eligible for the lock-held override
pub const LOCK_SENSITIVE_ACTIONS: &[&str] = &[TFSTATE_WRITE, TFSTATE_UNLOCK];

/// Action known to the system, with the resource type it applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownAction {
    pub action: &'static str,
    pub resource_type: &'static str,
}

/// Every action/resource-type combination the service authorizes
pub const KNOWN_ACTIONS: &[KnownAction] = &[
    KnownAction { action: STATE_CREATE, resource_type: RESOURCE_STATE },
    KnownAction { action: STATE_READ, resource_type: RESOURCE_STATE },
    KnownAction { action: STATE_LIST, resource_type: RESOURCE_STATE },
    KnownAction { action: STATE_UPDATE_LABELS, resource_type: RESOURCE_STATE },
    KnownAction { action: STATE_DELETE, resource_type: RESOURCE_STATE },
    KnownAction { action: TFSTATE_READ, resource_type: RESOURCE_STATE },
    KnownAction { action: TFSTATE_WRITE, resource_type: RESOURCE_STATE },
    KnownAction { action: TFSTATE_LOCK, resource_type: RESOURCE_STATE },
    KnownAction { action: TFSTATE_UNLOCK, resource_type: RESOURCE_STATE },
    KnownAction { action: DEPENDENCY_CREATE, resource_type: RESOURCE_STATE },
    KnownAction { action: DEPENDENCY_READ, resource_type: RESOURCE_STATE },
    KnownAction { action: DEPENDENCY_DELETE, resource_type: RESOURCE_STATE },
    KnownAction { action: POLICY_READ, resource_type: RESOURCE_POLICY },
    KnownAction { action: POLICY_WRITE, resource_type: RESOURCE_POLICY },
    KnownAction { action: ADMIN_ROLE_MANAGE, resource_type: RESOURCE_ROLE },
    KnownAction { action: ADMIN_GROUP_ASSIGN, resource_type: RESOURCE_ROLE },
];

/// Whether the lock-held override may apply to `action`
pub fn is_lock_sensitive(action: &str) -> bool {
    LOCK_SENSITIVE_ACTIONS.contains(&action)
}

fn grant_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\*|\*:\*|[a-z][a-z0-9_-]*:(\*|[a-z][a-z0-9_-]*))$")
            .expect("grant pattern is a valid regex")
    })
}

/// Permission carried by a role.
///
/// The grant is applied under the owning role's single scope expression; there
/// is no per-grant scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionGrant {
    /// `category:operation`, `category:*`, `*:*` or `*`
    pub action: String,

    /// Resource type the grant applies to (`*` for any)
    #[serde(default = "any_resource_type")]
    pub resource_type: String,
}

fn any_resource_type() -> String {
    WILDCARD.to_string()
}

impl ActionGrant {
    /// Grant `action` on any resource type
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: any_resource_type(),
        }
    }

    /// Restrict the grant to one resource type
    pub fn on(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    /// Check grant syntax
    pub fn validate(&self) -> Result<()> {
        if !grant_pattern().is_match(&self.action) {
            return Err(AuthzError::InvalidRole(format!(
                "invalid action grant '{}': expected category:operation, category:*, or *",
                self.action
            )));
        }

        if self.resource_type.trim().is_empty() {
            return Err(AuthzError::InvalidRole(format!(
                "action grant '{}' has an empty resource type",
                self.action
            )));
        }

        Ok(())
    }

    /// Whether this grant covers `action` on `resource_type`
    pub fn grants(&self, action: &str, resource_type: &str) -> bool {
        (self.resource_type == WILDCARD || self.resource_type == resource_type)
            && action_matches(&self.action, action)
    }
}

/// Match an action against a grant pattern.
///
/// `*` and `*:*` match everything, `category:*` matches any operation within
/// the category, anything else must match exactly.
pub fn action_matches(pattern: &str, action: &str) -> bool {
    if pattern == WILDCARD || pattern == "*:*" {
        return true;
    }

    if let Some(category) = pattern.strip_suffix(":*") {
        return action
            .split_once(':')
            .map(|(action_category, _)| action_category == category)
            .unwrap_or(false);
    }

    pattern == action
}
