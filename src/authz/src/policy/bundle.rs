//! JSON policy bundles for seeding and exporting roles

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::role::RoleSpec;
use super::snapshot::PolicySnapshot;
use crate::error::{AuthzError, Result};
use crate::types::Principal;

/// Group binding that references its role by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleGroupBinding {
    pub group: String,
    pub role: String,
}

/// Direct binding that references its role by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDirectBinding {
    pub principal: Principal,
    pub role: String,
}

/// Portable set of roles and bindings.
///
/// ```json
/// {
///   "roles": [
///     { "name": "dev-writer",
///       "permissions": [{ "action": "tfstate:*" }],
///       "label_scope_expr": "env == \"dev\"" }
///   ],
///   "group_bindings": [{ "group": "platform-engineers", "role": "dev-writer" }],
///   "direct_bindings": [{ "principal": "sa:ci", "role": "dev-writer" }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    #[serde(default)]
    pub roles: Vec<RoleSpec>,

    #[serde(default)]
    pub group_bindings: Vec<BundleGroupBinding>,

    #[serde(default)]
    pub direct_bindings: Vec<BundleDirectBinding>,
}

impl PolicyBundle {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Capture the roles and bindings of a snapshot
    pub fn from_snapshot(snapshot: &PolicySnapshot) -> Self {
        let mut bundle = Self::default();

        for role in snapshot.roles() {
            for group in snapshot.groups_for_role(&role.id) {
                bundle.group_bindings.push(BundleGroupBinding {
                    group,
                    role: role.name.clone(),
                });
            }
            for principal in snapshot.principals_for_role(&role.id) {
                bundle.direct_bindings.push(BundleDirectBinding {
                    principal,
                    role: role.name.clone(),
                });
            }
            bundle.roles.push(role.spec());
        }

        bundle
    }

    /// Check that role names are unique and every binding names a bundled role
    pub fn check_references(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for spec in &self.roles {
            if !names.insert(spec.name.as_str()) {
                return Err(AuthzError::DuplicateRoleName(spec.name.clone()));
            }
        }

        let roles_bound = self
            .group_bindings
            .iter()
            .map(|b| &b.role)
            .chain(self.direct_bindings.iter().map(|b| &b.role));

        for role in roles_bound {
            if !names.contains(role.as_str()) {
                return Err(AuthzError::RoleNotFound(role.clone()));
            }
        }

        Ok(())
    }
}

/// Outcome of importing a bundle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub roles_created: usize,
    pub roles_updated: usize,
    pub bindings_applied: usize,
}
