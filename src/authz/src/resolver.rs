//! Principal-to-role resolution
//!
//! A principal's effective roles are its direct bindings plus the roles bound
//! to each group it claims. Group names are used exactly as the identity
//! provider sent them. Resolution is a pure function of the snapshot, so two
//! requests with the same inputs always see the same roles.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::policy::{PolicySnapshot, Role, RoleId};
use crate::types::Principal;

/// How many group hops resolution follows. Groups are bound to roles, never
/// to other groups.
pub const MAX_GROUP_DEPTH: usize = 1;

/// Path by which a role reached a principal
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "group", rename_all = "snake_case")]
pub enum BindingSource {
    Direct,
    Group(String),
}

/// A role in effect for a principal, with every path that granted it
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    pub role: Arc<Role>,
    pub via: BTreeSet<BindingSource>,
}

/// Deduplicated effective roles, iterated in role-name order
#[derive(Debug, Clone, Default)]
pub struct EffectiveRoles {
    roles: Vec<ResolvedRole>,
}

impl EffectiveRoles {
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedRole> {
        self.roles.iter()
    }

    /// Roles without their binding paths
    pub fn roles(&self) -> impl Iterator<Item = &Arc<Role>> {
        self.roles.iter().map(|resolved| &resolved.role)
    }

    pub fn get(&self, id: &RoleId) -> Option<&ResolvedRole> {
        self.roles.iter().find(|resolved| &resolved.role.id == id)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Role names in iteration order
    pub fn names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.role.name.clone()).collect()
    }
}

impl FromIterator<Arc<Role>> for EffectiveRoles {
    /// Build from bare roles, each treated as directly bound
    fn from_iter<I: IntoIterator<Item = Arc<Role>>>(iter: I) -> Self {
        let mut by_id: BTreeMap<RoleId, ResolvedRole> = BTreeMap::new();
        for role in iter {
            by_id
                .entry(role.id)
                .or_insert_with(|| ResolvedRole {
                    role,
                    via: BTreeSet::new(),
                })
                .via
                .insert(BindingSource::Direct);
        }
        sorted(by_id)
    }
}

fn sorted(by_id: BTreeMap<RoleId, ResolvedRole>) -> EffectiveRoles {
    let mut roles: Vec<ResolvedRole> = by_id.into_values().collect();
    roles.sort_by(|a, b| a.role.name.cmp(&b.role.name));
    EffectiveRoles { roles }
}

/// Resolve the roles in effect for `principal` carrying `claimed_groups`.
///
/// A group principal also picks up the bindings of its own group. Unknown
/// principals and groups resolve to nothing.
pub fn resolve_roles(
    snapshot: &PolicySnapshot,
    principal: &Principal,
    claimed_groups: &[String],
) -> EffectiveRoles {
    let mut by_id: BTreeMap<RoleId, ResolvedRole> = BTreeMap::new();

    let mut add = |role_id: &RoleId, source: BindingSource| {
        if let Some(role) = snapshot.role(role_id) {
            by_id
                .entry(*role_id)
                .or_insert_with(|| ResolvedRole {
                    role: Arc::clone(role),
                    via: BTreeSet::new(),
                })
                .via
                .insert(source);
        }
    };

    for role_id in snapshot.roles_for_principal(principal) {
        add(role_id, BindingSource::Direct);
    }

    let own_group = match principal {
        Principal::Group(name) => Some(name),
        _ => None,
    };

    for group in claimed_groups.iter().chain(own_group) {
        for role_id in snapshot.roles_for_group(group) {
            add(role_id, BindingSource::Group(group.clone()));
        }
    }

    sorted(by_id)
}
