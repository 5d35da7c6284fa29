//! Immutable point-in-time view of roles and bindings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::role::{Role, RoleId};
use crate::types::Principal;

/// Persisted group → role binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupBinding {
    /// Group name exactly as it appears in identity claims
    pub group: String,
    pub role_id: RoleId,
}

/// Persisted principal → role binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectBinding {
    pub principal: Principal,
    pub role_id: RoleId,
}

/// Raw contents of a policy store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyState {
    pub roles: Vec<Role>,
    pub group_bindings: Vec<GroupBinding>,
    pub direct_bindings: Vec<DirectBinding>,
}

impl PolicyState {
    /// Number of bindings that reference `role_id`
    pub fn binding_count(&self, role_id: RoleId) -> usize {
        self.group_bindings.iter().filter(|b| b.role_id == role_id).count()
            + self.direct_bindings.iter().filter(|b| b.role_id == role_id).count()
    }
}

/// Indexed, read-only policy view.
///
/// A snapshot is never modified after construction; the repository publishes
/// a new one on every change, and requests keep whichever snapshot they
/// started with.
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    generation: u64,
    loaded_at: Option<DateTime<Utc>>,
    roles: HashMap<RoleId, Arc<Role>>,
    roles_by_name: HashMap<String, RoleId>,
    group_bindings: HashMap<String, BTreeSet<RoleId>>,
    direct_bindings: HashMap<Principal, BTreeSet<RoleId>>,
}

impl PolicySnapshot {
    /// Index `state` as generation `generation`.
    ///
    /// Bindings that point at unknown roles are dropped.
    pub fn build(state: PolicyState, generation: u64) -> Self {
        let mut roles = HashMap::with_capacity(state.roles.len());
        let mut roles_by_name = HashMap::with_capacity(state.roles.len());

        for role in state.roles {
            roles_by_name.insert(role.name.clone(), role.id);
            roles.insert(role.id, Arc::new(role));
        }

        let mut group_bindings: HashMap<String, BTreeSet<RoleId>> = HashMap::new();
        for binding in state.group_bindings {
            if roles.contains_key(&binding.role_id) {
                group_bindings
                    .entry(binding.group)
                    .or_default()
                    .insert(binding.role_id);
            }
        }

        let mut direct_bindings: HashMap<Principal, BTreeSet<RoleId>> = HashMap::new();
        for binding in state.direct_bindings {
            if roles.contains_key(&binding.role_id) {
                direct_bindings
                    .entry(binding.principal)
                    .or_default()
                    .insert(binding.role_id);
            }
        }

        Self {
            generation,
            loaded_at: Some(Utc::now()),
            roles,
            roles_by_name,
            group_bindings,
            direct_bindings,
        }
    }

    /// Snapshot with no roles, generation 0
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn role(&self, id: &RoleId) -> Option<&Arc<Role>> {
        self.roles.get(id)
    }

    pub fn role_by_name(&self, name: &str) -> Option<&Arc<Role>> {
        self.roles_by_name.get(name).and_then(|id| self.roles.get(id))
    }

    /// All roles, sorted by name
    pub fn roles(&self) -> Vec<Arc<Role>> {
        let mut roles: Vec<_> = self.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Role ids bound to `group`
    pub fn roles_for_group(&self, group: &str) -> impl Iterator<Item = &RoleId> {
        self.group_bindings.get(group).into_iter().flatten()
    }

    /// Role ids bound directly to `principal`
    pub fn roles_for_principal(&self, principal: &Principal) -> impl Iterator<Item = &RoleId> {
        self.direct_bindings.get(principal).into_iter().flatten()
    }

    /// Groups bound to `role_id`, sorted
    pub fn groups_for_role(&self, role_id: &RoleId) -> Vec<String> {
        let mut groups: Vec<String> = self
            .group_bindings
            .iter()
            .filter(|(_, ids)| ids.contains(role_id))
            .map(|(group, _)| group.clone())
            .collect();
        groups.sort();
        groups
    }

    /// Principals bound directly to `role_id`, sorted
    pub fn principals_for_role(&self, role_id: &RoleId) -> Vec<Principal> {
        let mut principals: Vec<Principal> = self
            .direct_bindings
            .iter()
            .filter(|(_, ids)| ids.contains(role_id))
            .map(|(principal, _)| principal.clone())
            .collect();
        principals.sort();
        principals
    }
}
