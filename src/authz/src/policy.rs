//! Role storage and the policy repository

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AuthzError, Result};
use crate::types::Principal;

pub mod bundle;
pub mod repository;
pub mod role;
pub mod snapshot;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use bundle::{BundleDirectBinding, BundleGroupBinding, ImportSummary, PolicyBundle};
pub use repository::PolicyRepository;
pub use role::{CreateConstraint, Role, RoleId, RoleSpec};
pub use snapshot::{DirectBinding, GroupBinding, PolicySnapshot, PolicyState};

#[cfg(feature = "postgres")]
pub use postgres::PostgresPolicyStore;

/// Durable storage for roles and bindings.
///
/// Stores enforce the referential rules themselves so that every
/// implementation rejects the same mutations: role names are unique, a role
/// referenced by a binding cannot be deleted, and bindings must point at an
/// existing role.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Load every role and binding
    async fn load(&self) -> Result<PolicyState>;

    /// Insert a new role
    async fn create_role(&self, role: Role) -> Result<Role>;

    /// Replace the editable fields of a role.
    ///
    /// When `expected_version` is set the update only applies if the stored
    /// version still matches.
    async fn update_role(
        &self,
        id: RoleId,
        expected_version: Option<u64>,
        spec: role::RoleSpec,
    ) -> Result<Role>;

    /// Remove a role that no binding references
    async fn delete_role(&self, id: RoleId) -> Result<Role>;

    /// Bind `group` to a role; binding twice is a no-op
    async fn bind_group(&self, group: &str, role_id: RoleId) -> Result<()>;

    /// Remove a group binding, returning whether one existed
    async fn unbind_group(&self, group: &str, role_id: RoleId) -> Result<bool>;

    /// Bind a principal directly to a role; binding twice is a no-op
    async fn bind_principal(&self, principal: &Principal, role_id: RoleId) -> Result<()>;

    /// Remove a direct binding, returning whether one existed
    async fn unbind_principal(&self, principal: &Principal, role_id: RoleId) -> Result<bool>;
}

/// In-memory policy store
pub struct InMemoryPolicyStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    roles: HashMap<RoleId, Role>,
    group_bindings: Vec<GroupBinding>,
    direct_bindings: Vec<DirectBinding>,
}

impl MemoryState {
    fn name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.roles
            .values()
            .any(|role| role.name == name && Some(role.id) != except)
    }

    fn binding_count(&self, role_id: RoleId) -> usize {
        self.group_bindings.iter().filter(|b| b.role_id == role_id).count()
            + self.direct_bindings.iter().filter(|b| b.role_id == role_id).count()
    }

    fn require_role(&self, role_id: RoleId) -> Result<()> {
        if self.roles.contains_key(&role_id) {
            Ok(())
        } else {
            Err(AuthzError::RoleNotFound(role_id.to_string()))
        }
    }
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn load(&self) -> Result<PolicyState> {
        let state = self.state.read().await;

        Ok(PolicyState {
            roles: state.roles.values().cloned().collect(),
            group_bindings: state.group_bindings.clone(),
            direct_bindings: state.direct_bindings.clone(),
        })
    }

    async fn create_role(&self, role: Role) -> Result<Role> {
        let mut state = self.state.write().await;

        if state.name_taken(&role.name, None) {
            return Err(AuthzError::DuplicateRoleName(role.name));
        }

        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(
        &self,
        id: RoleId,
        expected_version: Option<u64>,
        spec: role::RoleSpec,
    ) -> Result<Role> {
        let mut state = self.state.write().await;

        let current = state
            .roles
            .get(&id)
            .ok_or_else(|| AuthzError::RoleNotFound(id.to_string()))?;

        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(AuthzError::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }
        }

        if state.name_taken(&spec.name, Some(id)) {
            return Err(AuthzError::DuplicateRoleName(spec.name));
        }

        let updated = current.updated(spec);
        state.roles.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_role(&self, id: RoleId) -> Result<Role> {
        let mut state = self.state.write().await;

        let role = state
            .roles
            .get(&id)
            .ok_or_else(|| AuthzError::RoleNotFound(id.to_string()))?;

        let bindings = state.binding_count(id);
        if bindings > 0 {
            return Err(AuthzError::RoleInUse {
                role: role.name.clone(),
                bindings,
            });
        }

        state
            .roles
            .remove(&id)
            .ok_or_else(|| AuthzError::RoleNotFound(id.to_string()))
    }

    async fn bind_group(&self, group: &str, role_id: RoleId) -> Result<()> {
        let mut state = self.state.write().await;
        state.require_role(role_id)?;

        let binding = GroupBinding {
            group: group.to_string(),
            role_id,
        };
        if !state.group_bindings.contains(&binding) {
            state.group_bindings.push(binding);
        }
        Ok(())
    }

    async fn unbind_group(&self, group: &str, role_id: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.group_bindings.len();
        state
            .group_bindings
            .retain(|b| !(b.group == group && b.role_id == role_id));
        Ok(state.group_bindings.len() != before)
    }

    async fn bind_principal(&self, principal: &Principal, role_id: RoleId) -> Result<()> {
        let mut state = self.state.write().await;
        state.require_role(role_id)?;

        let binding = DirectBinding {
            principal: principal.clone(),
            role_id,
        };
        if !state.direct_bindings.contains(&binding) {
            state.direct_bindings.push(binding);
        }
        Ok(())
    }

    async fn unbind_principal(&self, principal: &Principal, role_id: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.direct_bindings.len();
        state
            .direct_bindings
            .retain(|b| !(&b.principal == principal && b.role_id == role_id));
        Ok(state.direct_bindings.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_roles() {
        let store = InMemoryPolicyStore::new();

        let role = store
            .create_role(Role::from_spec(RoleSpec::new("reader").allow("state:read")))
            .await
            .unwrap();

        let dup = store
            .create_role(Role::from_spec(RoleSpec::new("reader")))
            .await;
        assert!(matches!(dup, Err(AuthzError::DuplicateRoleName(_))));

        let updated = store
            .update_role(role.id, Some(1), RoleSpec::new("viewer").allow("state:read"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let stale = store
            .update_role(role.id, Some(1), RoleSpec::new("viewer"))
            .await;
        assert!(matches!(
            stale,
            Err(AuthzError::VersionConflict { expected: 1, actual: 2 })
        ));

        let state = store.load().await.unwrap();
        assert_eq!(state.roles.len(), 1);
        assert_eq!(state.roles[0].name, "viewer");
    }

    #[tokio::test]
    async fn test_rename_onto_existing_name_rejected() {
        let store = InMemoryPolicyStore::new();
        store
            .create_role(Role::from_spec(RoleSpec::new("a")))
            .await
            .unwrap();
        let b = store
            .create_role(Role::from_spec(RoleSpec::new("b")))
            .await
            .unwrap();

        let result = store.update_role(b.id, None, RoleSpec::new("a")).await;
        assert!(matches!(result, Err(AuthzError::DuplicateRoleName(_))));
    }

    #[tokio::test]
    async fn test_delete_blocked_by_bindings() {
        let store = InMemoryPolicyStore::new();
        let role = store
            .create_role(Role::from_spec(RoleSpec::new("ops")))
            .await
            .unwrap();
        let ci = Principal::service_account("ci");

        store.bind_group("platform", role.id).await.unwrap();
        store.bind_group("platform", role.id).await.unwrap();
        store.bind_principal(&ci, role.id).await.unwrap();

        match store.delete_role(role.id).await {
            Err(AuthzError::RoleInUse { role, bindings }) => {
                assert_eq!(role, "ops");
                assert_eq!(bindings, 2);
            }
            other => panic!("expected RoleInUse, got {:?}", other),
        }

        assert!(store.unbind_group("platform", role.id).await.unwrap());
        assert!(!store.unbind_group("platform", role.id).await.unwrap());
        assert!(store.unbind_principal(&ci, role.id).await.unwrap());

        assert!(store.delete_role(role.id).await.is_ok());
        assert!(store.load().await.unwrap().roles.is_empty());
    }

    #[tokio::test]
    async fn test_bind_unknown_role() {
        let store = InMemoryPolicyStore::new();
        let result = store.bind_group("platform", RoleId::new_v4()).await;
        assert!(matches!(result, Err(AuthzError::RoleNotFound(_))));
    }
}
