//! Snapshot-publishing front end to a [`PolicyStore`]

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::bundle::{ImportSummary, PolicyBundle};
use super::role::{Role, RoleId, RoleSpec};
use super::snapshot::PolicySnapshot;
use super::PolicyStore;
use crate::error::{AuthzError, Result};
use crate::scope::ScopePredicate;
use crate::types::Principal;

/// Policy repository.
///
/// Every mutation is validated, written to the store, and followed by a
/// snapshot refresh, so a binding change is visible to the next request.
/// Readers never block on writers: they clone the current `Arc` and keep
/// using it for the rest of their request.
pub struct PolicyRepository {
    store: Arc<dyn PolicyStore>,
    predicate: Arc<dyn ScopePredicate>,
    current: RwLock<Arc<PolicySnapshot>>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
}

impl PolicyRepository {
    /// Repository with an empty snapshot; call [`refresh`](Self::refresh)
    /// before serving requests
    pub fn new(store: Arc<dyn PolicyStore>, predicate: Arc<dyn ScopePredicate>) -> Self {
        Self {
            store,
            predicate,
            current: RwLock::new(Arc::new(PolicySnapshot::empty())),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a repository and load the initial snapshot
    pub async fn open(
        store: Arc<dyn PolicyStore>,
        predicate: Arc<dyn ScopePredicate>,
    ) -> Result<Self> {
        let repository = Self::new(store, predicate);
        repository.refresh().await?;
        Ok(repository)
    }

    /// Current snapshot
    pub fn load_snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.read().clone()
    }

    /// Scope predicate used to validate role definitions
    pub fn predicate(&self) -> &Arc<dyn ScopePredicate> {
        &self.predicate
    }

    /// Reload from the store and publish a new snapshot
    pub async fn refresh(&self) -> Result<Arc<PolicySnapshot>> {
        let _guard = self.refresh_lock.lock().await;

        let state = self.store.load().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(PolicySnapshot::build(state, generation));

        *self.current.write() = Arc::clone(&snapshot);

        debug!(
            generation,
            roles = snapshot.role_count(),
            "Published policy snapshot"
        );

        Ok(snapshot)
    }

    pub fn role_id_by_name(&self, name: &str) -> Option<RoleId> {
        self.load_snapshot().role_by_name(name).map(|role| role.id)
    }

    pub fn role_by_name(&self, name: &str) -> Option<Arc<Role>> {
        self.load_snapshot().role_by_name(name).cloned()
    }

    pub async fn create_role(&self, spec: RoleSpec) -> Result<Role> {
        spec.validate(self.predicate.as_ref())?;

        let role = self.store.create_role(Role::from_spec(spec)).await?;
        self.refresh().await?;

        info!(role = %role.name, role_id = %role.id, "Created role");
        Ok(role)
    }

    /// Replace a role's definition, optionally guarded by its current version
    pub async fn update_role(
        &self,
        id: RoleId,
        expected_version: Option<u64>,
        spec: RoleSpec,
    ) -> Result<Role> {
        spec.validate(self.predicate.as_ref())?;

        let role = self.store.update_role(id, expected_version, spec).await?;
        self.refresh().await?;

        info!(role = %role.name, role_id = %role.id, version = role.version, "Updated role");
        Ok(role)
    }

    /// Rename a role; its id and bindings are kept
    pub async fn rename_role(&self, id: RoleId, new_name: impl Into<String>) -> Result<Role> {
        let snapshot = self.refresh().await?;
        let current = snapshot
            .role(&id)
            .ok_or_else(|| AuthzError::RoleNotFound(id.to_string()))?;

        let mut spec = current.spec();
        spec.name = new_name.into();

        self.update_role(id, Some(current.version), spec).await
    }

    /// Delete a role. Fails with [`AuthzError::RoleInUse`] while any binding
    /// references it.
    pub async fn delete_role(&self, id: RoleId) -> Result<Role> {
        let role = self.store.delete_role(id).await?;
        self.refresh().await?;

        info!(role = %role.name, role_id = %role.id, "Deleted role");
        Ok(role)
    }

    pub async fn bind_group_to_role(&self, group: &str, role_id: RoleId) -> Result<()> {
        if group.is_empty() {
            return Err(AuthzError::InvalidInput("group name cannot be empty".to_string()));
        }

        self.store.bind_group(group, role_id).await?;
        self.refresh().await?;

        info!(group, role_id = %role_id, "Bound group to role");
        Ok(())
    }

    pub async fn unbind_group_from_role(&self, group: &str, role_id: RoleId) -> Result<bool> {
        let removed = self.store.unbind_group(group, role_id).await?;
        if removed {
            self.refresh().await?;
            info!(group, role_id = %role_id, "Unbound group from role");
        }
        Ok(removed)
    }

    pub async fn bind_principal_to_role(&self, principal: &Principal, role_id: RoleId) -> Result<()> {
        self.store.bind_principal(principal, role_id).await?;
        self.refresh().await?;

        info!(principal = %principal, role_id = %role_id, "Bound principal to role");
        Ok(())
    }

    pub async fn unbind_principal_from_role(
        &self,
        principal: &Principal,
        role_id: RoleId,
    ) -> Result<bool> {
        let removed = self.store.unbind_principal(principal, role_id).await?;
        if removed {
            self.refresh().await?;
            info!(principal = %principal, role_id = %role_id, "Unbound principal from role");
        }
        Ok(removed)
    }

    /// Apply a bundle: roles are created or updated by name, then bindings
    /// are added. Existing roles and bindings not named in the bundle are
    /// left alone.
    pub async fn import_bundle(&self, bundle: PolicyBundle) -> Result<ImportSummary> {
        bundle.check_references()?;
        for spec in &bundle.roles {
            spec.validate(self.predicate.as_ref())?;
        }

        let mut summary = ImportSummary::default();
        let snapshot = self.refresh().await?;

        for spec in bundle.roles {
            match snapshot.role_by_name(&spec.name) {
                Some(existing) => {
                    self.store.update_role(existing.id, Some(existing.version), spec).await?;
                    summary.roles_updated += 1;
                }
                None => {
                    self.store.create_role(Role::from_spec(spec)).await?;
                    summary.roles_created += 1;
                }
            }
        }

        let snapshot = self.refresh().await?;
        let role_id = |name: &str| {
            snapshot
                .role_by_name(name)
                .map(|role| role.id)
                .ok_or_else(|| AuthzError::RoleNotFound(name.to_string()))
        };

        for binding in &bundle.group_bindings {
            self.store.bind_group(&binding.group, role_id(&binding.role)?).await?;
            summary.bindings_applied += 1;
        }
        for binding in &bundle.direct_bindings {
            self.store
                .bind_principal(&binding.principal, role_id(&binding.role)?)
                .await?;
            summary.bindings_applied += 1;
        }

        self.refresh().await?;

        info!(
            created = summary.roles_created,
            updated = summary.roles_updated,
            bindings = summary.bindings_applied,
            "Imported policy bundle"
        );
        Ok(summary)
    }

    /// Periodically reload the snapshot so that changes written by other
    /// instances become visible
    pub fn spawn_refresh_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    error!(error = %e, "Policy snapshot refresh failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::InMemoryPolicyStore;
    use crate::scope::LabelScopeEvaluator;

    async fn repository() -> PolicyRepository {
        PolicyRepository::open(
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(LabelScopeEvaluator::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_mutations_publish_snapshots() {
        let repo = repository().await;
        let initial = repo.load_snapshot();

        let role = repo
            .create_role(RoleSpec::new("reader").allow("state:read"))
            .await
            .unwrap();

        let after = repo.load_snapshot();
        assert!(after.generation() > initial.generation());
        assert_eq!(initial.role_count(), 0);
        assert_eq!(after.role_count(), 1);
        assert_eq!(repo.role_id_by_name("reader"), Some(role.id));
    }

    #[tokio::test]
    async fn test_malformed_scope_never_stored() {
        let repo = repository().await;

        let result = repo
            .create_role(RoleSpec::new("broken").allow("state:read").with_scope("env =="))
            .await;

        assert!(matches!(result, Err(AuthzError::MalformedScopeExpression { .. })));
        assert_eq!(repo.load_snapshot().role_count(), 0);
    }

    #[tokio::test]
    async fn test_rename_keeps_bindings() {
        let repo = repository().await;
        let role = repo
            .create_role(RoleSpec::new("dev-writer").allow("tfstate:write"))
            .await
            .unwrap();
        repo.bind_group_to_role("platform", role.id).await.unwrap();

        let renamed = repo.rename_role(role.id, "dev-operator").await.unwrap();
        assert_eq!(renamed.id, role.id);

        let snapshot = repo.load_snapshot();
        assert!(snapshot.role_by_name("dev-writer").is_none());
        assert_eq!(snapshot.groups_for_role(&role.id), vec!["platform".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_group_rejected() {
        let repo = repository().await;
        let role = repo.create_role(RoleSpec::new("r")).await.unwrap();

        assert!(matches!(
            repo.bind_group_to_role("", role.id).await,
            Err(AuthzError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_import_bundle_is_idempotent() {
        let repo = repository().await;
        let bundle = PolicyBundle::from_json(
            r#"{
                "roles": [{ "name": "auditor", "permissions": [{ "action": "state:read" }] }],
                "group_bindings": [{ "group": "audit", "role": "auditor" }]
            }"#,
        )
        .unwrap();

        let first = repo.import_bundle(bundle.clone()).await.unwrap();
        assert_eq!(first.roles_created, 1);

        let second = repo.import_bundle(bundle).await.unwrap();
        assert_eq!(second.roles_created, 0);
        assert_eq!(second.roles_updated, 1);

        let snapshot = repo.load_snapshot();
        let id = snapshot.role_by_name("auditor").unwrap().id;
        assert_eq!(snapshot.roles_for_group("audit").count(), 1);
        assert_eq!(snapshot.groups_for_role(&id).len(), 1);
    }
}
