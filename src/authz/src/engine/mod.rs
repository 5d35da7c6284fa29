//! Authorization pipeline
//!
//! Orchestrates revocation, role resolution, the decision engine, label
//! integrity, role constraints and the lock-holder override, with audit
//! logging and metrics.

pub mod audit;
pub mod constraints;
pub mod decision;
pub mod lock_override;
pub mod metrics;

pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use constraints::{changed_keys, validate_create, validate_label_mutation, ConstraintViolation};
pub use decision::{Decision, DecisionEngine, DecisionReason, RoleRef};
pub use lock_override::override_if_lock_held;
pub use metrics::{EngineMetrics, MetricsCollector};

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::action::{is_lock_sensitive, KNOWN_ACTIONS, STATE_CREATE, STATE_UPDATE_LABELS};
use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::integrity::{IntegrityViolation, LabelIntegrityValidator, PermissiveIntegrity};
use crate::policy::{PolicyRepository, PolicySnapshot, PolicyStore, Role};
use crate::resolver::{resolve_roles, EffectiveRoles};
use crate::revocation::{spawn_reaper, RevocationRegistry};
use crate::scope::LabelScopeEvaluator;
use crate::types::{AccessRequest, AuthenticatedPrincipal, Labels, Principal};

/// One role's contribution to an effective permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopedGrant {
    pub role: String,
    /// Empty when the role applies to every resource
    pub label_scope_expr: String,
}

/// An action a principal can perform on some resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermission {
    pub action: String,
    pub resource_type: String,
    /// Roles granting the action, in evaluation order
    pub granted_by: Vec<ScopedGrant>,
}

/// Permissions a principal holds, for self-service and admin listing
#[derive(Debug, Clone, Default, Serialize)]
pub struct EffectivePermissions {
    pub principal: String,
    pub roles: Vec<String>,
    pub permissions: Vec<EffectivePermission>,
    pub policy_generation: u64,
}

impl EffectivePermissions {
    pub fn allows(&self, action: &str) -> bool {
        self.permissions.iter().any(|p| p.action == action)
    }
}

/// Authorization entry point.
///
/// # Pipeline
///
/// ```text
/// token → revocation check → resolver → decision engine
///                                     → [create/update] integrity → constraints
///                                     → [write/unlock] lock override
///                                     → audit + metrics
/// ```
///
/// Every call works against the policy snapshot current when it started.
/// Denials are returned as `Ok(Decision)`; a revoked token is the only
/// request-level `Err`.
pub struct Authorizer {
    repository: Arc<PolicyRepository>,
    engine: DecisionEngine,
    integrity: Arc<dyn LabelIntegrityValidator>,
    revocations: Arc<dyn RevocationRegistry>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<Arc<MetricsCollector>>,
    config: EngineConfig,
}

impl Authorizer {
    /// Authorizer over `repository` with permissive label integrity and no
    /// audit sink or metrics
    pub fn new(repository: Arc<PolicyRepository>, revocations: Arc<dyn RevocationRegistry>) -> Self {
        let engine = DecisionEngine::new(Arc::clone(repository.predicate()));

        Self {
            repository,
            engine,
            integrity: Arc::new(PermissiveIntegrity),
            revocations,
            audit: None,
            metrics: None,
            config: EngineConfig::default(),
        }
    }

    /// Build from configuration: opens the repository over `store` and
    /// enables the audit sink and metrics the configuration asks for
    pub async fn from_config(
        config: EngineConfig,
        store: Arc<dyn PolicyStore>,
        revocations: Arc<dyn RevocationRegistry>,
    ) -> Result<Self> {
        let evaluator = Arc::new(LabelScopeEvaluator::with_cache_capacity(config.scope_cache_capacity));
        let repository = Arc::new(PolicyRepository::open(store, evaluator).await?);

        let mut authorizer = Self::new(repository, revocations);
        if config.enable_audit {
            authorizer.audit = Some(Arc::new(TracingAuditSink));
        }
        if config.enable_metrics {
            authorizer.metrics = Some(Arc::new(MetricsCollector::new()));
        }

        info!(
            audit = config.enable_audit,
            metrics = config.enable_metrics,
            roles = authorizer.repository.load_snapshot().role_count(),
            "Authorizer initialized"
        );

        authorizer.config = config;
        Ok(authorizer)
    }

    pub fn with_integrity(mut self, integrity: Arc<dyn LabelIntegrityValidator>) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn repository(&self) -> &Arc<PolicyRepository> {
        &self.repository
    }

    pub fn revocations(&self) -> &Arc<dyn RevocationRegistry> {
        &self.revocations
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn get_metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Start the background tasks the configuration enables
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(interval) = self.config.snapshot_refresh_interval() {
            handles.push(Arc::clone(&self.repository).spawn_refresh_task(interval));
        }
        if let Some(interval) = self.config.revocation_reap_interval() {
            handles.push(spawn_reaper(
                Arc::clone(&self.revocations),
                interval,
                self.config.max_token_lifetime(),
            ));
        }

        handles
    }

    /// Authorize `request` for `who`.
    ///
    /// For `tfstate:write` and `tfstate:unlock`, a lock fact on the request
    /// for the same resource can lift a scope denial when `who` holds it.
    pub async fn authorize(
        &self,
        who: &AuthenticatedPrincipal,
        request: &AccessRequest,
    ) -> Result<Decision> {
        let start = Instant::now();
        self.check_token(who).await?;

        let snapshot = self.repository.load_snapshot();
        let roles = resolve_roles(&snapshot, &who.principal, &who.groups);

        let mut decision = self.engine.decide(
            &roles,
            &request.action,
            &request.resource_type,
            &request.labels,
        );

        if is_lock_sensitive(&request.action) {
            let lock = request
                .lock
                .as_ref()
                .filter(|lock| request.resource_id.as_deref() == Some(lock.resource_id.as_str()));
            decision = override_if_lock_held(decision, &request.action, lock, &who.principal);
        }

        self.finish(who, request, decision, &snapshot, start).await
    }

    /// Authorize creating a resource of `resource_type` with `labels`.
    ///
    /// Labels go through the integrity validator first; constraints are only
    /// consulted for label sets that pass it. The request is allowed when any
    /// role that allows `state:create` on these labels also accepts them
    /// under its create constraints.
    pub async fn authorize_create(
        &self,
        who: &AuthenticatedPrincipal,
        resource_type: &str,
        labels: &Labels,
    ) -> Result<Decision> {
        let start = Instant::now();
        self.check_token(who).await?;

        let request = AccessRequest::new(STATE_CREATE, resource_type).with_labels(labels.clone());
        let snapshot = self.repository.load_snapshot();

        if let Err(violation) = self.integrity.validate(labels) {
            let decision = integrity_denial(violation);
            return self.finish(who, &request, decision, &snapshot, start).await;
        }

        let roles = resolve_roles(&snapshot, &who.principal, &who.groups);
        let decision = self.engine.decide(&roles, STATE_CREATE, resource_type, labels);

        let decision = if decision.allowed {
            let allowing = self.engine.matching_roles(&roles, STATE_CREATE, resource_type, labels);
            first_passing(
                decision,
                &allowing,
                |role| validate_create(role, labels),
                |role, violation| DecisionReason::CreateConstraintViolation {
                    role: role.name.clone(),
                    violation,
                },
            )
        } else {
            decision
        };

        self.finish(who, &request, decision, &snapshot, start).await
    }

    /// Authorize replacing the labels of the resource described by `request`
    /// (whose `labels` are the current ones) with `new_labels`.
    ///
    /// Scope is evaluated against the current labels. Changes that touch a
    /// key immutable under every allowing role are refused.
    pub async fn authorize_label_update(
        &self,
        who: &AuthenticatedPrincipal,
        request: &AccessRequest,
        new_labels: &Labels,
    ) -> Result<Decision> {
        let start = Instant::now();
        self.check_token(who).await?;

        let mut request = request.clone();
        request.action = STATE_UPDATE_LABELS.to_string();
        let snapshot = self.repository.load_snapshot();

        if let Err(violation) = self.integrity.validate(new_labels) {
            let decision = integrity_denial(violation);
            return self.finish(who, &request, decision, &snapshot, start).await;
        }

        let roles = resolve_roles(&snapshot, &who.principal, &who.groups);
        let decision = self.engine.decide(
            &roles,
            STATE_UPDATE_LABELS,
            &request.resource_type,
            &request.labels,
        );

        let decision = if decision.allowed {
            let changed = changed_keys(&request.labels, new_labels);
            let allowing = self.engine.matching_roles(
                &roles,
                STATE_UPDATE_LABELS,
                &request.resource_type,
                &request.labels,
            );
            first_passing(
                decision,
                &allowing,
                |role| validate_label_mutation(role, &changed),
                |role, violation| DecisionReason::ImmutableKeyViolation {
                    role: role.name.clone(),
                    key: violation.key().to_string(),
                },
            )
        } else {
            decision
        };

        self.finish(who, &request, decision, &snapshot, start).await
    }

    /// Actions `principal` can perform on at least some resources, with the
    /// roles and scopes that grant each one
    pub fn effective_permissions(&self, principal: &Principal, groups: &[String]) -> EffectivePermissions {
        let snapshot = self.repository.load_snapshot();
        let roles = resolve_roles(&snapshot, principal, groups);

        let permissions = KNOWN_ACTIONS
            .iter()
            .filter_map(|known| {
                let granted_by: Vec<ScopedGrant> = roles
                    .roles()
                    .filter(|role| role.grants(known.action, known.resource_type))
                    .map(|role| ScopedGrant {
                        role: role.name.clone(),
                        label_scope_expr: role.label_scope_expr.clone(),
                    })
                    .collect();

                (!granted_by.is_empty()).then(|| EffectivePermission {
                    action: known.action.to_string(),
                    resource_type: known.resource_type.to_string(),
                    granted_by,
                })
            })
            .collect();

        EffectivePermissions {
            principal: principal.to_string(),
            roles: roles.names(),
            permissions,
            policy_generation: snapshot.generation(),
        }
    }

    /// Roles in effect for a principal, against the current snapshot
    pub fn effective_roles(&self, principal: &Principal, groups: &[String]) -> EffectiveRoles {
        resolve_roles(&self.repository.load_snapshot(), principal, groups)
    }

    async fn check_token(&self, who: &AuthenticatedPrincipal) -> Result<()> {
        let Some(token) = &who.token else {
            return Ok(());
        };

        match self.revocations.check(token).await {
            Ok(()) => Ok(()),
            Err(e @ AuthzError::TokenRevoked(_)) => {
                warn!(principal = %who.principal, token_id = %token.token_id, "Rejected revoked token");
                if let Some(metrics) = &self.metrics {
                    metrics.record_revoked().await;
                }
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Revocation check failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_error().await;
                }
                Err(e)
            }
        }
    }

    async fn finish(
        &self,
        who: &AuthenticatedPrincipal,
        request: &AccessRequest,
        decision: Decision,
        snapshot: &PolicySnapshot,
        start: Instant,
    ) -> Result<Decision> {
        let latency = start.elapsed();

        debug!(
            principal = %who.principal,
            action = %request.action,
            allowed = decision.allowed,
            reason = decision.reason.kind(),
            "Decision"
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_latency(latency).await;
            metrics.record_decision(&decision.reason).await;
        }

        if let Some(audit) = &self.audit {
            let entry = AuditEntry::new(
                &who.principal,
                &who.groups,
                &request.action,
                &request.resource_type,
                request.resource_id.as_deref(),
                &decision,
                snapshot.generation(),
                latency,
            );

            if let Err(e) = audit.record(entry).await {
                error!(error = %e, decision_id = %decision.id, "Failed to record audit entry");
                if let Some(metrics) = &self.metrics {
                    metrics.record_error().await;
                }
            }
        }

        Ok(decision)
    }
}

fn integrity_denial(violation: IntegrityViolation) -> Decision {
    Decision::deny(
        DecisionReason::LabelIntegrityViolation {
            key: violation.key,
            message: violation.message,
        },
        Vec::new(),
    )
}

/// Report the first allowing role whose check passes; when none passes,
/// deny with the first role's violation
fn first_passing(
    decision: Decision,
    allowing: &[Arc<Role>],
    check: impl Fn(&Role) -> std::result::Result<(), ConstraintViolation>,
    deny_reason: impl Fn(&Role, ConstraintViolation) -> DecisionReason,
) -> Decision {
    let mut first_violation = None;

    for role in allowing {
        let role: &Role = role;
        match check(role) {
            Ok(()) => return decision.with_matched_role(role),
            Err(violation) => {
                debug!(role = %role.name, %violation, "Role constraint not satisfied");
                first_violation.get_or_insert_with(|| deny_reason(role, violation));
            }
        }
    }

    match first_violation {
        Some(reason) => decision.with_reason(reason),
        None => decision,
    }
}
