//! Audit records for authorization decisions
//!
//! Every decision the [`Authorizer`](super::Authorizer) makes is handed to
//! an [`AuditSink`]. The default sink writes one structured `tracing` event
//! per decision under the `stategate_authz::audit` target, so deployments
//! route audit output with their subscriber configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::decision::{Decision, DecisionReason, RoleRef};
use crate::error::Result;
use crate::types::Principal;

/// Target used for audit events
pub const AUDIT_TARGET: &str = "stategate_authz::audit";

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Decision this entry records
    pub decision_id: Uuid,

    pub principal: Principal,

    /// Groups claimed by the principal for this request
    #[serde(default)]
    pub groups: Vec<String>,

    pub action: String,

    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    pub allowed: bool,

    pub reason: DecisionReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_role: Option<RoleRef>,

    /// Policy snapshot generation the decision was made against
    pub policy_generation: u64,

    pub latency_us: u64,

    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        principal: &Principal,
        groups: &[String],
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        decision: &Decision,
        policy_generation: u64,
        latency: Duration,
    ) -> Self {
        Self {
            decision_id: decision.id,
            principal: principal.clone(),
            groups: groups.to_vec(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            allowed: decision.allowed,
            reason: decision.reason.clone(),
            matched_role: decision.matched_role.clone(),
            policy_generation,
            latency_us: latency.as_micros() as u64,
            timestamp: decision.timestamp,
        }
    }
}

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Writes audit entries as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let reason = serde_json::to_string(&entry.reason)?;

        info!(
            target: AUDIT_TARGET,
            decision_id = %entry.decision_id,
            principal = %entry.principal,
            action = %entry.action,
            resource_type = %entry.resource_type,
            resource_id = entry.resource_id.as_deref().unwrap_or("-"),
            allowed = entry.allowed,
            reason = %reason,
            matched_role = entry.matched_role.as_ref().map(|r| r.name.as_str()).unwrap_or("-"),
            policy_generation = entry.policy_generation,
            latency_us = entry.latency_us,
            "authorization decision"
        );

        Ok(())
    }
}

/// Keeps audit entries in memory, for tests and the inspect tool
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}
