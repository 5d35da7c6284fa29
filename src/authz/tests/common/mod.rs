//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use stategate_authz::engine::MemoryAuditSink;
use stategate_authz::{
    AuthenticatedPrincipal, Authorizer, EngineConfig, InMemoryPolicyStore,
    InMemoryRevocationRegistry, Labels, Principal,
};

pub struct Harness {
    pub authorizer: Authorizer,
    pub audit: Arc<MemoryAuditSink>,
    pub revocations: Arc<InMemoryRevocationRegistry>,
}

/// Authorizer over in-memory stores with audit captured in memory
pub async fn harness() -> Harness {
    let revocations = Arc::new(InMemoryRevocationRegistry::new());
    let audit = Arc::new(MemoryAuditSink::new());

    let authorizer = Authorizer::from_config(
        EngineConfig::default(),
        Arc::new(InMemoryPolicyStore::new()),
        revocations.clone(),
    )
    .await
    .unwrap()
    .with_audit_sink(audit.clone());

    Harness {
        authorizer,
        audit,
        revocations,
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn alice(groups: &[&str]) -> AuthenticatedPrincipal {
    AuthenticatedPrincipal::new(Principal::user("alice")).with_groups(groups.iter().copied())
}
