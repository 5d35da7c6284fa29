//! Lock-holder override for state writes

use tracing::info;

use super::decision::{Decision, DecisionReason};
use crate::action::is_lock_sensitive;
use crate::types::{LockOwnership, Principal};

/// Lift a scope denial when the requester holds the resource lock.
///
/// A principal that acquired a lock while in scope can finish its write or
/// release the lock after a label change moves the resource out of scope.
/// Applies only to lock-sensitive actions and only to
/// [`DecisionReason::LabelScopeMismatch`]; a principal with no grant for the
/// action gains nothing from holding the lock.
pub fn override_if_lock_held(
    decision: Decision,
    action: &str,
    lock: Option<&LockOwnership>,
    requester: &Principal,
) -> Decision {
    if decision.reason != DecisionReason::LabelScopeMismatch || !is_lock_sensitive(action) {
        return decision;
    }

    match lock {
        Some(lock) if &lock.holder == requester => {
            info!(
                action,
                principal = %requester,
                resource = %lock.resource_id,
                "Lock holder override applied"
            );
            decision.with_reason(DecisionReason::LockHeldOverride)
        }
        _ => decision,
    }
}
