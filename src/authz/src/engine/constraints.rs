//! Create-time constraints and immutable label keys
//!
//! Constraints belong to the role that allowed the request and are checked
//! independently of how broad that role's scope is. Keys a role does not
//! mention are unrestricted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::policy::Role;
use crate::types::Labels;

/// A label set that breaks a role's constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintViolation {
    ValueNotAllowed {
        key: String,
        value: String,
        allowed: Vec<String>,
    },
    MissingRequiredLabel {
        key: String,
    },
    ImmutableKey {
        key: String,
    },
}

impl ConstraintViolation {
    pub fn key(&self) -> &str {
        match self {
            Self::ValueNotAllowed { key, .. }
            | Self::MissingRequiredLabel { key }
            | Self::ImmutableKey { key } => key,
        }
    }

    /// Decision reason kind this violation is reported under
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValueNotAllowed { .. } | Self::MissingRequiredLabel { .. } => {
                "create_constraint_violation"
            }
            Self::ImmutableKey { .. } => "immutable_key_violation",
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueNotAllowed { key, value, allowed } => write!(
                f,
                "label '{}' may not be '{}' (allowed: {})",
                key,
                value,
                allowed.join(", ")
            ),
            Self::MissingRequiredLabel { key } => write!(f, "label '{}' is required", key),
            Self::ImmutableKey { key } => write!(f, "label '{}' is immutable", key),
        }
    }
}

/// Check a new resource's labels against `role`'s create constraints
pub fn validate_create(role: &Role, labels: &Labels) -> Result<(), ConstraintViolation> {
    for (key, constraint) in &role.create_constraints {
        match labels.get(key) {
            None if constraint.required => {
                return Err(ConstraintViolation::MissingRequiredLabel { key: key.clone() });
            }
            Some(value)
                if !constraint.allowed_values.is_empty()
                    && !constraint.allowed_values.contains(value) =>
            {
                return Err(ConstraintViolation::ValueNotAllowed {
                    key: key.clone(),
                    value: value.clone(),
                    allowed: constraint.allowed_values.iter().cloned().collect(),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

/// Check that none of `changed_keys` is immutable under `role`
pub fn validate_label_mutation(
    role: &Role,
    changed_keys: &BTreeSet<String>,
) -> Result<(), ConstraintViolation> {
    match changed_keys.intersection(&role.immutable_keys).next() {
        Some(key) => Err(ConstraintViolation::ImmutableKey { key: key.clone() }),
        None => Ok(()),
    }
}

/// Keys added, removed, or given a different value between `before` and `after`
pub fn changed_keys(before: &Labels, after: &Labels) -> BTreeSet<String> {
    let mut changed: BTreeSet<String> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();

    changed.extend(
        before
            .keys()
            .filter(|key| !after.contains_key(*key))
            .cloned(),
    );

    changed
}
