//! Label integrity checks
//!
//! Integrity rules are role-agnostic: they describe which label sets are
//! acceptable at all, before any role's create constraints are consulted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::Labels;

/// Why a label set was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    /// Offending key, when the violation concerns one key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub message: String,
}

impl IntegrityViolation {
    pub fn for_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            key: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "label '{}': {}", key, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Validates proposed labels on create and update
pub trait LabelIntegrityValidator: Send + Sync {
    fn validate(&self, labels: &Labels) -> Result<(), IntegrityViolation>;
}

/// Accepts every label set
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveIntegrity;

impl LabelIntegrityValidator for PermissiveIntegrity {
    fn validate(&self, _labels: &Labels) -> Result<(), IntegrityViolation> {
        Ok(())
    }
}

pub const DEFAULT_MAX_LABELS: usize = 64;
pub const DEFAULT_MAX_KEY_LEN: usize = 63;
pub const DEFAULT_MAX_VALUE_LEN: usize = 256;

/// Declarative label policy.
///
/// ```json
/// {
///   "allowed_keys": ["env", "team", "region"],
///   "allowed_values": { "env": ["dev", "staging", "prod"] },
///   "max_labels": 16
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelPolicy {
    /// Keys that may be used; `None` allows any key
    pub allowed_keys: Option<BTreeSet<String>>,

    /// Closed value sets for specific keys
    pub allowed_values: BTreeMap<String, BTreeSet<String>>,

    pub max_labels: usize,

    pub max_key_len: usize,

    pub max_value_len: usize,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            allowed_keys: None,
            allowed_values: BTreeMap::new(),
            max_labels: DEFAULT_MAX_LABELS,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }
}

impl LabelPolicy {
    pub fn with_allowed_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_allowed_values<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_labels(mut self, max: usize) -> Self {
        self.max_labels = max;
        self
    }
}

impl LabelIntegrityValidator for LabelPolicy {
    fn validate(&self, labels: &Labels) -> Result<(), IntegrityViolation> {
        if labels.len() > self.max_labels {
            return Err(IntegrityViolation::general(format!(
                "{} labels exceeds the limit of {}",
                labels.len(),
                self.max_labels
            )));
        }

        // sorted so the reported violation is deterministic
        let sorted: BTreeMap<&String, &String> = labels.iter().collect();

        for (key, value) in sorted {
            if key.is_empty() {
                return Err(IntegrityViolation::general("label key cannot be empty"));
            }
            if key.len() > self.max_key_len {
                return Err(IntegrityViolation::for_key(
                    key.as_str(),
                    format!("key longer than {} bytes", self.max_key_len),
                ));
            }
            if value.len() > self.max_value_len {
                return Err(IntegrityViolation::for_key(
                    key.as_str(),
                    format!("value longer than {} bytes", self.max_value_len),
                ));
            }
            if let Some(allowed) = &self.allowed_keys {
                if !allowed.contains(key) {
                    return Err(IntegrityViolation::for_key(key.as_str(), "key is not allowed"));
                }
            }
            if let Some(values) = self.allowed_values.get(key) {
                if !values.contains(value) {
                    return Err(IntegrityViolation::for_key(
                        key.as_str(),
                        format!("value '{}' is not allowed", value),
                    ));
                }
            }
        }

        Ok(())
    }
}
