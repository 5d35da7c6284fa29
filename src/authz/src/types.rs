//! Core authorization types

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Resource labels. Keys are case-sensitive and never normalized.
pub type Labels = HashMap<String, String>;

/// Namespace prefix for human users
pub const USER_PREFIX: &str = "user:";

/// Namespace prefix for service accounts
pub const SERVICE_ACCOUNT_PREFIX: &str = "sa:";

/// Namespace prefix for groups
pub const GROUP_PREFIX: &str = "group:";

/// An identity subject to authorization.
///
/// Each kind lives in its own namespace so that a user and a service account
/// with the same name never collide. Principals are assigned roles, never
/// labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Principal {
    /// Human user (`user:<name>`)
    User(String),
    /// Service account (`sa:<name>`)
    ServiceAccount(String),
    /// Group (`group:<name>`)
    Group(String),
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }

    pub fn service_account(name: impl Into<String>) -> Self {
        Self::ServiceAccount(name.into())
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::Group(name.into())
    }

    /// Parse a prefixed identifier such as `user:alice` or `sa:ci-runner`
    pub fn parse(id: &str) -> Result<Self> {
        let (ctor, rest): (fn(String) -> Self, &str) =
            if let Some(rest) = id.strip_prefix(USER_PREFIX) {
                (Self::User, rest)
            } else if let Some(rest) = id.strip_prefix(SERVICE_ACCOUNT_PREFIX) {
                (Self::ServiceAccount, rest)
            } else if let Some(rest) = id.strip_prefix(GROUP_PREFIX) {
                (Self::Group, rest)
            } else {
                return Err(AuthzError::InvalidInput(format!(
                    "principal '{}' has no known namespace prefix",
                    id
                )));
            };

        if rest.is_empty() {
            return Err(AuthzError::InvalidInput(format!(
                "principal '{}' has an empty name",
                id
            )));
        }

        Ok(ctor(rest.to_string()))
    }

    /// Name without the namespace prefix
    pub fn name(&self) -> &str {
        match self {
            Self::User(name) | Self::ServiceAccount(name) | Self::Group(name) => name,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Self::User(_) => USER_PREFIX,
            Self::ServiceAccount(_) => SERVICE_ACCOUNT_PREFIX,
            Self::Group(_) => GROUP_PREFIX,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix(), self.name())
    }
}

impl FromStr for Principal {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Principal {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.to_string()
    }
}

/// Current exclusive-lock holder of a resource, as reported by the lock
/// collaborator. Read-only to this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwnership {
    /// Locked resource
    pub resource_id: String,

    /// Principal holding the lock
    pub holder: Principal,

    /// Opaque lock token issued by the lock protocol
    pub lock_token: String,
}

impl LockOwnership {
    pub fn new(
        resource_id: impl Into<String>,
        holder: Principal,
        lock_token: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            holder,
            lock_token: lock_token.into(),
        }
    }
}

/// Identity handed over by the authentication collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedPrincipal {
    /// Validated principal
    pub principal: Principal,

    /// Raw group names taken from the external claim, untransformed
    #[serde(default)]
    pub groups: Vec<String>,

    /// Token reference for token-based authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<crate::revocation::TokenRef>,
}

impl AuthenticatedPrincipal {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            groups: Vec::new(),
            token: None,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_token(mut self, token: crate::revocation::TokenRef) -> Self {
        self.token = Some(token);
        self
    }
}

/// A request to perform `action` on a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Action identifier (`category:operation`)
    pub action: String,

    /// Resource type (e.g. `state`)
    pub resource_type: String,

    /// Resource identifier, when the resource already exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Current labels of the resource
    #[serde(default)]
    pub labels: Labels,

    /// Lock ownership fact, supplied only for lock-sensitive actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockOwnership>,
}

impl AccessRequest {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            labels: Labels::new(),
            lock: None,
        }
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_lock(mut self, lock: LockOwnership) -> Self {
        self.lock = Some(lock);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_parsing() {
        assert_eq!(Principal::parse("user:alice").unwrap(), Principal::user("alice"));
        assert_eq!(
            Principal::parse("sa:ci-runner").unwrap(),
            Principal::service_account("ci-runner")
        );
        assert_eq!(Principal::parse("group:platform").unwrap(), Principal::group("platform"));

        assert!(Principal::parse("alice").is_err());
        assert!(Principal::parse("user:").is_err());
    }

    #[test]
    fn test_principal_namespaces_do_not_collide() {
        let user = Principal::user("deploy");
        let sa = Principal::service_account("deploy");

        assert_ne!(user, sa);
        assert_eq!(user.to_string(), "user:deploy");
        assert_eq!(sa.to_string(), "sa:deploy");
    }

    #[test]
    fn test_principal_serde_roundtrip_uses_prefixed_form() {
        let json = serde_json::to_string(&Principal::service_account("builder")).unwrap();
        assert_eq!(json, "\"sa:builder\"");

        let parsed: Principal = serde_json::from_str("\"group:ops\"").unwrap();
        assert_eq!(parsed, Principal::group("ops"));

        assert!(serde_json::from_str::<Principal>("\"robot:x\"").is_err());
    }

    #[test]
    fn test_access_request_builder() {
        let request = AccessRequest::new("tfstate:write", "state")
            .with_resource_id("state-1")
            .with_label("env", "dev")
            .with_lock(LockOwnership::new("state-1", Principal::user("alice"), "tok"));

        assert_eq!(request.labels.get("env"), Some(&"dev".to_string()));
        assert_eq!(request.lock.unwrap().holder, Principal::user("alice"));
    }
}
