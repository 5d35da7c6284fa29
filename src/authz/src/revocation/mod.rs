//! Token revocation
//!
//! Revocation is checked before anything else on every request: a revoked
//! token is refused outright, whatever roles its principal holds. Records
//! are append-only; revoking a token twice keeps the first record. Records
//! whose token has expired are garbage-collected, since an expired token is
//! already rejected by authentication. Subject-wide cutoffs are dropped once
//! every token they cover must have expired, given a maximum token lifetime.
//!
//! Callers that authenticate tokens must go through
//! [`RevocationRegistry::check`]: it is the only entry point that sees both
//! per-token records and subject-wide cutoffs.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{AuthzError, Result};
use crate::types::Principal;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresRevocationRegistry;

/// Reference to the token a request was authenticated with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub token_id: String,
    pub subject: Principal,
    pub issued_at: DateTime<Utc>,
}

impl TokenRef {
    pub fn new(token_id: impl Into<String>, subject: Principal, issued_at: DateTime<Utc>) -> Self {
        Self {
            token_id: token_id.into(),
            subject,
            issued_at,
        }
    }
}

/// Revocation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedToken {
    pub token_id: String,
    pub subject: Principal,
    /// Natural expiry of the token; the record may be purged after this
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
    /// Administrator or process that revoked the token
    pub revoked_by: String,
}

/// Revocation store
///
/// [`check`](Self::check) is the entry point for authenticating a token. The
/// lower-level lookups each see only one kind of record.
#[async_trait]
pub trait RevocationRegistry: Send + Sync {
    /// Whether `token_id` has a per-token revocation record.
    ///
    /// Subject-wide revocations from
    /// [`revoke_all_for_subject`](Self::revoke_all_for_subject) are not
    /// consulted here, so a token can be refused by [`check`](Self::check)
    /// while this returns `false`.
    async fn is_revoked(&self, token_id: &str) -> Result<bool>;

    /// Revoke one token. Returns the stored record, which is the original
    /// one if the token was already revoked.
    async fn revoke(
        &self,
        token_id: &str,
        subject: &Principal,
        expires_at: DateTime<Utc>,
        revoked_by: &str,
    ) -> Result<RevokedToken>;

    /// Revoke every token issued to `subject` up to now. Returns the cutoff.
    async fn revoke_all_for_subject(&self, subject: &Principal) -> Result<DateTime<Utc>>;

    /// Whether tokens issued to `subject` at `issued_at` fall under a
    /// subject-wide revocation
    async fn is_subject_revoked(&self, subject: &Principal, issued_at: DateTime<Utc>) -> Result<bool>;

    /// Drop records for tokens that expired at or before `now`. Returns the
    /// number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Drop subject-wide cutoffs taken at or before `before`. Returns the
    /// number removed. Only safe once every token issued before `before` has
    /// expired.
    async fn purge_subject_cutoffs(&self, before: DateTime<Utc>) -> Result<usize>;

    /// Fail with [`AuthzError::TokenRevoked`] if `token` is revoked by id or
    /// by subject
    async fn check(&self, token: &TokenRef) -> Result<()> {
        if self.is_revoked(&token.token_id).await? {
            return Err(AuthzError::TokenRevoked(token.token_id.clone()));
        }

        if self.is_subject_revoked(&token.subject, token.issued_at).await? {
            return Err(AuthzError::TokenRevoked(format!(
                "{} (all tokens for {} revoked)",
                token.token_id, token.subject
            )));
        }

        Ok(())
    }
}

/// In-memory revocation registry
#[derive(Debug, Default)]
pub struct InMemoryRevocationRegistry {
    tokens: DashMap<String, RevokedToken>,
    subjects: DashMap<Principal, DateTime<Utc>>,
}

impl InMemoryRevocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, token_id: &str) -> Option<RevokedToken> {
        self.tokens.get(token_id).map(|entry| entry.value().clone())
    }

    /// Number of subjects with a subject-wide cutoff
    pub fn subject_cutoff_count(&self) -> usize {
        self.subjects.len()
    }
}

#[async_trait]
impl RevocationRegistry for InMemoryRevocationRegistry {
    async fn is_revoked(&self, token_id: &str) -> Result<bool> {
        Ok(self.tokens.contains_key(token_id))
    }

    async fn revoke(
        &self,
        token_id: &str,
        subject: &Principal,
        expires_at: DateTime<Utc>,
        revoked_by: &str,
    ) -> Result<RevokedToken> {
        if token_id.is_empty() {
            return Err(AuthzError::InvalidInput("token id cannot be empty".to_string()));
        }

        let record = self
            .tokens
            .entry(token_id.to_string())
            .or_insert_with(|| {
                info!(token_id, subject = %subject, revoked_by, "Revoked token");
                RevokedToken {
                    token_id: token_id.to_string(),
                    subject: subject.clone(),
                    expires_at,
                    revoked_at: Utc::now(),
                    revoked_by: revoked_by.to_string(),
                }
            })
            .value()
            .clone();

        Ok(record)
    }

    async fn revoke_all_for_subject(&self, subject: &Principal) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let mut cutoff = self.subjects.entry(subject.clone()).or_insert(now);
        if *cutoff < now {
            *cutoff = now;
        }

        info!(subject = %subject, cutoff = %*cutoff, "Revoked all tokens for subject");
        Ok(*cutoff)
    }

    async fn is_subject_revoked(&self, subject: &Principal, issued_at: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .subjects
            .get(subject)
            .map(|cutoff| issued_at <= *cutoff)
            .unwrap_or(false))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.tokens.len();
        self.tokens.retain(|_, record| record.expires_at > now);
        Ok(before.saturating_sub(self.tokens.len()))
    }

    async fn purge_subject_cutoffs(&self, before: DateTime<Utc>) -> Result<usize> {
        let count = self.subjects.len();
        self.subjects.retain(|_, cutoff| *cutoff > before);
        Ok(count.saturating_sub(self.subjects.len()))
    }
}

/// Periodically purge expired revocation records.
///
/// With `max_token_lifetime` set, subject-wide cutoffs older than that
/// lifetime are purged too; without it they are kept forever.
pub fn spawn_reaper(
    registry: Arc<dyn RevocationRegistry>,
    interval: Duration,
    max_token_lifetime: Option<Duration>,
) -> JoinHandle<()> {
    let lifetime = max_token_lifetime.and_then(|d| ChronoDuration::from_std(d).ok());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            let now = Utc::now();

            match registry.purge_expired(now).await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "Purged expired revocation records"),
                Err(e) => error!(error = %e, "Revocation purge failed"),
            }

            let Some(before) = lifetime.and_then(|l| now.checked_sub_signed(l)) else {
                continue;
            };
            match registry.purge_subject_cutoffs(before).await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "Purged subject revocation cutoffs"),
                Err(e) => error!(error = %e, "Subject cutoff purge failed"),
            }
        }
    })
}
