//! PostgreSQL revocation registry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::info;

use super::{RevocationRegistry, RevokedToken};
use crate::error::{AuthzError, Result};
use crate::types::Principal;

/// Revocation registry sharing the policy store's database.
///
/// Reads go straight to the database so that a revocation written by one
/// instance is seen by every other instance on its next check.
pub struct PostgresRevocationRegistry {
    pool: PgPool,
}

impl PostgresRevocationRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationRegistry for PostgresRevocationRegistry {
    async fn is_revoked(&self, token_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM revoked_tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthzError::Database(format!("Failed to check revocation: {}", e)))?;

        Ok(row.is_some())
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

        let inserted = sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_id, subject, expires_at, revoked_at, revoked_by)
            VALUES ($1, $2, $3, NOW(), $4)
            ON CONFLICT (token_id) DO NOTHING
            "#,
        )
        .bind(token_id)
        .bind(subject.to_string())
        .bind(expires_at)
        .bind(revoked_by)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthzError::Database(format!("Failed to revoke token: {}", e)))?
        .rows_affected();

        if inserted > 0 {
            info!(token_id, subject = %subject, revoked_by, "Revoked token");
        }

        let row = sqlx::query(
            "SELECT subject, expires_at, revoked_at, revoked_by FROM revoked_tokens WHERE token_id = $1",
        )
        .bind(token_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AuthzError::Database(format!("Failed to read revocation: {}", e)))?;

        let subject: String = row.try_get("subject")?;

        Ok(RevokedToken {
            token_id: token_id.to_string(),
            subject: Principal::parse(&subject)?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
            revoked_by: row.try_get("revoked_by")?,
        })
    }

    async fn revoke_all_for_subject(&self, subject: &Principal) -> Result<DateTime<Utc>> {
        let row = sqlx::query(
            r#"
            INSERT INTO subject_revocations (subject, revoked_at)
            VALUES ($1, NOW())
            ON CONFLICT (subject)
            DO UPDATE SET revoked_at = GREATEST(subject_revocations.revoked_at, EXCLUDED.revoked_at)
            RETURNING revoked_at
            "#,
        )
        .bind(subject.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AuthzError::Database(format!("Failed to revoke subject: {}", e)))?;

        let cutoff: DateTime<Utc> = row.try_get("revoked_at")?;
        info!(subject = %subject, cutoff = %cutoff, "Revoked all tokens for subject");
        Ok(cutoff)
    }

    async fn is_subject_revoked(&self, subject: &Principal, issued_at: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM subject_revocations WHERE subject = $1 AND revoked_at >= $2",
        )
        .bind(subject.to_string())
        .bind(issued_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthzError::Database(format!("Failed to check subject revocation: {}", e)))?;

        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let purged = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| AuthzError::Database(format!("Failed to purge revocations: {}", e)))?
            .rows_affected();

        Ok(purged as usize)
    }

    async fn purge_subject_cutoffs(&self, before: DateTime<Utc>) -> Result<usize> {
        let purged = sqlx::query("DELETE FROM subject_revocations WHERE revoked_at <= $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| AuthzError::Database(format!("Failed to purge subject revocations: {}", e)))?
            .rows_affected();

        Ok(purged as usize)
    }
}
