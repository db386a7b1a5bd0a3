//! Knot registrations and their verification state machine:
//! announced → verified → active. Rows are created at announcement with a
//! fresh secret; `verified` flips exactly once after the owner proof.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Registration {
    pub id: i64,
    pub domain: String,
    pub did: String,
    pub secret: String,
    pub verified: bool,
    pub needs_upgrade: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn create<'e, E: SqliteExecutor<'e>>(
    exec: E,
    domain: &str,
    did: &str,
    secret: &str,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO registrations (domain, did, secret, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(domain)
    .bind(did)
    .bind(secret)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get_by_domain<'e, E: SqliteExecutor<'e>>(
    exec: E,
    domain: &str,
) -> Result<Option<Registration>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM registrations WHERE domain = ?1")
        .bind(domain)
        .fetch_optional(exec)
        .await?)
}

/// Flip to verified. Transitions are monotonic; re-verifying is a no-op.
pub async fn mark_verified<'e, E: SqliteExecutor<'e>>(
    exec: E,
    domain: &str,
) -> Result<(), DbError> {
    let done = sqlx::query("UPDATE registrations SET verified = 1 WHERE domain = ?1")
        .bind(domain)
        .execute(exec)
        .await?;
    if done.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("registration {domain}")));
    }
    Ok(())
}

pub async fn set_needs_upgrade<'e, E: SqliteExecutor<'e>>(
    exec: E,
    domain: &str,
    needs_upgrade: bool,
) -> Result<(), DbError> {
    sqlx::query("UPDATE registrations SET needs_upgrade = ?2 WHERE domain = ?1")
        .bind(domain)
        .bind(needs_upgrade)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn list_all<'e, E: SqliteExecutor<'e>>(exec: E) -> Result<Vec<Registration>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM registrations ORDER BY domain")
        .fetch_all(exec)
        .await?)
}

/// Verified knots enter the event consumer's source set.
pub async fn list_verified<'e, E: SqliteExecutor<'e>>(
    exec: E,
) -> Result<Vec<Registration>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM registrations WHERE verified = 1 ORDER BY domain")
            .fetch_all(exec)
            .await?,
    )
}

pub async fn delete<'e, E: SqliteExecutor<'e>>(exec: E, domain: &str) -> Result<bool, DbError> {
    let done = sqlx::query("DELETE FROM registrations WHERE domain = ?1")
        .bind(domain)
        .execute(exec)
        .await?;
    Ok(done.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn announce_verify_lifecycle() {
        let db = Db::connect_in_memory().await.unwrap();
        create(db.pool(), "knot.example.com", "did:plc:alice", "s3cret", Utc::now())
            .await
            .unwrap();

        let reg = get_by_domain(db.pool(), "knot.example.com").await.unwrap().unwrap();
        assert!(!reg.verified);
        assert!(list_verified(db.pool()).await.unwrap().is_empty());

        mark_verified(db.pool(), "knot.example.com").await.unwrap();
        mark_verified(db.pool(), "knot.example.com").await.unwrap(); // idempotent
        assert_eq!(list_verified(db.pool()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_domain_conflicts() {
        let db = Db::connect_in_memory().await.unwrap();
        create(db.pool(), "knot.example.com", "did:plc:alice", "a", Utc::now())
            .await
            .unwrap();
        let err = create(db.pool(), "knot.example.com", "did:plc:bob", "b", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }
}
