//! Email addresses per DID. At most one primary per DID (partial unique
//! index); verification codes are single-use with a resend floor.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

/// Minimum time between verification sends for the same address.
pub const RESEND_FLOOR_MINUTES: i64 = 10;

pub fn resend_floor() -> Duration {
    Duration::minutes(RESEND_FLOOR_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Email {
    pub id: i64,
    pub did: String,
    pub address: String,
    pub verified: bool,
    pub is_primary: bool,
    pub verification_code: Option<String>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    address: &str,
    verification_code: &str,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO emails (did, address, verification_code, last_sent_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT (did, address) DO NOTHING",
    )
    .bind(did)
    .bind(address)
    .bind(verification_code)
    .bind(now)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn get<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    address: &str,
) -> Result<Option<Email>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM emails WHERE did = ?1 AND address = ?2")
            .bind(did)
            .bind(address)
            .fetch_optional(exec)
            .await?,
    )
}

/// Consume a verification code. The code is single-use: a successful match
/// clears it and marks the address verified.
pub async fn verify<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    address: &str,
    code: &str,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "UPDATE emails SET verified = 1, verification_code = NULL
         WHERE did = ?1 AND address = ?2 AND verification_code = ?3",
    )
    .bind(did)
    .bind(address)
    .bind(code)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

/// Record a fresh code, refusing to resend within [`RESEND_FLOOR`].
pub async fn refresh_code<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    address: &str,
    code: &str,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    let floor = now - resend_floor();
    let done = sqlx::query(
        "UPDATE emails SET verification_code = ?3, last_sent_at = ?4
         WHERE did = ?1 AND address = ?2 AND verified = 0
           AND (last_sent_at IS NULL OR last_sent_at <= ?5)",
    )
    .bind(did)
    .bind(address)
    .bind(code)
    .bind(now)
    .bind(floor)
    .execute(exec)
    .await?;
    if done.rows_affected() == 0 {
        return Err(DbError::Conflict(format!(
            "verification for {address} resent within the {RESEND_FLOOR_MINUTES} minute floor"
        )));
    }
    Ok(())
}

/// Promote an address to primary, demoting any existing primary. Two
/// statements; run inside a transaction.
pub async fn set_primary(
    conn: &mut sqlx::SqliteConnection,
    did: &str,
    address: &str,
) -> Result<(), DbError> {
    sqlx::query("UPDATE emails SET is_primary = 0 WHERE did = ?1")
        .bind(did)
        .execute(&mut *conn)
        .await?;
    let done = sqlx::query(
        "UPDATE emails SET is_primary = 1 WHERE did = ?1 AND address = ?2 AND verified = 1",
    )
    .bind(did)
    .bind(address)
    .execute(&mut *conn)
    .await?;
    if done.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("verified email {address} for {did}")));
    }
    Ok(())
}

pub async fn get_primary<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<Option<Email>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM emails WHERE did = ?1 AND is_primary = 1")
            .bind(did)
            .fetch_optional(exec)
            .await?,
    )
}

pub async fn verified_for_did<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<Vec<Email>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM emails WHERE did = ?1 AND verified = 1 ORDER BY created_at")
            .bind(did)
            .fetch_all(exec)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn verification_code_is_single_use() {
        let db = Db::connect_in_memory().await.unwrap();
        insert(db.pool(), "did:plc:alice", "a@example.com", "123456", Utc::now())
            .await
            .unwrap();
        assert!(!verify(db.pool(), "did:plc:alice", "a@example.com", "nope").await.unwrap());
        assert!(verify(db.pool(), "did:plc:alice", "a@example.com", "123456").await.unwrap());
        // code cleared, cannot verify again with it
        assert!(!verify(db.pool(), "did:plc:alice", "a@example.com", "123456").await.unwrap());
    }

    #[tokio::test]
    async fn resend_floor_blocks_immediate_refresh() {
        let db = Db::connect_in_memory().await.unwrap();
        let now = Utc::now();
        insert(db.pool(), "did:plc:alice", "a@example.com", "111111", now).await.unwrap();
        let err = refresh_code(db.pool(), "did:plc:alice", "a@example.com", "222222", now)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        // past the floor the refresh goes through
        refresh_code(
            db.pool(),
            "did:plc:alice",
            "a@example.com",
            "222222",
            now + resend_floor() + Duration::seconds(1),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn only_one_primary_per_did() {
        let db = Db::connect_in_memory().await.unwrap();
        let now = Utc::now();
        for addr in ["a@example.com", "b@example.com"] {
            insert(db.pool(), "did:plc:alice", addr, "c", now).await.unwrap();
            verify(db.pool(), "did:plc:alice", addr, "c").await.unwrap();
        }
        let mut tx = db.begin().await.unwrap();
        set_primary(&mut tx, "did:plc:alice", "a@example.com").await.unwrap();
        set_primary(&mut tx, "did:plc:alice", "b@example.com").await.unwrap();
        tx.commit().await.unwrap();

        let primary = get_primary(db.pool(), "did:plc:alice").await.unwrap().unwrap();
        assert_eq!(primary.address, "b@example.com");
    }

    #[tokio::test]
    async fn unverified_address_cannot_become_primary() {
        let db = Db::connect_in_memory().await.unwrap();
        insert(db.pool(), "did:plc:alice", "a@example.com", "c", Utc::now()).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        assert!(matches!(
            set_primary(&mut tx, "did:plc:alice", "a@example.com").await.unwrap_err(),
            DbError::NotFound(_)
        ));
    }
}
