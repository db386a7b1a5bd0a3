//! Directed social edges: follows, stars, reactions. At most one edge per
//! (actor, subject[, kind]); inserts are idempotent on the edge key.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Follow {
    pub id: i64,
    pub did: String,
    pub subject_did: String,
    pub rkey: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Star {
    pub id: i64,
    pub did: String,
    pub subject_at: String,
    pub rkey: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Reaction {
    pub id: i64,
    pub did: String,
    pub subject_at: String,
    pub kind: String,
    pub rkey: String,
    pub created_at: DateTime<Utc>,
}

// ── follows ──────────────────────────────────────────────────────────

pub async fn insert_follow<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_did: &str,
    rkey: &str,
    created_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO follows (did, subject_did, rkey, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (did, subject_did) DO NOTHING",
    )
    .bind(did)
    .bind(subject_did)
    .bind(rkey)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn delete_follow<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_did: &str,
) -> Result<bool, DbError> {
    let done = sqlx::query("DELETE FROM follows WHERE did = ?1 AND subject_did = ?2")
        .bind(did)
        .bind(subject_did)
        .execute(exec)
        .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn follow_exists<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_did: &str,
) -> Result<bool, DbError> {
    let n: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE did = ?1 AND subject_did = ?2")
            .bind(did)
            .bind(subject_did)
            .fetch_one(exec)
            .await?;
    Ok(n > 0)
}

pub async fn get_follow<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_did: &str,
) -> Result<Option<Follow>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM follows WHERE did = ?1 AND subject_did = ?2")
            .bind(did)
            .bind(subject_did)
            .fetch_optional(exec)
            .await?,
    )
}

pub async fn count_followers<'e, E: SqliteExecutor<'e>>(
    exec: E,
    subject_did: &str,
) -> Result<i64, DbError> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE subject_did = ?1")
            .bind(subject_did)
            .fetch_one(exec)
            .await?,
    )
}

pub async fn count_following<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<i64, DbError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE did = ?1")
        .bind(did)
        .fetch_one(exec)
        .await?)
}

// ── stars ────────────────────────────────────────────────────────────

pub async fn insert_star<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_at: &str,
    rkey: &str,
    created_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO stars (did, subject_at, rkey, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (did, subject_at) DO NOTHING",
    )
    .bind(did)
    .bind(subject_at)
    .bind(rkey)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn delete_star<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_at: &str,
) -> Result<bool, DbError> {
    let done = sqlx::query("DELETE FROM stars WHERE did = ?1 AND subject_at = ?2")
        .bind(did)
        .bind(subject_at)
        .execute(exec)
        .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn get_star<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_at: &str,
) -> Result<Option<Star>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM stars WHERE did = ?1 AND subject_at = ?2")
            .bind(did)
            .bind(subject_at)
            .fetch_optional(exec)
            .await?,
    )
}

pub async fn count_stars<'e, E: SqliteExecutor<'e>>(
    exec: E,
    subject_at: &str,
) -> Result<i64, DbError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM stars WHERE subject_at = ?1")
        .bind(subject_at)
        .fetch_one(exec)
        .await?)
}

pub async fn delete_stars_of_subject<'e, E: SqliteExecutor<'e>>(
    exec: E,
    subject_at: &str,
) -> Result<u64, DbError> {
    let done = sqlx::query("DELETE FROM stars WHERE subject_at = ?1")
        .bind(subject_at)
        .execute(exec)
        .await?;
    Ok(done.rows_affected())
}

// ── reactions ────────────────────────────────────────────────────────

pub async fn insert_reaction<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_at: &str,
    kind: &str,
    rkey: &str,
    created_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO reactions (did, subject_at, kind, rkey, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (did, subject_at, kind) DO NOTHING",
    )
    .bind(did)
    .bind(subject_at)
    .bind(kind)
    .bind(rkey)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn delete_reaction<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    subject_at: &str,
    kind: &str,
) -> Result<bool, DbError> {
    let done =
        sqlx::query("DELETE FROM reactions WHERE did = ?1 AND subject_at = ?2 AND kind = ?3")
            .bind(did)
            .bind(subject_at)
            .bind(kind)
            .execute(exec)
            .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn list_reactions<'e, E: SqliteExecutor<'e>>(
    exec: E,
    subject_at: &str,
) -> Result<Vec<Reaction>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM reactions WHERE subject_at = ?1 ORDER BY created_at")
            .bind(subject_at)
            .fetch_all(exec)
            .await?,
    )
}
