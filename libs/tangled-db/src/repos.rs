//! Repository rows. `(did, name)` is unique per owner; `at_uri` is the
//! idempotency key under firehose replay.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Repo {
    pub id: i64,
    pub did: String,
    pub name: String,
    pub knot: String,
    pub rkey: String,
    pub at_uri: String,
    pub description: Option<String>,
    pub default_branch: Option<String>,
    pub source_at: Option<String>,
    pub spindle: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRepo {
    pub did: String,
    pub name: String,
    pub knot: String,
    pub rkey: String,
    pub at_uri: String,
    pub description: Option<String>,
    pub source_at: Option<String>,
    pub spindle: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert a repo; a replay of the same `at_uri` is a no-op. Returns whether
/// a row was actually written.
pub async fn insert<'e, E: SqliteExecutor<'e>>(exec: E, repo: &NewRepo) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO repos (did, name, knot, rkey, at_uri, description, source_at, spindle, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (at_uri) DO NOTHING",
    )
    .bind(&repo.did)
    .bind(&repo.name)
    .bind(&repo.knot)
    .bind(&repo.rkey)
    .bind(&repo.at_uri)
    .bind(&repo.description)
    .bind(&repo.source_at)
    .bind(&repo.spindle)
    .bind(repo.created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn get_by_at_uri<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
) -> Result<Option<Repo>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM repos WHERE at_uri = ?1")
        .bind(at_uri)
        .fetch_optional(exec)
        .await?)
}

pub async fn get_by_did_name<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    name: &str,
) -> Result<Option<Repo>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM repos WHERE did = ?1 AND name = ?2")
        .bind(did)
        .bind(name)
        .fetch_optional(exec)
        .await?)
}

pub async fn name_exists<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    name: &str,
) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repos WHERE did = ?1 AND name = ?2")
        .bind(did)
        .bind(name)
        .fetch_one(exec)
        .await?;
    Ok(count > 0)
}

pub async fn list_by_did<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<Vec<Repo>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM repos WHERE did = ?1 ORDER BY created_at DESC")
            .bind(did)
            .fetch_all(exec)
            .await?,
    )
}

pub async fn list_by_knot<'e, E: SqliteExecutor<'e>>(
    exec: E,
    knot: &str,
) -> Result<Vec<Repo>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM repos WHERE knot = ?1 ORDER BY name")
        .bind(knot)
        .fetch_all(exec)
        .await?)
}

/// Forks that name `source_at` as their source.
pub async fn list_forks_of<'e, E: SqliteExecutor<'e>>(
    exec: E,
    source_at: &str,
) -> Result<Vec<Repo>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM repos WHERE source_at = ?1")
        .bind(source_at)
        .fetch_all(exec)
        .await?)
}

pub async fn set_default_branch<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
    branch: &str,
) -> Result<(), DbError> {
    let done = sqlx::query("UPDATE repos SET default_branch = ?2 WHERE at_uri = ?1")
        .bind(at_uri)
        .bind(branch)
        .execute(exec)
        .await?;
    if done.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("repo {at_uri}")));
    }
    Ok(())
}

pub async fn delete_by_at_uri<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
) -> Result<bool, DbError> {
    let done = sqlx::query("DELETE FROM repos WHERE at_uri = ?1")
        .bind(at_uri)
        .execute(exec)
        .await?;
    Ok(done.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn new_repo(name: &str, at_uri: &str) -> NewRepo {
        NewRepo {
            did: "did:plc:alice".to_owned(),
            name: name.to_owned(),
            knot: "knot.example.com".to_owned(),
            rkey: "3jzfcijpj2z2a".to_owned(),
            at_uri: at_uri.to_owned(),
            description: None,
            source_at: None,
            spindle: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_at_uri() {
        let db = Db::connect_in_memory().await.unwrap();
        let repo = new_repo("core", "at://did:plc:alice/sh.tangled.repo/abc");
        assert!(insert(db.pool(), &repo).await.unwrap());
        assert!(!insert(db.pool(), &repo).await.unwrap());

        let fetched = get_by_did_name(db.pool(), "did:plc:alice", "core")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.knot, "knot.example.com");
    }

    #[tokio::test]
    async fn duplicate_name_for_same_owner_conflicts() {
        let db = Db::connect_in_memory().await.unwrap();
        insert(db.pool(), &new_repo("core", "at://did:plc:alice/sh.tangled.repo/a"))
            .await
            .unwrap();
        let err = insert(db.pool(), &new_repo("core", "at://did:plc:alice/sh.tangled.repo/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let db = Db::connect_in_memory().await.unwrap();
        let uri = "at://did:plc:alice/sh.tangled.repo/abc";
        insert(db.pool(), &new_repo("core", uri)).await.unwrap();
        assert!(delete_by_at_uri(db.pool(), uri).await.unwrap());
        assert!(!delete_by_at_uri(db.pool(), uri).await.unwrap());
    }
}
