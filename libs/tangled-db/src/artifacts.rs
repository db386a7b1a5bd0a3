//! Release artifacts announced against a repo tag.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Artifact {
    pub id: i64,
    pub did: String,
    pub rkey: String,
    pub repo_at: String,
    pub tag: String,
    pub name: String,
    pub blob_cid: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    rkey: &str,
    repo_at: &str,
    tag: &str,
    name: &str,
    blob_cid: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO artifacts (did, rkey, repo_at, tag, name, blob_cid, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (did, rkey) DO NOTHING",
    )
    .bind(did)
    .bind(rkey)
    .bind(repo_at)
    .bind(tag)
    .bind(name)
    .bind(blob_cid)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn list_for_tag<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
    tag: &str,
) -> Result<Vec<Artifact>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM artifacts WHERE repo_at = ?1 AND tag = ?2 ORDER BY name")
            .bind(repo_at)
            .bind(tag)
            .fetch_all(exec)
            .await?,
    )
}

pub async fn delete<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    rkey: &str,
) -> Result<bool, DbError> {
    let done = sqlx::query("DELETE FROM artifacts WHERE did = ?1 AND rkey = ?2")
        .bind(did)
        .bind(rkey)
        .execute(exec)
        .await?;
    Ok(done.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn announce_is_idempotent() {
        let db = Db::connect_in_memory().await.unwrap();
        let repo = "at://did:plc:alice/sh.tangled.repo/core";
        assert!(
            insert(db.pool(), "did:plc:alice", "rk", repo, "v1.0", "core.tar.gz", None, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !insert(db.pool(), "did:plc:alice", "rk", repo, "v1.0", "core.tar.gz", None, Utc::now())
                .await
                .unwrap()
        );
        assert_eq!(list_for_tag(db.pool(), repo, "v1.0").await.unwrap().len(), 1);
    }
}
