//! Snippet strings: standalone pastable records indexed per author.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Snippet {
    pub id: i64,
    pub did: String,
    pub rkey: String,
    pub filename: String,
    pub contents: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn upsert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    rkey: &str,
    filename: &str,
    contents: &str,
    description: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO strings (did, rkey, filename, contents, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (did, rkey) DO UPDATE SET
             filename = excluded.filename,
             contents = excluded.contents,
             description = excluded.description",
    )
    .bind(did)
    .bind(rkey)
    .bind(filename)
    .bind(contents)
    .bind(description)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    rkey: &str,
) -> Result<Option<Snippet>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM strings WHERE did = ?1 AND rkey = ?2")
            .bind(did)
            .bind(rkey)
            .fetch_optional(exec)
            .await?,
    )
}

pub async fn list_for_did<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<Vec<Snippet>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM strings WHERE did = ?1 ORDER BY created_at DESC")
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
    async fn edits_replace_contents() {
        let db = Db::connect_in_memory().await.unwrap();
        upsert(db.pool(), "did:plc:alice", "rk", "main.rs", "fn main() {}", None, Utc::now())
            .await
            .unwrap();
        upsert(db.pool(), "did:plc:alice", "rk", "main.rs", "fn main() { run() }", None, Utc::now())
            .await
            .unwrap();
        let snippet = get(db.pool(), "did:plc:alice", "rk").await.unwrap().unwrap();
        assert_eq!(snippet.contents, "fn main() { run() }");
        assert_eq!(list_for_did(db.pool(), "did:plc:alice").await.unwrap().len(), 1);
    }
}
