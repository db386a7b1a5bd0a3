//! SSH public keys bound to a DID, surfaced through the plain-text
//! authorized-keys endpoint and pushed to knots on collaborator add.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PublicKey {
    pub id: i64,
    pub did: String,
    pub rkey: String,
    pub name: Option<String>,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    rkey: &str,
    name: Option<&str>,
    key: &str,
    created_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO public_keys (did, rkey, name, key, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (did, key) DO NOTHING",
    )
    .bind(did)
    .bind(rkey)
    .bind(name)
    .bind(key)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn delete_by_rkey<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    rkey: &str,
) -> Result<bool, DbError> {
    let done = sqlx::query("DELETE FROM public_keys WHERE did = ?1 AND rkey = ?2")
        .bind(did)
        .bind(rkey)
        .execute(exec)
        .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn list_for_did<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<Vec<PublicKey>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM public_keys WHERE did = ?1 ORDER BY created_at")
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
    async fn same_key_material_is_deduplicated() {
        let db = Db::connect_in_memory().await.unwrap();
        let key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIF tangled@laptop";
        assert!(insert(db.pool(), "did:plc:alice", "rk1", Some("laptop"), key, Utc::now())
            .await
            .unwrap());
        assert!(!insert(db.pool(), "did:plc:alice", "rk2", None, key, Utc::now())
            .await
            .unwrap());
        assert_eq!(list_for_did(db.pool(), "did:plc:alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_by_record_key() {
        let db = Db::connect_in_memory().await.unwrap();
        insert(db.pool(), "did:plc:alice", "rk1", None, "ssh-ed25519 AAA", Utc::now())
            .await
            .unwrap();
        assert!(delete_by_rkey(db.pool(), "did:plc:alice", "rk1").await.unwrap());
        assert!(list_for_did(db.pool(), "did:plc:alice").await.unwrap().is_empty());
    }
}
