//! Spindle registrations: symmetric to knot registrations, minus the
//! shared-secret bootstrap (spindles verify by `/owner` proof alone).

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Spindle {
    pub id: i64,
    pub domain: String,
    pub did: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn create<'e, E: SqliteExecutor<'e>>(
    exec: E,
    domain: &str,
    did: &str,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query("INSERT INTO spindles (domain, did, created_at) VALUES (?1, ?2, ?3)")
        .bind(domain)
        .bind(did)
        .bind(created_at)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn get_by_domain<'e, E: SqliteExecutor<'e>>(
    exec: E,
    domain: &str,
) -> Result<Option<Spindle>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM spindles WHERE domain = ?1")
        .bind(domain)
        .fetch_optional(exec)
        .await?)
}

pub async fn mark_verified<'e, E: SqliteExecutor<'e>>(
    exec: E,
    domain: &str,
) -> Result<(), DbError> {
    let done = sqlx::query("UPDATE spindles SET verified = 1 WHERE domain = ?1")
        .bind(domain)
        .execute(exec)
        .await?;
    if done.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("spindle {domain}")));
    }
    Ok(())
}

pub async fn list_verified<'e, E: SqliteExecutor<'e>>(exec: E) -> Result<Vec<Spindle>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM spindles WHERE verified = 1 ORDER BY domain")
            .fetch_all(exec)
            .await?,
    )
}

pub async fn delete<'e, E: SqliteExecutor<'e>>(exec: E, domain: &str) -> Result<bool, DbError> {
    let done = sqlx::query("DELETE FROM spindles WHERE domain = ?1")
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
    async fn verify_gates_the_source_set() {
        let db = Db::connect_in_memory().await.unwrap();
        create(db.pool(), "ci.example.com", "did:plc:alice", Utc::now()).await.unwrap();
        assert!(list_verified(db.pool()).await.unwrap().is_empty());
        mark_verified(db.pool(), "ci.example.com").await.unwrap();
        assert_eq!(list_verified(db.pool()).await.unwrap().len(), 1);
    }
}
