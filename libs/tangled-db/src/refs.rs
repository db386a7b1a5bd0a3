//! Git ref updates observed on knot streams. The `(knot, rkey)` key makes
//! replay detection cheap: punch accrual happens only on first sight.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefUpdate {
    pub id: i64,
    pub knot: String,
    pub rkey: String,
    pub committer_did: String,
    pub repo_did: String,
    pub repo_name: String,
    pub ref_name: String,
    pub new_sha: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRefUpdate {
    pub knot: String,
    pub rkey: String,
    pub committer_did: String,
    pub repo_did: String,
    pub repo_name: String,
    pub ref_name: String,
    pub new_sha: String,
    pub created_at: DateTime<Utc>,
}

/// Returns whether this is the first observation of the event.
pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    update: &NewRefUpdate,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO ref_updates
             (knot, rkey, committer_did, repo_did, repo_name, ref_name, new_sha, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (knot, rkey) DO NOTHING",
    )
    .bind(&update.knot)
    .bind(&update.rkey)
    .bind(&update.committer_did)
    .bind(&update.repo_did)
    .bind(&update.repo_name)
    .bind(&update.ref_name)
    .bind(&update.new_sha)
    .bind(update.created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn recent<'e, E: SqliteExecutor<'e>>(
    exec: E,
    limit: i64,
) -> Result<Vec<RefUpdate>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM ref_updates ORDER BY created_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(exec)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn replays_are_detected() {
        let db = Db::connect_in_memory().await.unwrap();
        let update = NewRefUpdate {
            knot: "knot.example.com".to_owned(),
            rkey: "3jz".to_owned(),
            committer_did: "did:plc:alice".to_owned(),
            repo_did: "did:plc:alice".to_owned(),
            repo_name: "core".to_owned(),
            ref_name: "refs/heads/main".to_owned(),
            new_sha: "deadbeef".to_owned(),
            created_at: Utc::now(),
        };
        assert!(insert(db.pool(), &update).await.unwrap());
        assert!(!insert(db.pool(), &update).await.unwrap());
        assert_eq!(recent(db.pool(), 10).await.unwrap().len(), 1);
    }
}
