//! Pulls and their append-only submission history.
//!
//! Invariants: `pull_id` is dense within a repo; round 0 exists for every
//! pull; the active patch is the highest round.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

pub const STATE_OPEN: &str = "open";
pub const STATE_CLOSED: &str = "closed";
pub const STATE_MERGED: &str = "merged";

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Pull {
    pub id: i64,
    pub at_uri: String,
    pub repo_at: String,
    pub pull_id: i64,
    pub did: String,
    pub title: String,
    pub body: Option<String>,
    pub target_branch: String,
    pub state: String,
    pub source_branch: Option<String>,
    pub source_repo_at: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Pull {
    pub fn is_open(&self) -> bool {
        self.state == STATE_OPEN
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PullSubmission {
    pub id: i64,
    pub pull_at: String,
    pub round: i64,
    pub patch: String,
    pub source_rev: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPull {
    pub at_uri: String,
    pub repo_at: String,
    pub did: String,
    pub title: String,
    pub body: Option<String>,
    pub target_branch: String,
    pub source_branch: Option<String>,
    pub source_repo_at: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn next_pull_id<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
) -> Result<i64, DbError> {
    let max: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(pull_id), 0) FROM pulls WHERE repo_at = ?1")
            .bind(repo_at)
            .fetch_one(exec)
            .await?;
    Ok(max + 1)
}

/// Insert the pull row itself. Round 0 must be inserted by the caller in the
/// same transaction via [`insert_submission`].
pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pull: &NewPull,
    pull_id: i64,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO pulls
             (at_uri, repo_at, pull_id, did, title, body, target_branch, state,
              source_branch, source_repo_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open', ?8, ?9, ?10)
         ON CONFLICT (at_uri) DO NOTHING",
    )
    .bind(&pull.at_uri)
    .bind(&pull.repo_at)
    .bind(pull_id)
    .bind(&pull.did)
    .bind(&pull.title)
    .bind(&pull.body)
    .bind(&pull.target_branch)
    .bind(&pull.source_branch)
    .bind(&pull.source_repo_at)
    .bind(pull.created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn get_by_at_uri<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
) -> Result<Option<Pull>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM pulls WHERE at_uri = ?1")
        .bind(at_uri)
        .fetch_optional(exec)
        .await?)
}

pub async fn get_by_number<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
    pull_id: i64,
) -> Result<Option<Pull>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM pulls WHERE repo_at = ?1 AND pull_id = ?2")
            .bind(repo_at)
            .bind(pull_id)
            .fetch_optional(exec)
            .await?,
    )
}

pub async fn list_for_repo<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
) -> Result<Vec<Pull>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM pulls WHERE repo_at = ?1 ORDER BY pull_id DESC")
            .bind(repo_at)
            .fetch_all(exec)
            .await?,
    )
}

pub async fn set_state<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
    state: &str,
) -> Result<(), DbError> {
    let done = sqlx::query("UPDATE pulls SET state = ?2 WHERE at_uri = ?1")
        .bind(at_uri)
        .bind(state)
        .execute(exec)
        .await?;
    if done.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("pull {at_uri}")));
    }
    Ok(())
}

/// Append a submission at an explicit round. Replays of an existing round
/// are no-ops so firehose echo cannot double-append.
pub async fn insert_submission<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pull_at: &str,
    round: i64,
    patch: &str,
    source_rev: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO pull_submissions (pull_at, round, patch, source_rev, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (pull_at, round) DO NOTHING",
    )
    .bind(pull_at)
    .bind(round)
    .bind(patch)
    .bind(source_rev)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

/// The latest (active) submission.
pub async fn last_submission<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pull_at: &str,
) -> Result<Option<PullSubmission>, DbError> {
    Ok(sqlx::query_as(
        "SELECT * FROM pull_submissions WHERE pull_at = ?1 ORDER BY round DESC LIMIT 1",
    )
    .bind(pull_at)
    .fetch_optional(exec)
    .await?)
}

pub async fn list_submissions<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pull_at: &str,
) -> Result<Vec<PullSubmission>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM pull_submissions WHERE pull_at = ?1 ORDER BY round")
            .bind(pull_at)
            .fetch_all(exec)
            .await?,
    )
}

pub async fn count_submissions<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pull_at: &str,
) -> Result<i64, DbError> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM pull_submissions WHERE pull_at = ?1")
            .bind(pull_at)
            .fetch_one(exec)
            .await?,
    )
}

pub async fn delete_for_repo(
    conn: &mut sqlx::SqliteConnection,
    repo_at: &str,
) -> Result<u64, DbError> {
    let done = sqlx::query(
        "DELETE FROM pull_submissions WHERE pull_at IN (SELECT at_uri FROM pulls WHERE repo_at = ?1)",
    )
    .bind(repo_at)
    .execute(&mut *conn)
    .await?;
    let pulls = sqlx::query("DELETE FROM pulls WHERE repo_at = ?1")
        .bind(repo_at)
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected() + pulls.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn new_pull(rkey: &str) -> NewPull {
        NewPull {
            at_uri: format!("at://did:plc:bob/sh.tangled.repo.pull/{rkey}"),
            repo_at: "at://did:plc:alice/sh.tangled.repo/core".to_owned(),
            did: "did:plc:bob".to_owned(),
            title: "fix".to_owned(),
            body: None,
            target_branch: "main".to_owned(),
            source_branch: None,
            source_repo_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn round_zero_then_resubmits() {
        let db = Db::connect_in_memory().await.unwrap();
        let pull = new_pull("a");
        insert(db.pool(), &pull, 1).await.unwrap();
        insert_submission(db.pool(), &pull.at_uri, 0, "diff --git a b", None, Utc::now())
            .await
            .unwrap();
        insert_submission(db.pool(), &pull.at_uri, 1, "diff --git a c", Some("beef"), Utc::now())
            .await
            .unwrap();

        let last = last_submission(db.pool(), &pull.at_uri).await.unwrap().unwrap();
        assert_eq!(last.round, 1);
        assert_eq!(last.source_rev.as_deref(), Some("beef"));
        assert_eq!(count_submissions(db.pool(), &pull.at_uri).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replayed_round_is_ignored() {
        let db = Db::connect_in_memory().await.unwrap();
        let pull = new_pull("a");
        insert(db.pool(), &pull, 1).await.unwrap();
        assert!(
            insert_submission(db.pool(), &pull.at_uri, 0, "diff --git", None, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !insert_submission(db.pool(), &pull.at_uri, 0, "other", None, Utc::now())
                .await
                .unwrap()
        );
        let last = last_submission(db.pool(), &pull.at_uri).await.unwrap().unwrap();
        assert_eq!(last.patch, "diff --git");
    }

    #[tokio::test]
    async fn state_transitions() {
        let db = Db::connect_in_memory().await.unwrap();
        let pull = new_pull("a");
        insert(db.pool(), &pull, 1).await.unwrap();
        set_state(db.pool(), &pull.at_uri, STATE_MERGED).await.unwrap();
        let row = get_by_at_uri(db.pool(), &pull.at_uri).await.unwrap().unwrap();
        assert_eq!(row.state, STATE_MERGED);
        assert!(!row.is_open());
    }
}
