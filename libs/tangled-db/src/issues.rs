//! Issues and their comments. Issues are numbered per repo with a dense
//! monotonic counter; comments are ordered by their TID rkey.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Issue {
    pub id: i64,
    pub at_uri: String,
    pub repo_at: String,
    pub issue_id: i64,
    pub did: String,
    pub title: String,
    pub body: Option<String>,
    pub open: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct IssueComment {
    pub id: i64,
    pub at_uri: String,
    pub issue_at: String,
    pub did: String,
    pub body: String,
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub at_uri: String,
    pub repo_at: String,
    pub did: String,
    pub title: String,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The next dense issue number for a repo.
pub async fn next_issue_id<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
) -> Result<i64, DbError> {
    let max: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(issue_id), 0) FROM issues WHERE repo_at = ?1")
            .bind(repo_at)
            .fetch_one(exec)
            .await?;
    Ok(max + 1)
}

/// Insert an issue under a caller-chosen number. Replays of the same
/// `at_uri` are no-ops; returns whether a row was written.
pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    issue: &NewIssue,
    issue_id: i64,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO issues (at_uri, repo_at, issue_id, did, title, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (at_uri) DO NOTHING",
    )
    .bind(&issue.at_uri)
    .bind(&issue.repo_at)
    .bind(issue_id)
    .bind(&issue.did)
    .bind(&issue.title)
    .bind(&issue.body)
    .bind(issue.created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn get_by_at_uri<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
) -> Result<Option<Issue>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM issues WHERE at_uri = ?1")
        .bind(at_uri)
        .fetch_optional(exec)
        .await?)
}

pub async fn get_by_number<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
    issue_id: i64,
) -> Result<Option<Issue>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM issues WHERE repo_at = ?1 AND issue_id = ?2")
            .bind(repo_at)
            .bind(issue_id)
            .fetch_optional(exec)
            .await?,
    )
}

pub async fn list_for_repo<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
    open: Option<bool>,
) -> Result<Vec<Issue>, DbError> {
    let rows = match open {
        Some(open) => {
            sqlx::query_as(
                "SELECT * FROM issues WHERE repo_at = ?1 AND open = ?2 ORDER BY issue_id DESC",
            )
            .bind(repo_at)
            .bind(open)
            .fetch_all(exec)
            .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM issues WHERE repo_at = ?1 ORDER BY issue_id DESC")
                .bind(repo_at)
                .fetch_all(exec)
                .await?
        }
    };
    Ok(rows)
}

/// Apply a close/reopen event. Missing issues are tolerated (the event may
/// precede the issue record); returns whether a row changed.
pub async fn set_open<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
    open: bool,
) -> Result<bool, DbError> {
    let done = sqlx::query("UPDATE issues SET open = ?2 WHERE at_uri = ?1")
        .bind(at_uri)
        .bind(open)
        .execute(exec)
        .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn delete_for_repo<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
) -> Result<u64, DbError> {
    let done = sqlx::query("DELETE FROM issues WHERE repo_at = ?1")
        .bind(repo_at)
        .execute(exec)
        .await?;
    Ok(done.rows_affected())
}

pub async fn insert_comment<'e, E: SqliteExecutor<'e>>(
    exec: E,
    comment: &IssueComment,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO issue_comments (at_uri, issue_at, did, body, reply_to, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (at_uri) DO NOTHING",
    )
    .bind(&comment.at_uri)
    .bind(&comment.issue_at)
    .bind(&comment.did)
    .bind(&comment.body)
    .bind(&comment.reply_to)
    .bind(comment.created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

/// Comments in rkey order: rkeys are TIDs, so lexicographic order is
/// chronological mint order.
pub async fn list_comments<'e, E: SqliteExecutor<'e>>(
    exec: E,
    issue_at: &str,
) -> Result<Vec<IssueComment>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM issue_comments WHERE issue_at = ?1 ORDER BY at_uri")
            .bind(issue_at)
            .fetch_all(exec)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn new_issue(rkey: &str, title: &str) -> NewIssue {
        NewIssue {
            at_uri: format!("at://did:plc:alice/sh.tangled.repo.issue/{rkey}"),
            repo_at: "at://did:plc:alice/sh.tangled.repo/core".to_owned(),
            did: "did:plc:alice".to_owned(),
            title: title.to_owned(),
            body: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn issue_numbers_are_dense_per_repo() {
        let db = Db::connect_in_memory().await.unwrap();
        for (i, rkey) in ["a", "b", "c"].iter().enumerate() {
            let n = next_issue_id(db.pool(), "at://did:plc:alice/sh.tangled.repo/core")
                .await
                .unwrap();
            assert_eq!(n, i as i64 + 1);
            insert(db.pool(), &new_issue(rkey, "t"), n).await.unwrap();
        }
    }

    #[tokio::test]
    async fn replay_does_not_duplicate() {
        let db = Db::connect_in_memory().await.unwrap();
        let issue = new_issue("a", "t");
        assert!(insert(db.pool(), &issue, 1).await.unwrap());
        assert!(!insert(db.pool(), &issue, 2).await.unwrap());
        assert!(
            get_by_number(db.pool(), &issue.repo_at, 2)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn close_then_reopen() {
        let db = Db::connect_in_memory().await.unwrap();
        let issue = new_issue("a", "t");
        insert(db.pool(), &issue, 1).await.unwrap();

        assert!(set_open(db.pool(), &issue.at_uri, false).await.unwrap());
        let row = get_by_at_uri(db.pool(), &issue.at_uri).await.unwrap().unwrap();
        assert!(!row.open);

        assert!(set_open(db.pool(), &issue.at_uri, true).await.unwrap());
        // state events for unknown issues are tolerated
        assert!(!set_open(db.pool(), "at://x/y/z", false).await.unwrap());
    }
}
