//! Repo-scoped label definitions and their applications. Applications are
//! last-writer-wins per (subject, label): an add upserts, a remove deletes.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LabelDef {
    pub id: i64,
    pub at_uri: String,
    pub repo_at: String,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_def<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
    repo_at: &str,
    name: &str,
    color: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "INSERT INTO labels (at_uri, repo_at, name, color, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (at_uri) DO NOTHING",
    )
    .bind(at_uri)
    .bind(repo_at)
    .bind(name)
    .bind(color)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn get_def<'e, E: SqliteExecutor<'e>>(
    exec: E,
    at_uri: &str,
) -> Result<Option<LabelDef>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM labels WHERE at_uri = ?1")
        .bind(at_uri)
        .fetch_optional(exec)
        .await?)
}

pub async fn list_defs_for_repo<'e, E: SqliteExecutor<'e>>(
    exec: E,
    repo_at: &str,
) -> Result<Vec<LabelDef>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM labels WHERE repo_at = ?1 ORDER BY name")
        .bind(repo_at)
        .fetch_all(exec)
        .await?)
}

pub async fn apply<'e, E: SqliteExecutor<'e>>(
    exec: E,
    subject_at: &str,
    label_at: &str,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO label_applications (subject_at, label_at, created_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (subject_at, label_at) DO NOTHING",
    )
    .bind(subject_at)
    .bind(label_at)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn unapply<'e, E: SqliteExecutor<'e>>(
    exec: E,
    subject_at: &str,
    label_at: &str,
) -> Result<bool, DbError> {
    let done =
        sqlx::query("DELETE FROM label_applications WHERE subject_at = ?1 AND label_at = ?2")
            .bind(subject_at)
            .bind(label_at)
            .execute(exec)
            .await?;
    Ok(done.rows_affected() > 0)
}

/// Drop every definition a repo owns, plus their applications.
pub async fn delete_for_repo(
    conn: &mut sqlx::SqliteConnection,
    repo_at: &str,
) -> Result<u64, DbError> {
    let applications = sqlx::query(
        "DELETE FROM label_applications
         WHERE label_at IN (SELECT at_uri FROM labels WHERE repo_at = ?1)",
    )
    .bind(repo_at)
    .execute(&mut *conn)
    .await?;
    let defs = sqlx::query("DELETE FROM labels WHERE repo_at = ?1")
        .bind(repo_at)
        .execute(&mut *conn)
        .await?;
    Ok(applications.rows_affected() + defs.rows_affected())
}

pub async fn labels_on_subject<'e, E: SqliteExecutor<'e>>(
    exec: E,
    subject_at: &str,
) -> Result<Vec<LabelDef>, DbError> {
    Ok(sqlx::query_as(
        "SELECT l.* FROM labels l
         JOIN label_applications a ON a.label_at = l.at_uri
         WHERE a.subject_at = ?1
         ORDER BY l.name",
    )
    .bind(subject_at)
    .fetch_all(exec)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn apply_remove_cycle() {
        let db = Db::connect_in_memory().await.unwrap();
        let def = "at://did:plc:alice/sh.tangled.label.definition/bug";
        let issue = "at://did:plc:alice/sh.tangled.repo.issue/3k";
        insert_def(db.pool(), def, "at://did:plc:alice/sh.tangled.repo/core", "bug", None, Utc::now())
            .await
            .unwrap();

        apply(db.pool(), issue, def, Utc::now()).await.unwrap();
        apply(db.pool(), issue, def, Utc::now()).await.unwrap(); // replay
        assert_eq!(labels_on_subject(db.pool(), issue).await.unwrap().len(), 1);

        assert!(unapply(db.pool(), issue, def).await.unwrap());
        assert!(labels_on_subject(db.pool(), issue).await.unwrap().is_empty());
    }
}
