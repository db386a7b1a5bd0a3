//! Notification rows and per-recipient preference flags.
//!
//! The store is deliberately dumb: suppression (actor == recipient) and
//! preference gating are the notifier's job, upstream of these inserts. A
//! CHECK-style guard on self-notification is still kept here as the last
//! line of the invariant.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

/// Notification kinds, stored as their snake_case names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Followed,
    RepoStarred,
    IssueOpened,
    IssueCommented,
    PullOpened,
    PullResubmitted,
    PullMerged,
    PullClosed,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Followed => "followed",
            Self::RepoStarred => "repo_starred",
            Self::IssueOpened => "issue_opened",
            Self::IssueCommented => "issue_commented",
            Self::PullOpened => "pull_opened",
            Self::PullResubmitted => "pull_resubmitted",
            Self::PullMerged => "pull_merged",
            Self::PullClosed => "pull_closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub recipient_did: String,
    pub actor_did: String,
    pub kind: String,
    pub entity_at: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Preferences {
    pub did: String,
    pub followed: bool,
    pub repo_starred: bool,
    pub issue_opened: bool,
    pub issue_commented: bool,
    pub pull_opened: bool,
    pub pull_resubmitted: bool,
    pub pull_merged: bool,
}

impl Preferences {
    pub fn default_for(did: &str) -> Self {
        Self {
            did: did.to_owned(),
            followed: true,
            repo_starred: true,
            issue_opened: true,
            issue_commented: true,
            pull_opened: true,
            pull_resubmitted: true,
            pull_merged: true,
        }
    }

    /// Whether `kind` is enabled. `pull_closed` reuses the `pull_merged`
    /// flag for now.
    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Followed => self.followed,
            NotificationKind::RepoStarred => self.repo_starred,
            NotificationKind::IssueOpened => self.issue_opened,
            NotificationKind::IssueCommented => self.issue_commented,
            NotificationKind::PullOpened => self.pull_opened,
            NotificationKind::PullResubmitted => self.pull_resubmitted,
            NotificationKind::PullMerged | NotificationKind::PullClosed => self.pull_merged,
        }
    }
}

pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    recipient_did: &str,
    actor_did: &str,
    kind: NotificationKind,
    entity_at: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    if recipient_did == actor_did {
        return Err(DbError::Integrity(
            "self-notification must be suppressed upstream".to_owned(),
        ));
    }
    sqlx::query(
        "INSERT INTO notifications (recipient_did, actor_did, kind, entity_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(recipient_did)
    .bind(actor_did)
    .bind(kind.as_str())
    .bind(entity_at)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn list_for_recipient<'e, E: SqliteExecutor<'e>>(
    exec: E,
    recipient_did: &str,
    unread_only: bool,
) -> Result<Vec<Notification>, DbError> {
    let rows = if unread_only {
        sqlx::query_as(
            "SELECT * FROM notifications
             WHERE recipient_did = ?1 AND is_read = 0 ORDER BY created_at DESC",
        )
        .bind(recipient_did)
        .fetch_all(exec)
        .await?
    } else {
        sqlx::query_as(
            "SELECT * FROM notifications WHERE recipient_did = ?1 ORDER BY created_at DESC",
        )
        .bind(recipient_did)
        .fetch_all(exec)
        .await?
    };
    Ok(rows)
}

pub async fn mark_all_read<'e, E: SqliteExecutor<'e>>(
    exec: E,
    recipient_did: &str,
) -> Result<u64, DbError> {
    let done = sqlx::query("UPDATE notifications SET is_read = 1 WHERE recipient_did = ?1")
        .bind(recipient_did)
        .execute(exec)
        .await?;
    Ok(done.rows_affected())
}

/// Stored preferences, or the all-on default when the DID never saved any.
pub async fn preferences<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<Preferences, DbError> {
    let row: Option<Preferences> =
        sqlx::query_as("SELECT * FROM notification_prefs WHERE did = ?1")
            .bind(did)
            .fetch_optional(exec)
            .await?;
    Ok(row.unwrap_or_else(|| Preferences::default_for(did)))
}

pub async fn save_preferences<'e, E: SqliteExecutor<'e>>(
    exec: E,
    prefs: &Preferences,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO notification_prefs
             (did, followed, repo_starred, issue_opened, issue_commented,
              pull_opened, pull_resubmitted, pull_merged)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (did) DO UPDATE SET
             followed = excluded.followed,
             repo_starred = excluded.repo_starred,
             issue_opened = excluded.issue_opened,
             issue_commented = excluded.issue_commented,
             pull_opened = excluded.pull_opened,
             pull_resubmitted = excluded.pull_resubmitted,
             pull_merged = excluded.pull_merged",
    )
    .bind(&prefs.did)
    .bind(prefs.followed)
    .bind(prefs.repo_starred)
    .bind(prefs.issue_opened)
    .bind(prefs.issue_commented)
    .bind(prefs.pull_opened)
    .bind(prefs.pull_resubmitted)
    .bind(prefs.pull_merged)
    .execute(exec)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn self_notification_is_rejected() {
        let db = Db::connect_in_memory().await.unwrap();
        let err = insert(
            db.pool(),
            "did:plc:alice",
            "did:plc:alice",
            NotificationKind::Followed,
            None,
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::Integrity(_)));
    }

    #[tokio::test]
    async fn unread_listing_and_mark_read() {
        let db = Db::connect_in_memory().await.unwrap();
        insert(db.pool(), "did:plc:bob", "did:plc:alice", NotificationKind::Followed, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(list_for_recipient(db.pool(), "did:plc:bob", true).await.unwrap().len(), 1);
        assert_eq!(mark_all_read(db.pool(), "did:plc:bob").await.unwrap(), 1);
        assert!(list_for_recipient(db.pool(), "did:plc:bob", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pull_closed_follows_the_merged_flag() {
        let mut prefs = Preferences::default_for("did:plc:bob");
        prefs.pull_merged = false;
        assert!(!prefs.allows(NotificationKind::PullClosed));
        assert!(prefs.allows(NotificationKind::Followed));
    }

    #[tokio::test]
    async fn missing_prefs_default_to_all_on() {
        let db = Db::connect_in_memory().await.unwrap();
        let prefs = preferences(db.pool(), "did:plc:bob").await.unwrap();
        assert!(prefs.allows(NotificationKind::IssueOpened));

        let mut stored = prefs;
        stored.issue_opened = false;
        save_preferences(db.pool(), &stored).await.unwrap();
        let reread = preferences(db.pool(), "did:plc:bob").await.unwrap();
        assert!(!reread.allows(NotificationKind::IssueOpened));
    }
}
