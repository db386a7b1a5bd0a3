//! Issue, comment and state-event records. Numbering assignment happens in
//! the same transaction as the insert so replays cannot burn numbers.

use tangled_db::notifications::NotificationKind;
use tangled_db::{DbError, issues as issues_db, repos};
use tangled_types::collections;
use tangled_types::records::{IssueCommentRecord, IssueRecord, IssueState, IssueStateRecord};
use tangled_types::{Did, EventEnvelope};

use crate::notify::NotificationEvent;

use super::{EventCtx, IngestError, Ingester};

impl Ingester {
    pub(super) async fn ingest_issue(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<IssueRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?.clone();
        let at_uri = ctx.at_uri(collections::ISSUE)?;

        let inserted = {
            let mut tx = self.db.begin().await?;
            let number = issues_db::next_issue_id(&mut *tx, &record.repo.to_string()).await?;
            let inserted = issues_db::insert(
                &mut *tx,
                &issues_db::NewIssue {
                    at_uri: at_uri.to_string(),
                    repo_at: record.repo.to_string(),
                    did: author.as_str().to_owned(),
                    title: record.title.clone(),
                    body: record.body.clone(),
                    created_at: record.created_at,
                },
                number,
            )
            .await?;
            tx.commit().await.map_err(DbError::from)?;
            inserted
        };

        if inserted {
            // the repo may not have been observed yet; dangling is fine,
            // the notification is simply skipped
            if let Some(repo) = repos::get_by_at_uri(self.db.pool(), &record.repo.to_string()).await?
            {
                if let Ok(owner) = Did::new(repo.did) {
                    self.notifier
                        .notify(&NotificationEvent {
                            recipient: owner,
                            actor: author,
                            kind: NotificationKind::IssueOpened,
                            entity: Some(at_uri.to_string()),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    pub(super) async fn ingest_issue_comment(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<IssueCommentRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?.clone();
        let at_uri = ctx.at_uri(collections::ISSUE_COMMENT)?;

        let inserted = issues_db::insert_comment(
            self.db.pool(),
            &issues_db::IssueComment {
                id: 0,
                at_uri: at_uri.to_string(),
                issue_at: record.issue.to_string(),
                did: author.as_str().to_owned(),
                body: record.body.clone(),
                reply_to: record.reply_to.as_ref().map(ToString::to_string),
                created_at: record.created_at,
            },
        )
        .await?;

        if inserted {
            if let Some(issue) =
                issues_db::get_by_at_uri(self.db.pool(), &record.issue.to_string()).await?
            {
                if let Ok(issue_author) = Did::new(issue.did) {
                    self.notifier
                        .notify(&NotificationEvent {
                            recipient: issue_author,
                            actor: author,
                            kind: NotificationKind::IssueCommented,
                            entity: Some(record.issue.to_string()),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    pub(super) async fn ingest_issue_state(
        &self,
        _ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<IssueStateRecord>(envelope) else {
            return Ok(());
        };
        // unknown issues are tolerated; the state event may arrive first
        issues_db::set_open(
            self.db.pool(),
            &record.issue.to_string(),
            matches!(record.state, IssueState::Open),
        )
        .await?;
        Ok(())
    }
}
