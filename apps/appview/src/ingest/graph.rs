//! Social-graph records. Notifications fire only when a row was actually
//! written, so echoes of writes this appview originated (which already
//! notified) stay silent.

use tangled_db::graph as graph_db;
use tangled_db::notifications::NotificationKind;
use tangled_types::records::{FollowRecord, ReactionRecord, StarRecord};
use tangled_types::EventEnvelope;

use crate::notify::NotificationEvent;

use super::{EventCtx, IngestError, Ingester};

impl Ingester {
    pub(super) async fn ingest_follow(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<FollowRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;

        let inserted = graph_db::insert_follow(
            self.db.pool(),
            author.as_str(),
            record.subject.as_str(),
            &ctx.rkey,
            record.created_at,
        )
        .await?;

        if inserted {
            self.notifier
                .notify(&NotificationEvent {
                    recipient: record.subject.clone(),
                    actor: author.clone(),
                    kind: NotificationKind::Followed,
                    entity: None,
                })
                .await;
        }
        Ok(())
    }

    pub(super) async fn ingest_star(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<StarRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        let subject = self.canonical_subject(&record.subject).await;

        let inserted = graph_db::insert_star(
            self.db.pool(),
            author.as_str(),
            &subject,
            &ctx.rkey,
            record.created_at,
        )
        .await?;

        if inserted {
            if let Some(owner) = record.subject.authority_did() {
                self.notifier
                    .notify(&NotificationEvent {
                        recipient: owner,
                        actor: author.clone(),
                        kind: NotificationKind::RepoStarred,
                        entity: Some(record.subject.to_string()),
                    })
                    .await;
            }
        }
        Ok(())
    }

    pub(super) async fn ingest_reaction(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<ReactionRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        let subject = self.canonical_subject(&record.subject).await;

        graph_db::insert_reaction(
            self.db.pool(),
            author.as_str(),
            &subject,
            &record.kind,
            &ctx.rkey,
            record.created_at,
        )
        .await?;
        Ok(())
    }
}
