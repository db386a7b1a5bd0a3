//! Pull records. A first observation creates the pull with round 0; a
//! replayed record whose patch differs from the last stored round is a
//! resubmission echo and appends the next round.

use tangled_db::notifications::NotificationKind;
use tangled_db::{DbError, pulls as pulls_db, repos};
use tangled_types::collections;
use tangled_types::records::PullRecord;
use tangled_types::{Did, EventEnvelope};

use crate::notify::NotificationEvent;
use crate::patch::is_valid_patch;

use super::{EventCtx, IngestError, Ingester};

impl Ingester {
    pub(super) async fn ingest_pull(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<PullRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?.clone();
        let at_uri = ctx.at_uri(collections::PULL)?;
        let pull_key = at_uri.to_string();

        if let Some(existing) = pulls_db::get_by_at_uri(self.db.pool(), &pull_key).await? {
            // echo of a resubmission: append a round if the active patch moved
            let last = pulls_db::last_submission(self.db.pool(), &pull_key).await?;
            if let Some(last) = last {
                let changed = record.patch != last.patch
                    && !record.patch.is_empty()
                    && is_valid_patch(&record.patch);
                let rev_unchanged = record.source_rev.is_some()
                    && record.source_rev.as_deref() == last.source_rev.as_deref();
                if changed && !rev_unchanged && existing.is_open() {
                    pulls_db::insert_submission(
                        self.db.pool(),
                        &pull_key,
                        last.round + 1,
                        &record.patch,
                        record.source_rev.as_deref(),
                        record.created_at,
                    )
                    .await?;
                }
            }
            return Ok(());
        }

        let inserted = {
            let mut tx = self.db.begin().await?;
            let number = pulls_db::next_pull_id(&mut *tx, &record.repo.to_string()).await?;
            let inserted = pulls_db::insert(
                &mut *tx,
                &pulls_db::NewPull {
                    at_uri: pull_key.clone(),
                    repo_at: record.repo.to_string(),
                    did: author.as_str().to_owned(),
                    title: record.title.clone(),
                    body: record.body.clone(),
                    target_branch: record.target_branch.clone(),
                    source_branch: record.source.as_ref().map(|s| s.branch.clone()),
                    source_repo_at: record
                        .source
                        .as_ref()
                        .and_then(|s| s.repo.as_ref())
                        .map(ToString::to_string),
                    created_at: record.created_at,
                },
                number,
            )
            .await?;
            if inserted {
                pulls_db::insert_submission(
                    &mut *tx,
                    &pull_key,
                    0,
                    &record.patch,
                    record.source_rev.as_deref(),
                    record.created_at,
                )
                .await?;
            }
            tx.commit().await.map_err(DbError::from)?;
            inserted
        };

        if inserted {
            if let Some(repo) = repos::get_by_at_uri(self.db.pool(), &record.repo.to_string()).await?
            {
                if let Ok(owner) = Did::new(repo.did) {
                    self.notifier
                        .notify(&NotificationEvent {
                            recipient: owner,
                            actor: author,
                            kind: NotificationKind::PullOpened,
                            entity: Some(pull_key),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }
}
