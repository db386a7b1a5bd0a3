//! Repo announcements, artifacts, labels and snippet strings.
//!
//! Repo creation touches the enforcer, so it runs the full transactional
//! discipline: write row + mutate policy, commit, persist policy; on any
//! failure the in-memory policy is reloaded from its durable store.

use tangled_db::{DbError, artifacts, labels, repos, strings};
use tangled_types::EventEnvelope;
use tangled_types::collections;
use tangled_types::records::{
    ArtifactRecord, LabelDefRecord, LabelOpRecord, LabelOperation, RepoRecord, StringRecord,
};

use super::{EventCtx, IngestError, Ingester};

impl Ingester {
    pub(super) async fn ingest_repo(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<RepoRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?.clone();
        let at_uri = ctx.at_uri(collections::REPO)?;
        let resource = format!("{}/{}", author.as_str(), record.name);

        let outcome: Result<bool, IngestError> = async {
            let mut tx = self.db.begin().await?;
            let inserted = repos::insert(
                &mut *tx,
                &repos::NewRepo {
                    did: author.as_str().to_owned(),
                    name: record.name.clone(),
                    knot: record.knot.clone(),
                    rkey: ctx.rkey.clone(),
                    at_uri: at_uri.to_string(),
                    description: record.description.clone(),
                    source_at: record.source.as_ref().map(ToString::to_string),
                    spindle: record.spindle.clone(),
                    created_at: record.created_at,
                },
            )
            .await?;
            if inserted {
                self.enforcer.add_repo(author.as_str(), &record.knot, &resource);
            }
            tx.commit().await.map_err(DbError::from)?;
            if inserted {
                self.enforcer.save_policy().await?;
            }
            Ok(inserted)
        }
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(err) => {
                // restore the policy the durable store still has
                if let Err(reload) = self.enforcer.load_policy().await {
                    tracing::error!("policy reload after failed repo ingest: {reload}");
                }
                Err(err)
            }
        }
    }

    pub(super) async fn ingest_artifact(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<ArtifactRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        artifacts::insert(
            self.db.pool(),
            author.as_str(),
            &ctx.rkey,
            &record.repo.to_string(),
            &record.tag,
            &record.name,
            record.blob_cid.as_deref(),
            record.created_at,
        )
        .await?;
        Ok(())
    }

    pub(super) async fn ingest_label_def(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<LabelDefRecord>(envelope) else {
            return Ok(());
        };
        let at_uri = ctx.at_uri(collections::LABEL_DEF)?;
        labels::insert_def(
            self.db.pool(),
            &at_uri.to_string(),
            &record.repo.to_string(),
            &record.name,
            record.color.as_deref(),
            record.created_at,
        )
        .await?;
        Ok(())
    }

    pub(super) async fn ingest_label_op(
        &self,
        _ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<LabelOpRecord>(envelope) else {
            return Ok(());
        };
        match record.operation {
            LabelOperation::Add => {
                labels::apply(
                    self.db.pool(),
                    &record.subject.to_string(),
                    &record.label.to_string(),
                    record.created_at,
                )
                .await?;
            }
            LabelOperation::Remove => {
                labels::unapply(
                    self.db.pool(),
                    &record.subject.to_string(),
                    &record.label.to_string(),
                )
                .await?;
            }
        }
        Ok(())
    }

    pub(super) async fn ingest_string(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<StringRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        strings::upsert(
            self.db.pool(),
            author.as_str(),
            &ctx.rkey,
            &record.filename,
            &record.contents,
            record.description.as_deref(),
            record.created_at,
        )
        .await?;
        Ok(())
    }
}
