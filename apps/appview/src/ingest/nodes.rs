//! Records carrying cross-domain trust: membership grants, pipeline
//! statuses and git ref updates. These are the handlers that consult or
//! mutate the enforcer, and the ones that must distrust their source.

use chrono::Utc;

use tangled_db::{DbError, emails, pipelines, punches, refs};
use tangled_rbac::actions;
use tangled_types::EventEnvelope;
use tangled_types::records::{
    GitRefUpdateRecord, KnotMemberRecord, PipelineStatusRecord, SpindleMemberRecord,
};

use crate::sources::Origin;

use super::{EventCtx, IngestError, Ingester};

impl Ingester {
    /// A knot membership grant. Only the knot's owner may add members;
    /// records authored by anyone else are dropped.
    pub(super) async fn ingest_knot_member(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<KnotMemberRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        if !self.enforcer.enforce(
            author.as_str(),
            &record.domain,
            &record.domain,
            actions::SERVER_OWNER,
        ) {
            tracing::warn!(
                domain = %record.domain,
                author = %author,
                "dropping member grant from non-owner"
            );
            return Ok(());
        }

        self.enforcer.add_knot_member(&record.domain, record.subject.as_str());
        if let Err(err) = self.enforcer.save_policy().await {
            self.enforcer.load_policy().await?;
            return Err(err.into());
        }
        Ok(())
    }

    pub(super) async fn ingest_spindle_member(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<SpindleMemberRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        if !self.enforcer.enforce(
            author.as_str(),
            &record.instance,
            &record.instance,
            actions::SERVER_OWNER,
        ) {
            tracing::warn!(
                instance = %record.instance,
                author = %author,
                "dropping member grant from non-owner"
            );
            return Ok(());
        }

        self.enforcer
            .add_spindle_member(&record.instance, record.subject.as_str());
        if let Err(err) = self.enforcer.save_policy().await {
            self.enforcer.load_policy().await?;
            return Err(err.into());
        }
        Ok(())
    }

    /// Workflow status from a spindle stream. The status key derives from
    /// the emitting spindle plus the record; the timestamp is clamped to
    /// now because spindle clocks may be skewed and a future timestamp
    /// must never be accepted.
    pub(super) async fn ingest_pipeline_status(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Origin::Spindle(spindle) = &ctx.origin else {
            tracing::warn!("pipeline status outside a spindle stream; dropping");
            return Ok(());
        };
        let Some(record) = Self::parse::<PipelineStatusRecord>(envelope) else {
            return Ok(());
        };

        let status = serde_json::to_value(record.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or_else(|| IngestError::Integrity("unencodable pipeline status".to_owned()))?;
        let observed_at = record.created_at.min(Utc::now());

        pipelines::upsert(
            self.db.pool(),
            spindle,
            &record.pipeline.to_string(),
            &record.workflow,
            &status,
            record.error.as_deref(),
            record.exit_code,
            observed_at,
        )
        .await?;
        Ok(())
    }

    /// Git ref update from a knot stream. The committer must be a member
    /// of the emitting knot; anything else is a mis-routed or forged
    /// event and is rejected. Punches accrue per verified author email.
    pub(super) async fn ingest_ref_update(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Origin::Knot(knot) = &ctx.origin else {
            tracing::warn!("ref update outside a knot stream; dropping");
            return Ok(());
        };
        let Some(record) = Self::parse::<GitRefUpdateRecord>(envelope) else {
            return Ok(());
        };

        if !self.enforcer.enforce(
            record.committer.as_str(),
            knot,
            knot,
            actions::SERVER_MEMBER,
        ) {
            tracing::warn!(
                knot = %knot,
                committer = %record.committer,
                "rejecting ref update from non-member"
            );
            return Ok(());
        }

        let verified = emails::verified_for_did(self.db.pool(), record.committer.as_str()).await?;
        let day = record.created_at.date_naive();

        let mut tx = self.db.begin().await?;
        let first_sighting = refs::insert(
            &mut *tx,
            &refs::NewRefUpdate {
                knot: knot.clone(),
                rkey: ctx.rkey.clone(),
                committer_did: record.committer.as_str().to_owned(),
                repo_did: record.repo_did.as_str().to_owned(),
                repo_name: record.repo_name.clone(),
                ref_name: record.ref_name.clone(),
                new_sha: record.new_sha.clone(),
                created_at: record.created_at,
            },
        )
        .await?;
        if first_sighting {
            for email in verified {
                if let Some(count) = record.commit_count.by_email.get(&email.address) {
                    punches::increment(&mut *tx, record.committer.as_str(), day, *count).await?;
                }
            }
        }
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }
}
