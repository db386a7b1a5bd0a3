//! Profile and public-key records.

use tangled_db::{profiles, public_keys};
use tangled_types::EventEnvelope;
use tangled_types::records::{ProfileRecord, PublicKeyRecord};

use super::{EventCtx, IngestError, Ingester};

impl Ingester {
    /// Profiles are last-writer-wins. Oversized pin/stat selections from
    /// remote writers are truncated to the fixed slot counts rather than
    /// rejected; this appview's own writes validate before reaching here.
    pub(super) async fn ingest_profile(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(mut record) = Self::parse::<ProfileRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        record.pinned_repositories.truncate(profiles::MAX_PINNED);
        record.stats.truncate(profiles::MAX_STATS);

        profiles::upsert(
            self.db.pool(),
            &profiles::Profile {
                did: author.as_str().to_owned(),
                description: record.description,
                location: record.location,
                links: record.links,
                pinned: record
                    .pinned_repositories
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                stats: record.stats,
                created_at: record.created_at,
            },
        )
        .await?;
        Ok(())
    }

    pub(super) async fn ingest_public_key(
        &self,
        ctx: &EventCtx,
        envelope: &EventEnvelope,
    ) -> Result<(), IngestError> {
        let Some(record) = Self::parse::<PublicKeyRecord>(envelope) else {
            return Ok(());
        };
        let author = ctx.author()?;
        public_keys::insert(
            self.db.pool(),
            author.as_str(),
            &ctx.rkey,
            record.name.as_deref(),
            &record.key,
            record.created_at,
        )
        .await?;
        Ok(())
    }
}
