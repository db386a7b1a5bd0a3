//! Applies inbound stream records to local state.
//!
//! One dispatch table maps collection NSIDs to handlers. Every handler is
//! idempotent under replay: the firehose may redeliver after a cursor
//! rewind, and the appview receives echoes of records it wrote itself.
//! Schema errors skip the record (the stream must keep flowing); real
//! storage errors propagate so the cursor does not advance past them.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tangled_consumer::{BoxError, MessageProcessor};
use tangled_db::{Db, DbError};
use tangled_rbac::{Enforcer, RbacError};
use tangled_types::{AtUri, Did, EventEnvelope, Handle, collections};
use tangled_xrpc::IdResolver;

use crate::notify::Notifier;
use crate::sources::Origin;

mod actor;
mod graph;
mod issues;
mod nodes;
mod pulls;
mod repo;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Policy(#[from] RbacError),

    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Event metadata travelling alongside the parsed record.
pub struct EventCtx {
    pub origin: Origin,
    /// Record authority. Filled from the envelope on the firehose; on
    /// knot/spindle streams most records identify actors in their body.
    pub did: Option<Did>,
    pub rkey: String,
}

impl EventCtx {
    /// The author, required. Records without an attributable author on a
    /// source that should provide one are skipped upstream.
    pub fn author(&self) -> Result<&Did, IngestError> {
        self.did
            .as_ref()
            .ok_or_else(|| IngestError::Integrity("record has no author".to_owned()))
    }

    /// AT-URI of the record being applied.
    pub fn at_uri(&self, collection: &str) -> Result<AtUri, IngestError> {
        let author = self.author()?;
        AtUri::new(author.as_str(), collection, &self.rkey)
            .map_err(|e| IngestError::Integrity(e.to_string()))
    }
}

pub struct Ingester {
    pub(crate) db: Db,
    pub(crate) enforcer: Arc<Enforcer>,
    pub(crate) notifier: Arc<dyn Notifier>,
    /// Identity lookups are cache-through and optional: a missing resolver
    /// (tests, air-gapped dev) degrades to using identifiers verbatim.
    pub(crate) resolver: Option<Arc<IdResolver>>,
}

impl Ingester {
    pub fn new(
        db: Db,
        enforcer: Arc<Enforcer>,
        notifier: Arc<dyn Notifier>,
        resolver: Option<Arc<IdResolver>>,
    ) -> Self {
        Self {
            db,
            enforcer,
            notifier,
            resolver,
        }
    }

    /// The dispatch table: NSID → handler.
    async fn apply(&self, ctx: EventCtx, envelope: &EventEnvelope) -> Result<(), IngestError> {
        match envelope.nsid.as_str() {
            collections::REPO => self.ingest_repo(&ctx, envelope).await,
            collections::FOLLOW => self.ingest_follow(&ctx, envelope).await,
            collections::STAR => self.ingest_star(&ctx, envelope).await,
            collections::REACTION => self.ingest_reaction(&ctx, envelope).await,
            collections::ARTIFACT => self.ingest_artifact(&ctx, envelope).await,
            collections::ISSUE => self.ingest_issue(&ctx, envelope).await,
            collections::ISSUE_COMMENT => self.ingest_issue_comment(&ctx, envelope).await,
            collections::ISSUE_STATE => self.ingest_issue_state(&ctx, envelope).await,
            collections::PULL => self.ingest_pull(&ctx, envelope).await,
            collections::LABEL_DEF => self.ingest_label_def(&ctx, envelope).await,
            collections::LABEL_OP => self.ingest_label_op(&ctx, envelope).await,
            collections::PUBLIC_KEY => self.ingest_public_key(&ctx, envelope).await,
            collections::PROFILE => self.ingest_profile(&ctx, envelope).await,
            collections::KNOT_MEMBER => self.ingest_knot_member(&ctx, envelope).await,
            collections::SPINDLE_MEMBER => self.ingest_spindle_member(&ctx, envelope).await,
            collections::PIPELINE_STATUS => self.ingest_pipeline_status(&ctx, envelope).await,
            collections::GIT_REF_UPDATE => self.ingest_ref_update(&ctx, envelope).await,
            collections::STRING => self.ingest_string(&ctx, envelope).await,
            other => {
                tracing::debug!(nsid = other, "unhandled collection");
                Ok(())
            }
        }
    }

    /// Canonicalize an AT-URI authority to DID form, cache-through the
    /// identity resolver. Handles that fail to resolve stay verbatim;
    /// dangling references are tolerated until reconciled.
    pub(crate) async fn canonical_subject(&self, uri: &AtUri) -> String {
        if uri.authority_did().is_some() {
            return uri.to_string();
        }
        let Some(resolver) = &self.resolver else {
            return uri.to_string();
        };
        let Ok(handle) = Handle::new(uri.authority()) else {
            return uri.to_string();
        };
        match resolver.resolve_handle(&handle).await {
            Ok(did) => AtUri::new(did.as_str(), uri.collection(), uri.rkey())
                .map_or_else(|_| uri.to_string(), |u| u.to_string()),
            Err(err) => {
                tracing::debug!(%uri, "authority left unresolved: {err}");
                uri.to_string()
            }
        }
    }

    /// Parse a record body, skipping (not failing) on schema mismatch.
    pub(crate) fn parse<T: serde::de::DeserializeOwned>(
        envelope: &EventEnvelope,
    ) -> Option<T> {
        match envelope.record() {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(nsid = %envelope.nsid, rkey = %envelope.rkey, "skipping malformed record: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl MessageProcessor for Ingester {
    async fn process(&self, source_key: &str, message: &str) -> Result<(), BoxError> {
        let envelope: EventEnvelope = match serde_json::from_str(message) {
            Ok(env) => env,
            Err(err) => {
                // not an envelope at all; skip so the stream keeps flowing
                tracing::warn!(source = source_key, "skipping malformed envelope: {err}");
                return Ok(());
            }
        };
        let ctx = EventCtx {
            origin: Origin::from_key(source_key),
            did: envelope.did.clone(),
            rkey: envelope.rkey.clone(),
        };
        self.apply(ctx, &envelope).await?;
        Ok(())
    }
}
