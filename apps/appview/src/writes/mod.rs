//! The two-phase write coordinator. Every user-initiated mutation runs:
//!
//! - **Phase A**: validate, mint a TID, do optimistic local checks;
//! - **Phase B**: write the record to the user's PDS (the returned AT-URI
//!   is the authoritative identifier);
//! - **Phase C**: call the remote knot/spindle where the mutation has a
//!   physical side (bare repo creation, merge, key principal);
//! - **Phase D**: apply ACL changes in the enforcer, commit the local DB
//!   transaction, persist the policy.
//!
//! On any failure after phase B the PDS record is deleted best-effort and,
//! when the enforcer was touched, the policy is reloaded from its durable
//! store. The ingester later observes the echoed record on the firehose;
//! all inserts are keyed on the AT-URI so echoes are no-ops.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tangled_db::{Db, DbError, knots};
use tangled_rbac::{Enforcer, RbacError};
use tangled_types::{AtUri, Did};
use tangled_xrpc::pds::PdsSession;
use tangled_xrpc::{
    Capabilities, ClientError, Comparison, IdResolver, MergeRequest, PdsClient, SignedClient,
    UnsignedClient,
};

use crate::notify::Notifier;

pub mod graph;
pub mod issues;
pub mod nodes;
pub mod profile;
pub mod pulls;
pub mod repos;

mod rollback;

pub use rollback::Rollback;

#[derive(Debug, Error)]
pub enum WriteError {
    /// Malformed input; surfaced inline to the user.
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Deliberately generic; callers must not leak which check failed.
    #[error("not authorized")]
    Denied,

    /// Knot, spindle or PDS unreachable; prior phases were rolled back.
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Invariant violation; fatal for the request.
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Policy(#[from] RbacError),
}

impl From<ClientError> for WriteError {
    fn from(err: ClientError) -> Self {
        match &err {
            ClientError::Status { status, body } if status.is_client_error() => {
                Self::Validation(format!("remote rejected the request ({status}): {body}"))
            }
            ClientError::BadResponse(msg) => Self::Integrity(msg.clone()),
            _ => Self::RemoteUnavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for WriteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Integrity(format!("record serialization failed: {err}"))
    }
}

/// PDS seam: record writes on behalf of a signed-in user. Mocked in tests.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<AtUri, WriteError>;

    async fn delete(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
    ) -> Result<(), WriteError>;
}

pub struct XrpcRecordStore {
    client: PdsClient,
}

impl XrpcRecordStore {
    pub fn new(client: PdsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordStore for XrpcRecordStore {
    async fn put(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<AtUri, WriteError> {
        let out = self
            .client
            .put_record(session, collection, rkey, &record, None)
            .await?;
        Ok(out.uri)
    }

    async fn delete(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
    ) -> Result<(), WriteError> {
        self.client.delete_record(session, collection, rkey).await?;
        Ok(())
    }
}

/// Knot/spindle seam, addressed by domain. The HTTP implementation builds a
/// signed client from the domain's registration secret per call; tests
/// substitute a recording mock.
#[async_trait]
pub trait NodeGateway: Send + Sync {
    async fn create_repo(
        &self,
        domain: &str,
        did: &Did,
        name: &str,
        default_branch: &str,
    ) -> Result<(), WriteError>;

    async fn fork_repo(
        &self,
        domain: &str,
        did: &Did,
        source: &str,
        name: &str,
    ) -> Result<(), WriteError>;

    async fn delete_repo(&self, domain: &str, did: &Did, name: &str) -> Result<(), WriteError>;

    async fn add_collaborator(
        &self,
        domain: &str,
        owner: &Did,
        repo: &str,
        collaborator: &Did,
    ) -> Result<(), WriteError>;

    async fn add_member(&self, domain: &str, did: &Did) -> Result<(), WriteError>;

    async fn set_default_branch(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        branch: &str,
    ) -> Result<(), WriteError>;

    async fn merge(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        request: &MergeRequest,
    ) -> Result<(), WriteError>;

    async fn compare(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        rev1: &str,
        rev2: &str,
    ) -> Result<Comparison, WriteError>;

    async fn capabilities(&self, domain: &str) -> Result<Capabilities, WriteError>;

    /// `/owner` proof used by the registration state machine.
    async fn owner(&self, domain: &str) -> Result<Did, WriteError>;
}

pub struct HttpNodeGateway {
    db: Db,
    dev: bool,
}

impl HttpNodeGateway {
    pub fn new(db: Db, dev: bool) -> Self {
        Self { db, dev }
    }

    async fn signed(&self, domain: &str) -> Result<SignedClient, WriteError> {
        let registration = knots::get_by_domain(self.db.pool(), domain)
            .await?
            .ok_or_else(|| WriteError::NotFound(format!("knot {domain} is not registered")))?;
        Ok(SignedClient::new(
            domain,
            secrecy::SecretString::from(registration.secret),
            self.dev,
        )?)
    }

    fn unsigned(&self, domain: &str) -> Result<UnsignedClient, WriteError> {
        Ok(UnsignedClient::new(domain, self.dev)?)
    }
}

#[async_trait]
impl NodeGateway for HttpNodeGateway {
    async fn create_repo(
        &self,
        domain: &str,
        did: &Did,
        name: &str,
        default_branch: &str,
    ) -> Result<(), WriteError> {
        Ok(self.signed(domain).await?.new_repo(did, name, default_branch).await?)
    }

    async fn fork_repo(
        &self,
        domain: &str,
        did: &Did,
        source: &str,
        name: &str,
    ) -> Result<(), WriteError> {
        Ok(self.signed(domain).await?.fork_repo(did, source, name).await?)
    }

    async fn delete_repo(&self, domain: &str, did: &Did, name: &str) -> Result<(), WriteError> {
        Ok(self.signed(domain).await?.delete_repo(did, name).await?)
    }

    async fn add_collaborator(
        &self,
        domain: &str,
        owner: &Did,
        repo: &str,
        collaborator: &Did,
    ) -> Result<(), WriteError> {
        Ok(self
            .signed(domain)
            .await?
            .add_collaborator(owner, repo, collaborator)
            .await?)
    }

    async fn add_member(&self, domain: &str, did: &Did) -> Result<(), WriteError> {
        Ok(self.signed(domain).await?.add_member(did).await?)
    }

    async fn set_default_branch(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        branch: &str,
    ) -> Result<(), WriteError> {
        Ok(self
            .signed(domain)
            .await?
            .set_default_branch(did, repo, branch)
            .await?)
    }

    async fn merge(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        request: &MergeRequest,
    ) -> Result<(), WriteError> {
        Ok(self.signed(domain).await?.merge(did, repo, request).await?)
    }

    async fn compare(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        rev1: &str,
        rev2: &str,
    ) -> Result<Comparison, WriteError> {
        Ok(self.unsigned(domain)?.compare(did, repo, rev1, rev2).await?)
    }

    async fn capabilities(&self, domain: &str) -> Result<Capabilities, WriteError> {
        Ok(self.unsigned(domain)?.capabilities().await?)
    }

    async fn owner(&self, domain: &str) -> Result<Did, WriteError> {
        Ok(self.unsigned(domain)?.owner().await?)
    }
}

/// Everything a write operation needs. Cheap to clone behind `Arc`s.
pub struct WriteCtx {
    pub db: Db,
    pub enforcer: Arc<Enforcer>,
    pub records: Arc<dyn RecordStore>,
    pub nodes: Arc<dyn NodeGateway>,
    pub notifier: Arc<dyn Notifier>,
    /// Handle lookups for display identities (merge authorship). Optional:
    /// absent in tests and air-gapped dev, where DIDs are used verbatim.
    pub identities: Option<Arc<IdResolver>>,
}

impl WriteCtx {
    /// Run the finalize-or-rollback tail shared by every operation.
    pub(crate) async fn finish<T>(
        &self,
        outcome: Result<T, WriteError>,
        mut rollback: Rollback,
    ) -> Result<T, WriteError> {
        match outcome {
            Ok(value) => {
                rollback.disarm();
                Ok(value)
            }
            Err(err) => {
                rollback.run().await;
                Err(err)
            }
        }
    }
}
