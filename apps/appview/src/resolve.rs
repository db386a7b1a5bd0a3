//! Turns URL path owners (`@handle`, bare handle, `did:…`, or the
//! flattened `did-plc-…` form) into a fully-hydrated repo identity.
//! Non-canonical forms are flagged so handlers can 302 to the canonical
//! `@handle/name` path.

use std::sync::Arc;

use thiserror::Error;

use tangled_db::{Db, DbError, repos};
use tangled_types::{Did, Handle, IdError};
use tangled_xrpc::{ClientError, IdResolver};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unrecognized owner segment {0:?}")]
    BadOwner(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("identity resolution failed: {0}")]
    Identity(String),
}

impl From<ClientError> for ResolveError {
    fn from(err: ClientError) -> Self {
        Self::Identity(err.to_string())
    }
}

impl From<IdError> for ResolveError {
    fn from(err: IdError) -> Self {
        Self::BadOwner(err.to_string())
    }
}

/// How the owner appeared in the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerRef {
    Handle(Handle),
    Did(Did),
    /// `did-plc-…`: tooling that cannot carry colons.
    FlattenedDid(Did),
}

impl OwnerRef {
    pub fn parse(segment: &str) -> Result<Self, ResolveError> {
        if let Some(handle) = segment.strip_prefix('@') {
            return Ok(Self::Handle(Handle::new(handle)?));
        }
        if segment.starts_with("did:") {
            return Ok(Self::Did(Did::new(segment)?));
        }
        if segment.starts_with("did-") {
            return Ok(Self::FlattenedDid(Did::from_flattened(segment)?));
        }
        // bare handles are accepted but not canonical
        Ok(Self::Handle(Handle::new(segment)?))
    }

    /// Whether this form is already the canonical one (`@handle`).
    pub fn is_canonical(&self, segment: &str) -> bool {
        matches!(self, Self::Handle(_)) && segment.starts_with('@')
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedRepo {
    pub owner: Did,
    pub handle: Option<Handle>,
    pub repo: repos::Repo,
}

impl ResolvedRepo {
    /// Canonical web path for redirects.
    pub fn canonical_path(&self) -> String {
        match &self.handle {
            Some(handle) => format!("/@{}/{}", handle, self.repo.name),
            None => format!("/{}/{}", self.owner.flattened(), self.repo.name),
        }
    }
}

pub struct RepoResolver {
    db: Db,
    identities: Arc<IdResolver>,
}

impl RepoResolver {
    pub fn new(db: Db, identities: Arc<IdResolver>) -> Self {
        Self { db, identities }
    }

    pub async fn resolve(
        &self,
        owner_segment: &str,
        repo_name: &str,
    ) -> Result<ResolvedRepo, ResolveError> {
        let owner_ref = OwnerRef::parse(owner_segment)?;
        let (did, handle) = match &owner_ref {
            OwnerRef::Handle(handle) => {
                let did = self.identities.resolve_handle(handle).await?;
                (did, Some(handle.clone()))
            }
            OwnerRef::Did(did) | OwnerRef::FlattenedDid(did) => {
                // best-effort reverse lookup for the canonical redirect
                let handle = self
                    .identities
                    .resolve_did(did)
                    .await
                    .ok()
                    .and_then(|identity| identity.handle);
                (did.clone(), handle)
            }
        };

        let repo = repos::get_by_did_name(self.db.pool(), did.as_str(), repo_name)
            .await?
            .ok_or_else(|| ResolveError::NotFound(format!("{owner_segment}/{repo_name}")))?;

        Ok(ResolvedRepo {
            owner: did,
            handle,
            repo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_segment_forms() {
        assert!(matches!(
            OwnerRef::parse("@alice.tangled.sh").unwrap(),
            OwnerRef::Handle(_)
        ));
        assert!(matches!(
            OwnerRef::parse("alice.tangled.sh").unwrap(),
            OwnerRef::Handle(_)
        ));
        assert!(matches!(OwnerRef::parse("did:plc:abc").unwrap(), OwnerRef::Did(_)));
        let flattened = OwnerRef::parse("did-plc-abc").unwrap();
        match &flattened {
            OwnerRef::FlattenedDid(did) => assert_eq!(did.as_str(), "did:plc:abc"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(OwnerRef::parse("???").is_err());
    }

    #[test]
    fn only_at_handle_is_canonical() {
        assert!(OwnerRef::parse("@alice.tangled.sh").unwrap().is_canonical("@alice.tangled.sh"));
        assert!(!OwnerRef::parse("alice.tangled.sh").unwrap().is_canonical("alice.tangled.sh"));
        assert!(!OwnerRef::parse("did-plc-abc").unwrap().is_canonical("did-plc-abc"));
    }
}
