//! Shared harness: in-memory database, live enforcer, and recording mocks
//! for the PDS and knot seams.

// not every test binary exercises every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use url::Url;

use tangled_appview::notify::{DbNotifier, Notifier};
use tangled_appview::writes::{NodeGateway, RecordStore, WriteCtx, WriteError};
use tangled_db::Db;
use tangled_rbac::Enforcer;
use tangled_types::{AtUri, Did};
use tangled_xrpc::pds::PdsSession;
use tangled_xrpc::{Capabilities, Comparison, MergeRequest};

pub fn did(s: &str) -> Did {
    Did::new(s).unwrap()
}

pub fn session(did_str: &str) -> PdsSession {
    PdsSession {
        did: did(did_str),
        endpoint: Url::parse("https://pds.example.com").unwrap(),
        access_token: SecretString::from("test-token"),
    }
}

/// In-memory PDS double. Keys records by (collection, rkey) per authoring
/// DID, mints real-looking AT-URIs, and can be told to fail.
#[derive(Default)]
pub struct MockRecordStore {
    records: Mutex<HashMap<(String, String, String), serde_json::Value>>,
    pub fail_puts: AtomicBool,
}

impl MockRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, did: &str, collection: &str, rkey: &str) -> bool {
        self.records
            .lock()
            .contains_key(&(did.to_owned(), collection.to_owned(), rkey.to_owned()))
    }

    pub fn count_in(&self, did: &str, collection: &str) -> usize {
        self.records
            .lock()
            .keys()
            .filter(|(d, c, _)| d == did && c == collection)
            .count()
    }

    pub fn record(&self, did: &str, collection: &str, rkey: &str) -> Option<serde_json::Value> {
        self.records
            .lock()
            .get(&(did.to_owned(), collection.to_owned(), rkey.to_owned()))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn put(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<AtUri, WriteError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(WriteError::RemoteUnavailable("pds is down".to_owned()));
        }
        self.records.lock().insert(
            (session.did.as_str().to_owned(), collection.to_owned(), rkey.to_owned()),
            record,
        );
        Ok(AtUri::new(session.did.as_str(), collection, rkey).unwrap())
    }

    async fn delete(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
    ) -> Result<(), WriteError> {
        self.records.lock().remove(&(
            session.did.as_str().to_owned(),
            collection.to_owned(),
            rkey.to_owned(),
        ));
        Ok(())
    }
}

/// Recording knot/spindle double.
pub struct MockGateway {
    pub calls: Mutex<Vec<String>>,
    pub capabilities: Mutex<Capabilities>,
    /// rev2 the next compare will answer with.
    pub compare_rev: Mutex<String>,
    pub compare_patch: Mutex<String>,
    /// what `/owner` answers per domain.
    pub owners: Mutex<HashMap<String, Did>>,
    pub fail_create: AtomicBool,
    pub fail_merge: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            capabilities: Mutex::new(Capabilities {
                format_patch: true,
                branch_submissions: true,
                fork_submissions: true,
                patch_submissions: true,
            }),
            compare_rev: Mutex::new("rev-initial".to_owned()),
            compare_patch: Mutex::new("diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-x\n+y\n".to_owned()),
            owners: Mutex::new(HashMap::new()),
            fail_create: AtomicBool::new(false),
            fail_merge: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl NodeGateway for MockGateway {
    async fn create_repo(
        &self,
        domain: &str,
        did: &Did,
        name: &str,
        _default_branch: &str,
    ) -> Result<(), WriteError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(WriteError::RemoteUnavailable("knot is down".to_owned()));
        }
        self.calls.lock().push(format!("create:{domain}:{did}:{name}"));
        Ok(())
    }

    async fn fork_repo(
        &self,
        domain: &str,
        did: &Did,
        source: &str,
        name: &str,
    ) -> Result<(), WriteError> {
        self.calls
            .lock()
            .push(format!("fork:{domain}:{did}:{source}:{name}"));
        Ok(())
    }

    async fn delete_repo(&self, domain: &str, did: &Did, name: &str) -> Result<(), WriteError> {
        self.calls.lock().push(format!("delete:{domain}:{did}:{name}"));
        Ok(())
    }

    async fn add_collaborator(
        &self,
        domain: &str,
        owner: &Did,
        repo: &str,
        collaborator: &Did,
    ) -> Result<(), WriteError> {
        self.calls
            .lock()
            .push(format!("collab:{domain}:{owner}:{repo}:{collaborator}"));
        Ok(())
    }

    async fn add_member(&self, domain: &str, did: &Did) -> Result<(), WriteError> {
        self.calls.lock().push(format!("member:{domain}:{did}"));
        Ok(())
    }

    async fn set_default_branch(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        branch: &str,
    ) -> Result<(), WriteError> {
        self.calls
            .lock()
            .push(format!("default-branch:{domain}:{did}:{repo}:{branch}"));
        Ok(())
    }

    async fn merge(
        &self,
        domain: &str,
        did: &Did,
        repo: &str,
        request: &MergeRequest,
    ) -> Result<(), WriteError> {
        if self.fail_merge.load(Ordering::SeqCst) {
            return Err(WriteError::RemoteUnavailable("merge refused".to_owned()));
        }
        self.calls.lock().push(format!(
            "merge:{domain}:{did}:{repo}:{}:{}",
            request.branch, request.author_email
        ));
        Ok(())
    }

    async fn compare(
        &self,
        domain: &str,
        _did: &Did,
        _repo: &str,
        rev1: &str,
        _rev2: &str,
    ) -> Result<Comparison, WriteError> {
        self.calls.lock().push(format!("compare:{domain}"));
        Ok(Comparison {
            rev1: rev1.to_owned(),
            rev2: self.compare_rev.lock().clone(),
            patch: self.compare_patch.lock().clone(),
        })
    }

    async fn capabilities(&self, _domain: &str) -> Result<Capabilities, WriteError> {
        Ok(*self.capabilities.lock())
    }

    async fn owner(&self, domain: &str) -> Result<Did, WriteError> {
        self.owners
            .lock()
            .get(domain)
            .cloned()
            .ok_or_else(|| WriteError::RemoteUnavailable(format!("{domain} unreachable")))
    }
}

pub struct Harness {
    pub db: Db,
    pub enforcer: Arc<Enforcer>,
    pub records: Arc<MockRecordStore>,
    pub gateway: Arc<MockGateway>,
    pub ctx: Arc<WriteCtx>,
}

pub async fn harness() -> Harness {
    let db = Db::connect_in_memory().await.unwrap();
    let enforcer = Arc::new(Enforcer::new(db.pool().clone()).await.unwrap());
    let records = MockRecordStore::new();
    let gateway = MockGateway::new();
    let notifier: Arc<dyn Notifier> = Arc::new(DbNotifier::new(db.clone()));
    let ctx = Arc::new(WriteCtx {
        db: db.clone(),
        enforcer: Arc::clone(&enforcer),
        records: Arc::clone(&records) as Arc<dyn RecordStore>,
        nodes: Arc::clone(&gateway) as Arc<dyn NodeGateway>,
        notifier,
        identities: None,
    });
    Harness {
        db,
        enforcer,
        records,
        gateway,
        ctx,
    }
}

/// Register and verify a knot with `did` as its proven owner, mirroring
/// what the verification flow installs.
pub async fn verified_knot(h: &Harness, domain: &str, owner: &str) {
    tangled_db::knots::create(h.db.pool(), domain, owner, "s3cret", chrono::Utc::now())
        .await
        .unwrap();
    tangled_db::knots::mark_verified(h.db.pool(), domain).await.unwrap();
    h.enforcer.add_knot(domain);
    h.enforcer.add_knot_owner(domain, owner);
    h.enforcer.save_policy().await.unwrap();
}
