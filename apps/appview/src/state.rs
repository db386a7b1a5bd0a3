//! Shared application state threaded through the router.

use std::sync::Arc;

use tokio::sync::mpsc;

use tangled_db::Db;
use tangled_rbac::Enforcer;
use tangled_xrpc::{IdResolver, PdsClient};

use crate::config::Config;
use crate::resolve::RepoResolver;
use crate::web::auth::SessionAuth;
use crate::writes::WriteCtx;

/// A node that just became verified and must enter the consumer's source
/// set. Verification happens in request handlers; the consumer lives in
/// the main task, so the handoff is a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewSource {
    Knot(String),
    Spindle(String),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Db,
    pub enforcer: Arc<Enforcer>,
    pub writes: Arc<WriteCtx>,
    pub identities: Arc<IdResolver>,
    pub repos: Arc<RepoResolver>,
    pub pds: Arc<PdsClient>,
    pub sessions: Arc<dyn SessionAuth>,
    pub new_sources: mpsc::Sender<NewSource>,
    /// Client used by the git transport proxy (no global timeout; clones
    /// can be long).
    pub proxy_http: reqwest::Client,
}
