//! Multi-tenant RBAC over (subject, domain, resource, action) tuples.
//!
//! Domains are knot or spindle hostnames. Resources are `did/reponame`
//! pairs, or the domain itself for server-level actions. Mutations change
//! the in-memory policy immediately under a write lock; nothing is durable
//! until [`Enforcer::save_policy`], which callers invoke after their own
//! database transaction commits. Rollback paths call
//! [`Enforcer::load_policy`] to restore the in-memory state from the last
//! durable save.

use parking_lot::RwLock;
use sqlx::SqlitePool;

pub mod policy;

mod error;
mod store;

pub use error::RbacError;
pub use policy::{actions, roles};

use policy::Policy;

pub struct Enforcer {
    pool: SqlitePool,
    policy: RwLock<Policy>,
}

impl Enforcer {
    /// Load the durable policy into memory. The `acl_rules` table must
    /// exist (it is created by the appview database migrations).
    pub async fn new(pool: SqlitePool) -> Result<Self, RbacError> {
        let policy = store::load(&pool).await?;
        Ok(Self {
            pool,
            policy: RwLock::new(policy),
        })
    }

    // ── knots & spindles ─────────────────────────────────────────────

    /// Register a domain: wires the role rules every knot carries.
    pub fn add_knot(&self, domain: &str) {
        let mut policy = self.policy.write();
        policy.add_rule(roles::SERVER_OWNER, domain, domain, actions::SERVER_OWNER);
        policy.add_rule(roles::SERVER_MEMBER, domain, domain, actions::SERVER_MEMBER);
        policy.add_rule(roles::SERVER_MEMBER, domain, domain, actions::REPO_CREATE);
        policy.add_rule(roles::SERVER_OWNER, domain, domain, actions::REPO_INVITE);
    }

    pub fn add_knot_owner(&self, domain: &str, did: &str) {
        self.policy.write().add_grouping(did, roles::SERVER_OWNER, domain);
    }

    pub fn add_knot_member(&self, domain: &str, did: &str) {
        self.policy.write().add_grouping(did, roles::SERVER_MEMBER, domain);
    }

    pub fn remove_knot_member(&self, domain: &str, did: &str) {
        self.policy.write().remove_grouping(did, roles::SERVER_MEMBER, domain);
    }

    /// Spindles carry the same role shape as knots minus repo creation.
    pub fn add_spindle(&self, domain: &str) {
        let mut policy = self.policy.write();
        policy.add_rule(roles::SERVER_OWNER, domain, domain, actions::SERVER_OWNER);
        policy.add_rule(roles::SERVER_MEMBER, domain, domain, actions::SERVER_MEMBER);
    }

    pub fn add_spindle_owner(&self, domain: &str, did: &str) {
        self.policy.write().add_grouping(did, roles::SERVER_OWNER, domain);
    }

    pub fn add_spindle_member(&self, domain: &str, did: &str) {
        self.policy.write().add_grouping(did, roles::SERVER_MEMBER, domain);
    }

    // ── repos ────────────────────────────────────────────────────────

    /// Grant the owner every repo action on `resource` (`did/reponame`).
    pub fn add_repo(&self, owner_did: &str, domain: &str, resource: &str) {
        let mut policy = self.policy.write();
        for action in actions::REPO_ALL {
            policy.add_rule(owner_did, domain, resource, action);
        }
    }

    pub fn add_collaborator(&self, did: &str, domain: &str, resource: &str) {
        let mut policy = self.policy.write();
        for action in actions::REPO_COLLABORATOR {
            policy.add_rule(did, domain, resource, action);
        }
    }

    pub fn remove_collaborator(&self, did: &str, domain: &str, resource: &str) {
        let mut policy = self.policy.write();
        for action in actions::REPO_COLLABORATOR {
            policy.remove_rule(did, domain, resource, action);
        }
    }

    /// Cascade removal: revoke every implicit user of the resource.
    pub fn remove_repo(&self, domain: &str, resource: &str) {
        let mut policy = self.policy.write();
        for subject in policy.subjects_on_resource(domain, resource) {
            for action in actions::REPO_ALL {
                policy.remove_rule(&subject, domain, resource, action);
            }
        }
    }

    // ── queries ──────────────────────────────────────────────────────

    pub fn enforce(&self, subject: &str, domain: &str, resource: &str, action: &str) -> bool {
        self.policy.read().enforce(subject, domain, resource, action)
    }

    pub fn permissions_in_repo(&self, did: &str, domain: &str, resource: &str) -> Vec<String> {
        self.policy.read().permissions(did, domain, resource)
    }

    pub fn domains_for_user(&self, did: &str) -> Vec<String> {
        self.policy.read().domains_for(did)
    }

    /// Domains where the user is at least a member.
    pub fn knots_for_user(&self, did: &str) -> Vec<String> {
        let policy = self.policy.read();
        policy
            .domains_for(did)
            .into_iter()
            .filter(|d| policy.roles_for(did, d).contains(roles::SERVER_MEMBER))
            .collect()
    }

    pub fn collaborators_on(&self, domain: &str, resource: &str) -> Vec<String> {
        self.policy.read().subjects_on_resource(domain, resource)
    }

    // ── persistence ──────────────────────────────────────────────────

    /// Durable commit point. Call after the enclosing DB transaction has
    /// committed; a mutation without a subsequent save is lost on restart.
    pub async fn save_policy(&self) -> Result<(), RbacError> {
        let snapshot = self.policy.read().clone();
        store::save(&self.pool, &snapshot).await
    }

    /// Restore the in-memory policy from the last durable save. Used on
    /// rollback paths and at startup after a crash.
    pub async fn load_policy(&self) -> Result<(), RbacError> {
        let fresh = store::load(&self.pool).await?;
        *self.policy.write() = fresh;
        Ok(())
    }
}
