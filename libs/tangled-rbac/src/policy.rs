//! The in-memory policy model: plain tuples plus role groupings.
//!
//! A `Rule` grants `action` on `resource` within `domain` to `subject`,
//! where the subject is either a DID or a role name. A `Grouping` places a
//! DID in a role within a domain. `server:owner` implies `server:member`.

use std::collections::HashSet;

/// Actions understood by the enforcer.
pub mod actions {
    pub const REPO_CREATE: &str = "repo:create";
    pub const REPO_PUSH: &str = "repo:push";
    pub const REPO_OWNER: &str = "repo:owner";
    pub const REPO_SETTINGS: &str = "repo:settings";
    pub const REPO_DELETE: &str = "repo:delete";
    pub const REPO_INVITE: &str = "repo:invite";
    pub const SERVER_OWNER: &str = "server:owner";
    pub const SERVER_MEMBER: &str = "server:member";

    /// Everything a repo owner can do on their repo.
    pub const REPO_ALL: &[&str] = &[
        REPO_PUSH,
        REPO_OWNER,
        REPO_SETTINGS,
        REPO_DELETE,
        REPO_INVITE,
    ];

    /// What a collaborator can do.
    pub const REPO_COLLABORATOR: &[&str] = &[REPO_PUSH];
}

/// Role names; roles appear as rule subjects.
pub mod roles {
    pub const SERVER_OWNER: &str = "server:owner";
    pub const SERVER_MEMBER: &str = "server:member";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub subject: String,
    pub domain: String,
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grouping {
    pub subject: String,
    pub role: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub(crate) rules: HashSet<Rule>,
    pub(crate) groupings: HashSet<Grouping>,
}

impl Policy {
    pub fn add_rule(&mut self, subject: &str, domain: &str, resource: &str, action: &str) {
        self.rules.insert(Rule {
            subject: subject.to_owned(),
            domain: domain.to_owned(),
            resource: resource.to_owned(),
            action: action.to_owned(),
        });
    }

    pub fn remove_rule(&mut self, subject: &str, domain: &str, resource: &str, action: &str) {
        self.rules.retain(|r| {
            !(r.subject == subject && r.domain == domain && r.resource == resource
                && r.action == action)
        });
    }

    pub fn add_grouping(&mut self, subject: &str, role: &str, domain: &str) {
        self.groupings.insert(Grouping {
            subject: subject.to_owned(),
            role: role.to_owned(),
            domain: domain.to_owned(),
        });
    }

    pub fn remove_grouping(&mut self, subject: &str, role: &str, domain: &str) {
        self.groupings
            .retain(|g| !(g.subject == subject && g.role == role && g.domain == domain));
    }

    /// Roles held by `subject` in `domain`, with `server:owner` implying
    /// `server:member`.
    pub fn roles_for(&self, subject: &str, domain: &str) -> HashSet<&str> {
        let mut out: HashSet<&str> = self
            .groupings
            .iter()
            .filter(|g| g.subject == subject && g.domain == domain)
            .map(|g| g.role.as_str())
            .collect();
        if out.contains(roles::SERVER_OWNER) {
            out.insert(roles::SERVER_MEMBER);
        }
        out
    }

    fn rule_matches(&self, subject: &str, domain: &str, resource: &str, action: &str) -> bool {
        self.rules.contains(&Rule {
            subject: subject.to_owned(),
            domain: domain.to_owned(),
            resource: resource.to_owned(),
            action: action.to_owned(),
        })
    }

    pub fn enforce(&self, subject: &str, domain: &str, resource: &str, action: &str) -> bool {
        if self.rule_matches(subject, domain, resource, action) {
            return true;
        }
        self.roles_for(subject, domain)
            .iter()
            .any(|role| self.rule_matches(role, domain, resource, action))
    }

    /// Actions `subject` may perform on `resource` in `domain`.
    pub fn permissions(&self, subject: &str, domain: &str, resource: &str) -> Vec<String> {
        let roles = self.roles_for(subject, domain);
        let mut out: Vec<String> = self
            .rules
            .iter()
            .filter(|r| {
                r.domain == domain
                    && r.resource == resource
                    && (r.subject == subject || roles.contains(r.subject.as_str()))
            })
            .map(|r| r.action.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// DIDs (not roles) holding any rule on `resource` in `domain`.
    pub fn subjects_on_resource(&self, domain: &str, resource: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .rules
            .iter()
            .filter(|r| {
                r.domain == domain
                    && r.resource == resource
                    && r.subject != roles::SERVER_OWNER
                    && r.subject != roles::SERVER_MEMBER
            })
            .map(|r| r.subject.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Domains in which `subject` holds a role.
    pub fn domains_for(&self, subject: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .groupings
            .iter()
            .filter(|g| g.subject == subject)
            .map(|g| g.domain.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}
