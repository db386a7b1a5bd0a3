//! Typed shapes for the lexicon records carried on the firehose and on
//! per-node streams. Field names follow the wire form (camelCase).
//!
//! Parsing is strict about shape but lenient about extras: unknown fields
//! are ignored so lexicon evolution does not break ingestion.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aturi::AtUri;
use crate::did::Did;

/// `sh.tangled.repo`: a repository announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRecord {
    pub name: String,
    pub knot: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fork edge: the AT-URI of the repo this one was forked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AtUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spindle: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.graph.follow`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRecord {
    pub subject: Did,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.feed.star`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarRecord {
    pub subject: AtUri,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.feed.reaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRecord {
    pub subject: AtUri,
    /// Reaction kind, e.g. an emoji shortcode.
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.repo.artifact`: a release artifact announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub repo: AtUri,
    pub tag: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_cid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.repo.issue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRecord {
    pub repo: AtUri,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.repo.issue.comment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCommentRecord {
    pub issue: AtUri,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<AtUri>,
    pub created_at: DateTime<Utc>,
}

/// Open/closed at the record layer are events, not state fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

/// `sh.tangled.repo.issue.state`: a close or reopen event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueStateRecord {
    pub issue: AtUri,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
}

/// Where a pull's patch comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSourceRef {
    pub branch: String,
    /// Set for fork-based pulls; absent for same-repo branch pulls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<AtUri>,
}

/// `sh.tangled.repo.pull`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRecord {
    pub repo: AtUri,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub target_branch: String,
    /// Round-zero patch bytes.
    pub patch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PullSourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_rev: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.label.definition`: a repo-scoped label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDefRecord {
    pub repo: AtUri,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelOperation {
    Add,
    Remove,
}

/// `sh.tangled.label.op`: apply or remove a label on a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelOpRecord {
    pub subject: AtUri,
    pub label: AtUri,
    pub operation: LabelOperation,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.publickey`: SSH key bound to the authoring DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.actor.profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Fixed-size selection, at most six entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pinned_repositories: Vec<AtUri>,
    /// Vanity stats selection, at most two entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stats: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// `sh.tangled.knot.member`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnotMemberRecord {
    pub domain: String,
    pub subject: Did,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.spindle.member`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpindleMemberRecord {
    pub instance: String,
    pub subject: Did,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Pending,
    Running,
    Success,
    Failure,
    Error,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// `sh.tangled.pipeline.status`: emitted by spindles per workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusRecord {
    pub pipeline: AtUri,
    pub workflow: String,
    pub status: PipelineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Commit tallies attached to a ref update, bucketed by author email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommitCount {
    pub total: i64,
    #[serde(default)]
    pub by_email: HashMap<String, i64>,
}

/// `sh.tangled.git.ref.update`: emitted on knot streams only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRefUpdateRecord {
    pub committer: Did,
    pub repo_did: Did,
    pub repo_name: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_sha: Option<String>,
    pub new_sha: String,
    #[serde(default)]
    pub commit_count: CommitCount,
    pub created_at: DateTime<Utc>,
}

/// `sh.tangled.string`: a standalone pastable snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringRecord {
    pub filename: String,
    pub contents: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_record_wire_form() {
        let json = r#"{
            "name": "core",
            "knot": "knot.example.com",
            "description": "the core repo",
            "createdAt": "2026-01-02T03:04:05Z"
        }"#;
        let rec: RepoRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.name, "core");
        assert!(rec.source.is_none());
    }

    #[test]
    fn ref_update_ref_field_is_renamed() {
        let json = r#"{
            "committer": "did:plc:alice",
            "repoDid": "did:plc:alice",
            "repoName": "core",
            "ref": "refs/heads/main",
            "newSha": "deadbeef",
            "commitCount": {"total": 3, "byEmail": {"a@example.com": 3}},
            "createdAt": "2026-01-02T03:04:05Z"
        }"#;
        let rec: GitRefUpdateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.ref_name, "refs/heads/main");
        assert_eq!(rec.commit_count.by_email["a@example.com"], 3);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let json = r#"{
            "subject": "did:plc:bob",
            "createdAt": "2026-01-02T03:04:05Z",
            "futureField": true
        }"#;
        assert!(serde_json::from_str::<FollowRecord>(json).is_ok());
    }

    #[test]
    fn pipeline_terminal_states() {
        assert!(PipelineState::Failure.is_terminal());
        assert!(!PipelineState::Running.is_terminal());
    }
}
