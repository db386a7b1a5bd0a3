//! Pull lifecycle: open, resubmit, merge, close. Pulls are append-only
//! sequences of submissions; the active patch is the last round.

use chrono::Utc;

use tangled_db::notifications::NotificationKind;
use tangled_db::{DbError, emails, pulls as pulls_db, repos};
use tangled_rbac::actions;
use tangled_types::records::{PullRecord, PullSourceRef};
use tangled_types::{AtUri, Did, Tid, collections};
use tangled_xrpc::MergeRequest;
use tangled_xrpc::pds::PdsSession;

use crate::notify::NotificationEvent;
use crate::patch::is_valid_patch;

use super::{Rollback, WriteCtx, WriteError};

/// How the pull sources its patch.
#[derive(Debug, Clone)]
pub enum PullSource {
    /// Raw patch pasted by the author.
    Patch { patch: String },
    /// Same-repo branch; the knot derives the patch by compare.
    Branch { branch: String },
    /// Branch in a fork of the target repo.
    Fork { repo_at: AtUri, branch: String },
}

pub struct NewPullInput {
    pub repo_at: AtUri,
    pub title: String,
    pub body: Option<String>,
    pub target_branch: String,
    pub source: PullSource,
}

/// Check the knot advertises support for this submission flavor before
/// attempting any write.
async fn check_capability(
    ctx: &WriteCtx,
    knot: &str,
    source: &PullSource,
) -> Result<(), WriteError> {
    let caps = ctx.nodes.capabilities(knot).await?;
    let (supported, flavor) = match source {
        PullSource::Patch { .. } => (caps.patch_submissions, "patch"),
        PullSource::Branch { .. } => (caps.branch_submissions, "branch"),
        PullSource::Fork { .. } => (caps.fork_submissions, "fork"),
    };
    if supported {
        Ok(())
    } else {
        Err(WriteError::Validation(format!(
            "knot {knot} does not support {flavor}-based pulls"
        )))
    }
}

/// Resolve the patch (and source revision) for a submission.
async fn derive_patch(
    ctx: &WriteCtx,
    repo: &repos::Repo,
    target_branch: &str,
    source: &PullSource,
) -> Result<(String, Option<String>), WriteError> {
    match source {
        PullSource::Patch { patch } => Ok((patch.clone(), None)),
        PullSource::Branch { branch } => {
            let owner = Did::new(repo.did.clone())
                .map_err(|e| WriteError::Integrity(format!("stored repo owner: {e}")))?;
            let cmp = ctx
                .nodes
                .compare(&repo.knot, &owner, &repo.name, target_branch, branch)
                .await?;
            Ok((cmp.patch, Some(cmp.rev2)))
        }
        PullSource::Fork { repo_at, branch } => {
            let fork = repos::get_by_at_uri(ctx.db.pool(), &repo_at.to_string())
                .await?
                .ok_or_else(|| WriteError::NotFound(format!("fork {repo_at}")))?;
            let owner = Did::new(fork.did.clone())
                .map_err(|e| WriteError::Integrity(format!("stored fork owner: {e}")))?;
            let cmp = ctx
                .nodes
                .compare(&fork.knot, &owner, &fork.name, target_branch, branch)
                .await?;
            Ok((cmp.patch, Some(cmp.rev2)))
        }
    }
}

pub async fn new_pull(
    ctx: &WriteCtx,
    session: &PdsSession,
    input: NewPullInput,
) -> Result<AtUri, WriteError> {
    if input.title.trim().is_empty() {
        return Err(WriteError::Validation("pull title is empty".to_owned()));
    }
    let repo = repos::get_by_at_uri(ctx.db.pool(), &input.repo_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {}", input.repo_at)))?;

    check_capability(ctx, &repo.knot, &input.source).await?;
    let (patch, source_rev) = derive_patch(ctx, &repo, &input.target_branch, &input.source).await?;
    if patch.is_empty() {
        return Err(WriteError::Validation("patch is empty".to_owned()));
    }
    if !is_valid_patch(&patch) {
        return Err(WriteError::Validation("patch is not a recognizable diff".to_owned()));
    }

    let (source_branch, source_repo_at) = match &input.source {
        PullSource::Patch { .. } => (None, None),
        PullSource::Branch { branch } => (Some(branch.clone()), None),
        PullSource::Fork { repo_at, branch } => (Some(branch.clone()), Some(repo_at.clone())),
    };

    let rkey = Tid::now();
    let record = PullRecord {
        repo: input.repo_at.clone(),
        title: input.title.clone(),
        body: input.body.clone(),
        target_branch: input.target_branch.clone(),
        patch: patch.clone(),
        source: source_branch.as_ref().map(|branch| PullSourceRef {
            branch: branch.clone(),
            repo: source_repo_at.clone(),
        }),
        source_rev: source_rev.clone(),
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::PULL,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete pull record", async move {
            records.delete(&session, collections::PULL, rkey.as_str()).await
        });
    }

    let outcome = async {
        let mut tx = ctx.db.begin().await?;
        let number = pulls_db::next_pull_id(&mut *tx, &input.repo_at.to_string()).await?;
        pulls_db::insert(
            &mut *tx,
            &pulls_db::NewPull {
                at_uri: uri.to_string(),
                repo_at: input.repo_at.to_string(),
                did: session.did.as_str().to_owned(),
                title: input.title.clone(),
                body: input.body.clone(),
                target_branch: input.target_branch.clone(),
                source_branch: source_branch.clone(),
                source_repo_at: source_repo_at.as_ref().map(ToString::to_string),
                created_at: record.created_at,
            },
            number,
        )
        .await?;
        // round 0 always exists
        pulls_db::insert_submission(
            &mut *tx,
            &uri.to_string(),
            0,
            &patch,
            source_rev.as_deref(),
            record.created_at,
        )
        .await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }
    .await;
    let result = ctx.finish(outcome, rollback).await;

    if result.is_ok() {
        if let Ok(owner) = Did::new(repo.did) {
            ctx.notifier
                .notify(&NotificationEvent {
                    recipient: owner,
                    actor: session.did.clone(),
                    kind: NotificationKind::PullOpened,
                    entity: Some(uri.to_string()),
                })
                .await;
        }
    }
    result.map(|()| uri)
}

/// Append a new round. The resubmit policy rejects empty, identical and
/// syntactically invalid patches; for branch/fork pulls an unchanged
/// source revision is rejected with "branch unchanged".
pub async fn resubmit(
    ctx: &WriteCtx,
    session: &PdsSession,
    pull_at: &AtUri,
    new_patch: Option<String>,
) -> Result<i64, WriteError> {
    let pull = pulls_db::get_by_at_uri(ctx.db.pool(), &pull_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("pull {pull_at}")))?;
    if pull.did != session.did.as_str() {
        return Err(WriteError::Denied);
    }
    if !pull.is_open() {
        return Err(WriteError::Validation("pull is not open".to_owned()));
    }
    let last = pulls_db::last_submission(ctx.db.pool(), &pull_at.to_string())
        .await?
        .ok_or_else(|| WriteError::Integrity(format!("pull {pull_at} has no round 0")))?;
    let repo = repos::get_by_at_uri(ctx.db.pool(), &pull.repo_at)
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {}", pull.repo_at)))?;

    // re-derive the patch for branch/fork pulls, take the caller's for patch pulls
    let (patch, source_rev) = match (&pull.source_branch, &pull.source_repo_at) {
        (None, _) => {
            let patch = new_patch
                .ok_or_else(|| WriteError::Validation("a patch is required".to_owned()))?;
            (patch, None)
        }
        (Some(branch), source_repo_at) => {
            let (compare_repo, compare_owner) = match source_repo_at {
                Some(fork_at) => {
                    let fork = repos::get_by_at_uri(ctx.db.pool(), fork_at)
                        .await?
                        .ok_or_else(|| WriteError::NotFound(format!("fork {fork_at}")))?;
                    let owner = Did::new(fork.did.clone())
                        .map_err(|e| WriteError::Integrity(format!("stored fork owner: {e}")))?;
                    (fork, owner)
                }
                None => {
                    let owner = Did::new(repo.did.clone())
                        .map_err(|e| WriteError::Integrity(format!("stored repo owner: {e}")))?;
                    (repo.clone(), owner)
                }
            };
            let cmp = ctx
                .nodes
                .compare(
                    &compare_repo.knot,
                    &compare_owner,
                    &compare_repo.name,
                    &pull.target_branch,
                    branch,
                )
                .await?;
            if last.source_rev.as_deref() == Some(cmp.rev2.as_str()) {
                return Err(WriteError::Validation("branch unchanged".to_owned()));
            }
            (cmp.patch, Some(cmp.rev2))
        }
    };

    if patch.is_empty() {
        return Err(WriteError::Validation("patch is empty".to_owned()));
    }
    if patch == last.patch {
        return Err(WriteError::Validation(
            "patch is identical to the previous submission".to_owned(),
        ));
    }
    if !is_valid_patch(&patch) {
        return Err(WriteError::Validation("patch is not a recognizable diff".to_owned()));
    }

    // update the pull record in place (same rkey) with the new active patch
    let record = PullRecord {
        repo: AtUri::parse(&pull.repo_at)
            .map_err(|e| WriteError::Integrity(format!("stored repo uri: {e}")))?,
        title: pull.title.clone(),
        body: pull.body.clone(),
        target_branch: pull.target_branch.clone(),
        patch: patch.clone(),
        source: pull.source_branch.clone().map(|branch| PullSourceRef {
            branch,
            repo: pull
                .source_repo_at
                .as_deref()
                .and_then(|s| AtUri::parse(s).ok()),
        }),
        source_rev: source_rev.clone(),
        created_at: Utc::now(),
    };
    let rkey = pull_at.rkey().to_owned();
    ctx.records
        .put(session, collections::PULL, &rkey, serde_json::to_value(&record)?)
        .await?;

    let round = last.round + 1;
    pulls_db::insert_submission(
        ctx.db.pool(),
        &pull_at.to_string(),
        round,
        &patch,
        source_rev.as_deref(),
        record.created_at,
    )
    .await?;

    if let Ok(owner) = Did::new(repo.did) {
        ctx.notifier
            .notify(&NotificationEvent {
                recipient: owner,
                actor: session.did.clone(),
                kind: NotificationKind::PullResubmitted,
                entity: Some(pull_at.to_string()),
            })
            .await;
    }
    Ok(round)
}

/// Merge the active patch on the knot. On success the local state flips to
/// `merged`; on a knot failure nothing changes and the caller surfaces a
/// notice.
pub async fn merge(
    ctx: &WriteCtx,
    session: &PdsSession,
    pull_at: &AtUri,
) -> Result<(), WriteError> {
    let pull = pulls_db::get_by_at_uri(ctx.db.pool(), &pull_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("pull {pull_at}")))?;
    if !pull.is_open() {
        return Err(WriteError::Validation("pull is not open".to_owned()));
    }
    let repo = repos::get_by_at_uri(ctx.db.pool(), &pull.repo_at)
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {}", pull.repo_at)))?;
    let resource = format!("{}/{}", repo.did, repo.name);
    if !ctx
        .enforcer
        .enforce(session.did.as_str(), &repo.knot, &resource, actions::REPO_PUSH)
    {
        return Err(WriteError::Denied);
    }

    let last = pulls_db::last_submission(ctx.db.pool(), &pull_at.to_string())
        .await?
        .ok_or_else(|| WriteError::Integrity(format!("pull {pull_at} has no round 0")))?;

    // author identity travels with the merge commit: handle + primary email
    let author_email = emails::get_primary(ctx.db.pool(), &pull.did)
        .await?
        .map_or_else(|| format!("{}@noreply.tangled.sh", pull.did), |e| e.address);
    let mut author_name = pull.did.clone();
    if let (Some(identities), Ok(author_did)) = (&ctx.identities, Did::new(pull.did.clone())) {
        if let Ok(identity) = identities.resolve_did(&author_did).await {
            if let Some(handle) = identity.handle {
                author_name = handle.to_string();
            }
        }
    }
    let request = MergeRequest {
        branch: pull.target_branch.clone(),
        commit_message: pull.title.clone(),
        commit_body: pull.body.clone(),
        author_name,
        author_email,
        patch: last.patch,
    };
    let owner = Did::new(repo.did.clone())
        .map_err(|e| WriteError::Integrity(format!("stored repo owner: {e}")))?;
    ctx.nodes.merge(&repo.knot, &owner, &repo.name, &request).await?;

    pulls_db::set_state(ctx.db.pool(), &pull_at.to_string(), pulls_db::STATE_MERGED).await?;

    if let Ok(author) = Did::new(pull.did) {
        ctx.notifier
            .notify(&NotificationEvent {
                recipient: author,
                actor: session.did.clone(),
                kind: NotificationKind::PullMerged,
                entity: Some(pull_at.to_string()),
            })
            .await;
    }
    Ok(())
}

pub async fn close_pull(
    ctx: &WriteCtx,
    session: &PdsSession,
    pull_at: &AtUri,
) -> Result<(), WriteError> {
    let pull = pulls_db::get_by_at_uri(ctx.db.pool(), &pull_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("pull {pull_at}")))?;
    if !pull.is_open() {
        return Err(WriteError::Validation("pull is not open".to_owned()));
    }
    let repo = repos::get_by_at_uri(ctx.db.pool(), &pull.repo_at)
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {}", pull.repo_at)))?;
    let resource = format!("{}/{}", repo.did, repo.name);
    let is_author = pull.did == session.did.as_str();
    if !is_author
        && !ctx
            .enforcer
            .enforce(session.did.as_str(), &repo.knot, &resource, actions::REPO_SETTINGS)
    {
        return Err(WriteError::Denied);
    }

    pulls_db::set_state(ctx.db.pool(), &pull_at.to_string(), pulls_db::STATE_CLOSED).await?;

    if let Ok(author) = Did::new(pull.did) {
        ctx.notifier
            .notify(&NotificationEvent {
                recipient: author,
                actor: session.did.clone(),
                kind: NotificationKind::PullClosed,
                entity: Some(pull_at.to_string()),
            })
            .await;
    }
    Ok(())
}
