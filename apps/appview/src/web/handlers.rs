//! Thin HTTP handlers. Each one resolves identity, runs the appropriate
//! permission gate, delegates to the write coordinator or a read query,
//! and renders JSON (the HTML/HTMX surface sits in front of these).

use axum::Extension;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;

use tangled_db::{notifications, public_keys, pulls as pulls_db, refs};
use tangled_rbac::actions;
use tangled_types::{AtUri, Did, Handle};

use crate::patch;
use crate::resolve::{OwnerRef, ResolvedRepo};
use crate::state::{AppState, NewSource};
use crate::web::auth::AuthUser;
use crate::web::error::AppError;
use crate::writes::{self, WriteError};

/// Handlers take the signed-in user from the auth middleware's extension;
/// its absence on a mutating route is an authorization failure.
fn require_user(user: Option<Extension<AuthUser>>) -> Result<AuthUser, AppError> {
    user.map(|Extension(user)| user).ok_or_else(|| WriteError::Denied.into())
}

/// Resolve an owner/repo path pair, redirecting non-canonical forms.
async fn resolve_or_redirect(
    state: &AppState,
    owner: &str,
    repo: &str,
) -> Result<Result<ResolvedRepo, Redirect>, AppError> {
    let resolved = state.repos.resolve(owner, repo).await?;
    let owner_ref = OwnerRef::parse(owner)?;
    if !owner_ref.is_canonical(owner) && resolved.handle.is_some() {
        return Ok(Err(Redirect::to(&resolved.canonical_path())));
    }
    Ok(Ok(resolved))
}

/// A subject that may be written as a handle or a DID.
async fn resolve_actor(state: &AppState, subject: &str) -> Result<Did, AppError> {
    if subject.starts_with("did:") {
        return Did::new(subject)
            .map_err(|e| WriteError::Validation(e.to_string()).into());
    }
    let handle = Handle::new(subject)
        .map_err(|e| AppError::from(WriteError::Validation(e.to_string())))?;
    state
        .identities
        .resolve_handle(&handle)
        .await
        .map_err(|e| WriteError::RemoteUnavailable(e.to_string()).into())
}

// ── timeline ─────────────────────────────────────────────────────────

pub async fn index(State(state): State<AppState>) -> Result<Response, AppError> {
    let updates = refs::recent(state.db.pool(), 50).await?;
    let body: Vec<_> = updates
        .into_iter()
        .map(|u| {
            serde_json::json!({
                "knot": u.knot,
                "repo": format!("{}/{}", u.repo_did, u.repo_name),
                "ref": u.ref_name,
                "sha": u.new_sha,
                "at": u.created_at,
            })
        })
        .collect();
    Ok(Json(body).into_response())
}

// ── graph ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubjectForm {
    pub subject: String,
}

pub async fn follow(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<SubjectForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let subject = resolve_actor(&state, &form.subject).await?;
    let uri = writes::graph::follow(&state.writes, &user.session, &subject).await?;
    Ok(Json(serde_json::json!({ "uri": uri })).into_response())
}

pub async fn unfollow(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<SubjectForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let subject = resolve_actor(&state, &form.subject).await?;
    writes::graph::unfollow(&state.writes, &user.session, &subject).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn star(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<SubjectForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let subject = AtUri::parse(&form.subject)
        .map_err(|e| AppError::from(WriteError::Validation(e.to_string())))?;
    let uri = writes::graph::star(&state.writes, &user.session, &subject).await?;
    Ok(Json(serde_json::json!({ "uri": uri })).into_response())
}

pub async fn unstar(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<SubjectForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let subject = AtUri::parse(&form.subject)
        .map_err(|e| AppError::from(WriteError::Validation(e.to_string())))?;
    writes::graph::unstar(&state.writes, &user.session, &subject).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── repos ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct NewRepoForm {
    pub name: String,
    pub knot: String,
    pub description: Option<String>,
    pub default_branch: Option<String>,
}

pub async fn repo_new(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<NewRepoForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let uri = writes::repos::create_repo(
        &state.writes,
        &user.session,
        writes::repos::NewRepoInput {
            name: form.name,
            knot: form.knot,
            description: form.description,
            default_branch: form.default_branch,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "uri": uri }))).into_response())
}

#[derive(Deserialize)]
pub struct ForkForm {
    pub source: String,
    pub knot: String,
    pub name: Option<String>,
}

pub async fn repo_fork(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<ForkForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let source = AtUri::parse(&form.source)
        .map_err(|e| AppError::from(WriteError::Validation(e.to_string())))?;
    let uri = writes::repos::fork_repo(
        &state.writes,
        &user.session,
        writes::repos::ForkInput {
            source,
            knot: form.knot,
            name: form.name,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "uri": uri }))).into_response())
}

pub async fn repo_page(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let resolved = match resolve_or_redirect(&state, &owner, &repo).await? {
        Ok(resolved) => resolved,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    Ok(Json(serde_json::json!({
        "owner": resolved.owner,
        "handle": resolved.handle,
        "name": resolved.repo.name,
        "knot": resolved.repo.knot,
        "description": resolved.repo.description,
        "defaultBranch": resolved.repo.default_branch,
        "source": resolved.repo.source_at,
        "atUri": resolved.repo.at_uri,
    }))
    .into_response())
}

pub async fn repo_delete(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let resolved = state.repos.resolve(&owner, &repo).await?;
    let at_uri = AtUri::parse(&resolved.repo.at_uri)
        .map_err(|e| AppError::from(WriteError::Integrity(e.to_string())))?;
    writes::repos::delete_repo(&state.writes, &user.session, &at_uri).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
pub struct CollaboratorForm {
    pub collaborator: String,
}

pub async fn collaborator_add(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo)): Path<(String, String)>,
    Form(form): Form<CollaboratorForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let resolved = state.repos.resolve(&owner, &repo).await?;
    let collaborator = resolve_actor(&state, &form.collaborator).await?;
    let at_uri = AtUri::parse(&resolved.repo.at_uri)
        .map_err(|e| AppError::from(WriteError::Integrity(e.to_string())))?;
    writes::repos::add_collaborator(&state.writes, &user.session, &at_uri, &collaborator).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── issues ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct NewIssueForm {
    pub title: String,
    pub body: Option<String>,
}

pub async fn issue_new(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo)): Path<(String, String)>,
    Form(form): Form<NewIssueForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let resolved = state.repos.resolve(&owner, &repo).await?;
    let repo_at = AtUri::parse(&resolved.repo.at_uri)
        .map_err(|e| AppError::from(WriteError::Integrity(e.to_string())))?;
    let uri =
        writes::issues::new_issue(&state.writes, &user.session, &repo_at, &form.title, form.body)
            .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "uri": uri }))).into_response())
}

async fn issue_at(
    state: &AppState,
    owner: &str,
    repo: &str,
    number: i64,
) -> Result<AtUri, AppError> {
    let resolved = state.repos.resolve(owner, repo).await?;
    let issue =
        tangled_db::issues::get_by_number(state.db.pool(), &resolved.repo.at_uri, number)
            .await?
            .ok_or_else(|| WriteError::NotFound(format!("issue #{number}")))?;
    AtUri::parse(&issue.at_uri).map_err(|e| WriteError::Integrity(e.to_string()).into())
}

pub async fn issue_close(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let at = issue_at(&state, &owner, &repo, number).await?;
    writes::issues::close_issue(&state.writes, &user.session, &at).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn issue_reopen(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let at = issue_at(&state, &owner, &repo, number).await?;
    writes::issues::reopen_issue(&state.writes, &user.session, &at).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
pub struct CommentForm {
    pub body: String,
    pub reply_to: Option<String>,
}

pub async fn issue_comment(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
    Form(form): Form<CommentForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let at = issue_at(&state, &owner, &repo, number).await?;
    let reply_to = form
        .reply_to
        .as_deref()
        .map(AtUri::parse)
        .transpose()
        .map_err(|e| AppError::from(WriteError::Validation(e.to_string())))?;
    let uri =
        writes::issues::comment(&state.writes, &user.session, &at, &form.body, reply_to).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "uri": uri }))).into_response())
}

// ── pulls ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct NewPullForm {
    pub title: String,
    pub body: Option<String>,
    pub target_branch: String,
    pub patch: Option<String>,
    pub source_branch: Option<String>,
    pub source_repo: Option<String>,
}

pub async fn pull_new(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo)): Path<(String, String)>,
    Form(form): Form<NewPullForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let resolved = state.repos.resolve(&owner, &repo).await?;
    let repo_at = AtUri::parse(&resolved.repo.at_uri)
        .map_err(|e| AppError::from(WriteError::Integrity(e.to_string())))?;

    let source = match (form.patch, form.source_branch, form.source_repo) {
        (Some(patch), None, None) => writes::pulls::PullSource::Patch { patch },
        (None, Some(branch), None) => writes::pulls::PullSource::Branch { branch },
        (None, Some(branch), Some(repo_at)) => {
            let repo_at = AtUri::parse(&repo_at)
                .map_err(|e| AppError::from(WriteError::Validation(e.to_string())))?;
            writes::pulls::PullSource::Fork { repo_at, branch }
        }
        _ => {
            return Err(WriteError::Validation(
                "provide exactly one of patch, source_branch, or source_branch+source_repo"
                    .to_owned(),
            )
            .into());
        }
    };

    let uri = writes::pulls::new_pull(
        &state.writes,
        &user.session,
        writes::pulls::NewPullInput {
            repo_at,
            title: form.title,
            body: form.body,
            target_branch: form.target_branch,
            source,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "uri": uri }))).into_response())
}

async fn pull_at(
    state: &AppState,
    owner: &str,
    repo: &str,
    number: i64,
) -> Result<AtUri, AppError> {
    let resolved = state.repos.resolve(owner, repo).await?;
    let pull = pulls_db::get_by_number(state.db.pool(), &resolved.repo.at_uri, number)
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("pull #{number}")))?;
    AtUri::parse(&pull.at_uri).map_err(|e| WriteError::Integrity(e.to_string()).into())
}

pub async fn pull_merge(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let at = pull_at(&state, &owner, &repo, number).await?;
    writes::pulls::merge(&state.writes, &user.session, &at).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
pub struct ResubmitForm {
    pub patch: Option<String>,
}

pub async fn pull_resubmit(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
    Form(form): Form<ResubmitForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let at = pull_at(&state, &owner, &repo, number).await?;
    let round = writes::pulls::resubmit(&state.writes, &user.session, &at, form.patch).await?;
    Ok(Json(serde_json::json!({ "round": round })).into_response())
}

pub async fn pull_close(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let at = pull_at(&state, &owner, &repo, number).await?;
    writes::pulls::close_pull(&state.writes, &user.session, &at).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Diff between round N-1 and round N of a pull. An interdiff failure is a
/// per-round notice, never a page failure.
pub async fn pull_interdiff(
    State(state): State<AppState>,
    Path((owner, repo, number, round)): Path<(String, String, i64, i64)>,
) -> Result<Response, AppError> {
    if round < 1 {
        return Err(WriteError::Validation("interdiff starts at round 1".to_owned()).into());
    }
    let at = pull_at(&state, &owner, &repo, number).await?;
    let submissions = pulls_db::list_submissions(state.db.pool(), &at.to_string()).await?;
    let previous = submissions.iter().find(|s| s.round == round - 1);
    let current = submissions.iter().find(|s| s.round == round);
    let (Some(previous), Some(current)) = (previous, current) else {
        return Err(WriteError::NotFound(format!("round {round}")).into());
    };

    let body = match patch::interdiff(&previous.patch, &current.patch) {
        Ok(diff) => serde_json::json!({ "round": round, "interdiff": diff }),
        Err(err) => serde_json::json!({ "round": round, "error": err.to_string() }),
    };
    Ok(Json(body).into_response())
}

// ── keys ─────────────────────────────────────────────────────────────

/// Plain-text, newline-separated authorized keys; consumed by knots'
/// `AuthorizedKeysCommand`.
pub async fn keys(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Response, AppError> {
    let did = resolve_actor(&state, user.trim_start_matches('@')).await?;
    let keys = public_keys::list_for_did(state.db.pool(), did.as_str()).await?;
    let body = keys.into_iter().map(|k| k.key).collect::<Vec<_>>().join("\n");
    Ok(([("content-type", "text/plain; charset=utf-8")], body).into_response())
}

// ── knots & spindles ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DomainForm {
    pub domain: String,
}

/// Registered knots with their lifecycle flags. `needs_upgrade` feeds the
/// admin banner; it never changes authorization.
pub async fn knots_list(State(state): State<AppState>) -> Result<Response, AppError> {
    let rows = tangled_db::knots::list_all(state.db.pool()).await?;
    let body: Vec<_> = rows
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "domain": r.domain,
                "owner": r.did,
                "verified": r.verified,
                "needsUpgrade": r.needs_upgrade,
            })
        })
        .collect();
    Ok(Json(body).into_response())
}

pub async fn knot_register(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<DomainForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let secret =
        writes::nodes::register_knot(&state.writes, user.did(), &form.domain, state.config.dev)
            .await?;
    // the secret is issued exactly once
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "secret": secret }))).into_response())
}

pub async fn knot_verify(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path(domain): Path<String>,
) -> Result<Response, AppError> {
    require_user(user)?;
    let registration = writes::nodes::verify_knot(&state.writes, &domain).await?;
    if registration.verified {
        // the consumer picks the new stream up asynchronously
        let _ = state.new_sources.send(NewSource::Knot(domain.clone())).await;
    }
    Ok(Json(serde_json::json!({ "domain": domain, "verified": registration.verified }))
        .into_response())
}

pub async fn spindle_register(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<DomainForm>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    writes::nodes::register_spindle(&state.writes, user.did(), &form.domain, state.config.dev)
        .await?;
    Ok(StatusCode::CREATED.into_response())
}

pub async fn spindle_verify(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path(domain): Path<String>,
) -> Result<Response, AppError> {
    require_user(user)?;
    let spindle = writes::nodes::verify_spindle(&state.writes, &domain).await?;
    if spindle.verified {
        let _ = state.new_sources.send(NewSource::Spindle(domain.clone())).await;
    }
    Ok(Json(serde_json::json!({ "domain": domain, "verified": spindle.verified }))
        .into_response())
}

// ── notifications & admin ────────────────────────────────────────────

pub async fn notifications_list(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let rows =
        notifications::list_for_recipient(state.db.pool(), user.did().as_str(), false).await?;
    let body: Vec<_> = rows
        .into_iter()
        .map(|n| {
            serde_json::json!({
                "actor": n.actor_did,
                "kind": n.kind,
                "entity": n.entity_at,
                "read": n.is_read,
                "at": n.created_at,
            })
        })
        .collect();
    Ok(Json(body).into_response())
}

pub async fn notifications_read(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    notifications::mark_all_read(state.db.pool(), user.did().as_str()).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Walks local records and reports PDS drift. Server operators only.
pub async fn admin_reconcile(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
) -> Result<Response, AppError> {
    let user = require_user(user)?;
    let host = &state.config.appview_host;
    if !state
        .enforcer
        .enforce(user.did().as_str(), host, host, actions::SERVER_OWNER)
    {
        return Err(WriteError::Denied.into());
    }
    let report =
        crate::reconcile::reconcile_repos(&state.db, &state.pds, &state.identities).await?;
    Ok(Json(serde_json::json!({
        "checked": report.checked,
        "missingUpstream": report.missing_upstream,
        "unresolvable": report.unresolvable,
    }))
    .into_response())
}
