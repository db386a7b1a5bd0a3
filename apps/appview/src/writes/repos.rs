//! Repository lifecycle: create, fork, delete, collaborators, settings.
//! These are the writes that span all three systems: PDS record, knot
//! call, local rows + ACLs.

use chrono::Utc;
use rand::Rng;

use tangled_db::{DbError, graph as graph_db, issues as issues_db, knots, labels, pulls as pulls_db, repos};
use tangled_rbac::actions;
use tangled_types::records::RepoRecord;
use tangled_types::{AtUri, Did, Tid, collections};
use tangled_xrpc::pds::PdsSession;

use super::{Rollback, WriteCtx, WriteError};

pub const DEFAULT_BRANCH: &str = "main";

fn validate_repo_name(name: &str) -> Result<(), WriteError> {
    let ok = !name.is_empty()
        && name.len() <= 100
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(WriteError::Validation(format!("invalid repository name {name:?}")))
    }
}

/// Three lowercase base-36 characters, appended on fork name collisions.
fn collision_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..3)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// The resource string ACL tuples are keyed on.
fn acl_resource(did: &Did, name: &str) -> String {
    format!("{}/{}", did.as_str(), name)
}

async fn require_verified_knot(ctx: &WriteCtx, domain: &str) -> Result<(), WriteError> {
    let registration = knots::get_by_domain(ctx.db.pool(), domain).await?;
    match registration {
        Some(reg) if reg.verified => Ok(()),
        Some(_) => Err(WriteError::Validation(format!("knot {domain} is not verified"))),
        None => Err(WriteError::Validation(format!("knot {domain} is not registered"))),
    }
}

pub struct NewRepoInput {
    pub name: String,
    pub knot: String,
    pub description: Option<String>,
    pub default_branch: Option<String>,
}

pub async fn create_repo(
    ctx: &WriteCtx,
    session: &PdsSession,
    input: NewRepoInput,
) -> Result<AtUri, WriteError> {
    // Phase A: validation and optimistic checks
    validate_repo_name(&input.name)?;
    require_verified_knot(ctx, &input.knot).await?;
    if !ctx
        .enforcer
        .enforce(session.did.as_str(), &input.knot, &input.knot, actions::REPO_CREATE)
    {
        return Err(WriteError::Denied);
    }
    if repos::name_exists(ctx.db.pool(), session.did.as_str(), &input.name).await? {
        return Err(WriteError::Validation(format!(
            "you already have a repository named {}",
            input.name
        )));
    }

    let default_branch = input.default_branch.unwrap_or_else(|| DEFAULT_BRANCH.to_owned());
    let rkey = Tid::now();
    let record = RepoRecord {
        name: input.name.clone(),
        knot: input.knot.clone(),
        description: input.description.clone(),
        source: None,
        spindle: None,
        created_at: Utc::now(),
    };

    // Phase B: PDS write; the AT-URI it returns is authoritative
    let uri = ctx
        .records
        .put(
            session,
            collections::REPO,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete repo record", async move {
            records.delete(&session, collections::REPO, rkey.as_str()).await
        });
    }

    // Phase C: create the bare repository on the knot
    let created = ctx
        .nodes
        .create_repo(&input.knot, &session.did, &input.name, &default_branch)
        .await;
    if let Err(err) = created {
        rollback.run().await;
        return Err(err);
    }
    {
        let nodes = std::sync::Arc::clone(&ctx.nodes);
        let knot = input.knot.clone();
        let did = session.did.clone();
        let name = input.name.clone();
        rollback.push("delete repo on knot", async move {
            nodes.delete_repo(&knot, &did, &name).await
        });
    }

    // Phase D: local row, ACLs, durable policy
    let resource = acl_resource(&session.did, &input.name);
    let outcome = async {
        let mut tx = ctx.db.begin().await?;
        repos::insert(
            &mut *tx,
            &repos::NewRepo {
                did: session.did.as_str().to_owned(),
                name: input.name.clone(),
                knot: input.knot.clone(),
                rkey: rkey.as_str().to_owned(),
                at_uri: uri.to_string(),
                description: input.description.clone(),
                source_at: None,
                spindle: None,
                created_at: record.created_at,
            },
        )
        .await?;
        ctx.enforcer.add_repo(session.did.as_str(), &input.knot, &resource);
        tx.commit().await.map_err(DbError::from)?;
        if let Err(err) = ctx.enforcer.save_policy().await {
            ctx.enforcer.load_policy().await?;
            return Err(err.into());
        }
        Ok(())
    }
    .await;

    if outcome.is_err() {
        // restore the in-memory policy before compensating remotes
        if let Err(reload) = ctx.enforcer.load_policy().await {
            tracing::error!("policy reload after failed create: {reload}");
        }
    }
    ctx.finish(outcome, rollback).await.map(|()| uri)
}

pub struct ForkInput {
    /// AT-URI of the repo being forked.
    pub source: AtUri,
    /// Target knot for the fork.
    pub knot: String,
    /// Desired name; defaults to the source repo's name.
    pub name: Option<String>,
}

/// Fork an existing repo into the caller's account. On a name collision the
/// fork is created as `name-<3 random chars>`; the knot call and PDS record
/// both carry the new name and the existing repo is untouched.
pub async fn fork_repo(
    ctx: &WriteCtx,
    session: &PdsSession,
    input: ForkInput,
) -> Result<AtUri, WriteError> {
    let source = repos::get_by_at_uri(ctx.db.pool(), &input.source.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("source repo {}", input.source)))?;

    require_verified_knot(ctx, &input.knot).await?;
    if !ctx
        .enforcer
        .enforce(session.did.as_str(), &input.knot, &input.knot, actions::REPO_CREATE)
    {
        return Err(WriteError::Denied);
    }

    let mut name = input.name.unwrap_or_else(|| source.name.clone());
    validate_repo_name(&name)?;
    if repos::name_exists(ctx.db.pool(), session.did.as_str(), &name).await? {
        name = format!("{name}-{}", collision_suffix());
    }

    let rkey = Tid::now();
    let record = RepoRecord {
        name: name.clone(),
        knot: input.knot.clone(),
        description: source.description.clone(),
        source: Some(input.source.clone()),
        spindle: None,
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::REPO,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete fork record", async move {
            records.delete(&session, collections::REPO, rkey.as_str()).await
        });
    }

    // the knot clones from the source's git URL form: did/name on its host
    let source_spec = format!("{}/{}", source.did, source.name);
    if let Err(err) = ctx
        .nodes
        .fork_repo(&input.knot, &session.did, &source_spec, &name)
        .await
    {
        rollback.run().await;
        return Err(err);
    }
    {
        let nodes = std::sync::Arc::clone(&ctx.nodes);
        let knot = input.knot.clone();
        let did = session.did.clone();
        let fork_name = name.clone();
        rollback.push("delete fork on knot", async move {
            nodes.delete_repo(&knot, &did, &fork_name).await
        });
    }

    let resource = acl_resource(&session.did, &name);
    let outcome = async {
        let mut tx = ctx.db.begin().await?;
        repos::insert(
            &mut *tx,
            &repos::NewRepo {
                did: session.did.as_str().to_owned(),
                name: name.clone(),
                knot: input.knot.clone(),
                rkey: rkey.as_str().to_owned(),
                at_uri: uri.to_string(),
                description: source.description.clone(),
                source_at: Some(input.source.to_string()),
                spindle: None,
                created_at: record.created_at,
            },
        )
        .await?;
        ctx.enforcer.add_repo(session.did.as_str(), &input.knot, &resource);
        tx.commit().await.map_err(DbError::from)?;
        if let Err(err) = ctx.enforcer.save_policy().await {
            ctx.enforcer.load_policy().await?;
            return Err(err.into());
        }
        Ok(())
    }
    .await;

    if outcome.is_err() {
        if let Err(reload) = ctx.enforcer.load_policy().await {
            tracing::error!("policy reload after failed fork: {reload}");
        }
    }
    ctx.finish(outcome, rollback).await.map(|()| uri)
}

/// Delete a repo everywhere. Cascades locally to issues, pulls, stars and
/// labels, and revokes every ACL subject on the resource.
pub async fn delete_repo(
    ctx: &WriteCtx,
    session: &PdsSession,
    repo_at: &AtUri,
) -> Result<(), WriteError> {
    let repo = repos::get_by_at_uri(ctx.db.pool(), &repo_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {repo_at}")))?;
    let resource = format!("{}/{}", repo.did, repo.name);
    if !ctx
        .enforcer
        .enforce(session.did.as_str(), &repo.knot, &resource, actions::REPO_DELETE)
    {
        return Err(WriteError::Denied);
    }

    // Phase B: remove the authoritative record; keep enough state to re-put
    // it if a later phase fails.
    let original = RepoRecord {
        name: repo.name.clone(),
        knot: repo.knot.clone(),
        description: repo.description.clone(),
        source: repo.source_at.as_deref().and_then(|s| AtUri::parse(s).ok()),
        spindle: repo.spindle.clone(),
        created_at: repo.created_at,
    };
    ctx.records.delete(session, collections::REPO, &repo.rkey).await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = repo.rkey.clone();
        let value = serde_json::to_value(&original)?;
        rollback.push("restore repo record", async move {
            records.put(&session, collections::REPO, &rkey, value).await.map(|_| ())
        });
    }

    // Phase C: remove the bare repository
    let owner = Did::new(repo.did.clone())
        .map_err(|e| WriteError::Integrity(format!("stored repo owner: {e}")))?;
    if let Err(err) = ctx.nodes.delete_repo(&repo.knot, &owner, &repo.name).await {
        rollback.run().await;
        return Err(err);
    }

    // Phase D: local cascade + ACL revocation
    let outcome = async {
        let repo_key = repo_at.to_string();
        let mut tx = ctx.db.begin().await?;
        issues_db::delete_for_repo(&mut *tx, &repo_key).await?;
        pulls_db::delete_for_repo(&mut tx, &repo_key).await?;
        graph_db::delete_stars_of_subject(&mut *tx, &repo_key).await?;
        labels::delete_for_repo(&mut tx, &repo_key).await?;
        repos::delete_by_at_uri(&mut *tx, &repo_key).await?;
        ctx.enforcer.remove_repo(&repo.knot, &resource);
        tx.commit().await.map_err(DbError::from)?;
        if let Err(err) = ctx.enforcer.save_policy().await {
            ctx.enforcer.load_policy().await?;
            return Err(err.into());
        }
        Ok(())
    }
    .await;

    if outcome.is_err() {
        if let Err(reload) = ctx.enforcer.load_policy().await {
            tracing::error!("policy reload after failed delete: {reload}");
        }
    }
    ctx.finish(outcome, rollback).await
}

/// Collaborator add: knot-side SSH principal registration plus ACL grant.
/// No PDS record is involved.
pub async fn add_collaborator(
    ctx: &WriteCtx,
    session: &PdsSession,
    repo_at: &AtUri,
    collaborator: &Did,
) -> Result<(), WriteError> {
    let repo = repos::get_by_at_uri(ctx.db.pool(), &repo_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {repo_at}")))?;
    let resource = format!("{}/{}", repo.did, repo.name);
    if !ctx
        .enforcer
        .enforce(session.did.as_str(), &repo.knot, &resource, actions::REPO_INVITE)
    {
        return Err(WriteError::Denied);
    }
    if collaborator.as_str() == repo.did {
        return Err(WriteError::Validation("owner is already a collaborator".to_owned()));
    }

    let owner = Did::new(repo.did.clone())
        .map_err(|e| WriteError::Integrity(format!("stored repo owner: {e}")))?;
    ctx.nodes
        .add_collaborator(&repo.knot, &owner, &repo.name, collaborator)
        .await?;

    ctx.enforcer
        .add_collaborator(collaborator.as_str(), &repo.knot, &resource);
    if let Err(err) = ctx.enforcer.save_policy().await {
        ctx.enforcer.load_policy().await?;
        return Err(err.into());
    }
    Ok(())
}

pub async fn set_default_branch(
    ctx: &WriteCtx,
    session: &PdsSession,
    repo_at: &AtUri,
    branch: &str,
) -> Result<(), WriteError> {
    if branch.is_empty() {
        return Err(WriteError::Validation("branch name is empty".to_owned()));
    }
    let repo = repos::get_by_at_uri(ctx.db.pool(), &repo_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {repo_at}")))?;
    let resource = format!("{}/{}", repo.did, repo.name);
    if !ctx
        .enforcer
        .enforce(session.did.as_str(), &repo.knot, &resource, actions::REPO_SETTINGS)
    {
        return Err(WriteError::Denied);
    }

    let owner = Did::new(repo.did.clone())
        .map_err(|e| WriteError::Integrity(format!("stored repo owner: {e}")))?;
    ctx.nodes
        .set_default_branch(&repo.knot, &owner, &repo.name, branch)
        .await?;
    repos::set_default_branch(ctx.db.pool(), &repo_at.to_string(), branch).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_names_are_validated() {
        assert!(validate_repo_name("core").is_ok());
        assert!(validate_repo_name("my.repo-2_x").is_ok());
        for bad in ["", ".", "..", "a/b", "a b", "a\tb"] {
            assert!(validate_repo_name(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn collision_suffix_is_three_base36_chars() {
        for _ in 0..100 {
            let suffix = collision_suffix();
            assert_eq!(suffix.len(), 3);
            assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }
}
