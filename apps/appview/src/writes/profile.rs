//! Profile and public-key writes.

use chrono::Utc;

use tangled_db::{profiles, public_keys, repos};
use tangled_types::records::{ProfileRecord, PublicKeyRecord};
use tangled_types::{AtUri, Tid, collections};
use tangled_xrpc::pds::PdsSession;

use super::{Rollback, WriteCtx, WriteError};

/// Profiles live under a fixed rkey: one record per DID.
const PROFILE_RKEY: &str = "self";

pub struct ProfileInput {
    pub description: Option<String>,
    pub location: Option<String>,
    pub links: Vec<String>,
    pub pinned: Vec<AtUri>,
    pub stats: Vec<String>,
}

pub async fn update_profile(
    ctx: &WriteCtx,
    session: &PdsSession,
    input: ProfileInput,
) -> Result<(), WriteError> {
    if input.pinned.len() > profiles::MAX_PINNED {
        return Err(WriteError::Validation(format!(
            "at most {} repositories can be pinned",
            profiles::MAX_PINNED
        )));
    }
    if input.stats.len() > profiles::MAX_STATS {
        return Err(WriteError::Validation(format!(
            "at most {} vanity stats can be selected",
            profiles::MAX_STATS
        )));
    }
    // pins must reference repos this appview knows about
    for pin in &input.pinned {
        if repos::get_by_at_uri(ctx.db.pool(), &pin.to_string()).await?.is_none() {
            return Err(WriteError::Validation(format!("pinned repo {pin} is unknown")));
        }
    }

    let record = ProfileRecord {
        description: input.description.clone(),
        location: input.location.clone(),
        links: input.links.clone(),
        pinned_repositories: input.pinned.clone(),
        stats: input.stats.clone(),
        created_at: Some(Utc::now()),
    };
    ctx.records
        .put(
            session,
            collections::PROFILE,
            PROFILE_RKEY,
            serde_json::to_value(&record)?,
        )
        .await?;

    profiles::upsert(
        ctx.db.pool(),
        &profiles::Profile {
            did: session.did.as_str().to_owned(),
            description: input.description,
            location: input.location,
            links: input.links,
            pinned: input.pinned.iter().map(ToString::to_string).collect(),
            stats: input.stats,
            created_at: record.created_at,
        },
    )
    .await?;
    Ok(())
}

pub async fn add_public_key(
    ctx: &WriteCtx,
    session: &PdsSession,
    name: Option<String>,
    key: &str,
) -> Result<AtUri, WriteError> {
    let key = key.trim();
    let looks_like_ssh = key.starts_with("ssh-") || key.starts_with("ecdsa-");
    if !looks_like_ssh || key.lines().count() != 1 {
        return Err(WriteError::Validation("not an SSH public key".to_owned()));
    }

    let rkey = Tid::now();
    let record = PublicKeyRecord {
        key: key.to_owned(),
        name: name.clone(),
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::PUBLIC_KEY,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete public key record", async move {
            records
                .delete(&session, collections::PUBLIC_KEY, rkey.as_str())
                .await
        });
    }

    let outcome = async {
        public_keys::insert(
            ctx.db.pool(),
            session.did.as_str(),
            rkey.as_str(),
            name.as_deref(),
            key,
            record.created_at,
        )
        .await?;
        Ok(())
    }
    .await;
    ctx.finish(outcome, rollback).await.map(|()| uri)
}

pub async fn remove_public_key(
    ctx: &WriteCtx,
    session: &PdsSession,
    rkey: &str,
) -> Result<(), WriteError> {
    ctx.records
        .delete(session, collections::PUBLIC_KEY, rkey)
        .await?;
    let removed = public_keys::delete_by_rkey(ctx.db.pool(), session.did.as_str(), rkey).await?;
    if !removed {
        return Err(WriteError::NotFound(format!("public key {rkey}")));
    }
    Ok(())
}
