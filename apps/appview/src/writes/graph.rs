//! Social-graph mutations: follow, star, reaction edges.

use chrono::Utc;

use tangled_db::graph as graph_db;
use tangled_db::notifications::NotificationKind;
use tangled_types::records::{FollowRecord, ReactionRecord, StarRecord};
use tangled_types::{AtUri, Did, Tid, collections};
use tangled_xrpc::pds::PdsSession;

use crate::notify::NotificationEvent;

use super::{Rollback, WriteCtx, WriteError};

pub async fn follow(
    ctx: &WriteCtx,
    session: &PdsSession,
    subject: &Did,
) -> Result<AtUri, WriteError> {
    if session.did == *subject {
        return Err(WriteError::Validation("you cannot follow yourself".to_owned()));
    }
    if graph_db::follow_exists(ctx.db.pool(), session.did.as_str(), subject.as_str()).await? {
        return Err(WriteError::Validation("already following".to_owned()));
    }

    let rkey = Tid::now();
    let record = FollowRecord {
        subject: subject.clone(),
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::FOLLOW,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete follow record", async move {
            records.delete(&session, collections::FOLLOW, rkey.as_str()).await
        });
    }

    let outcome = async {
        graph_db::insert_follow(
            ctx.db.pool(),
            session.did.as_str(),
            subject.as_str(),
            rkey.as_str(),
            record.created_at,
        )
        .await?;
        Ok(())
    }
    .await;
    let result = ctx.finish(outcome, rollback).await;

    if result.is_ok() {
        ctx.notifier
            .notify(&NotificationEvent {
                recipient: subject.clone(),
                actor: session.did.clone(),
                kind: NotificationKind::Followed,
                entity: None,
            })
            .await;
    }
    result.map(|()| uri)
}

/// Unfollow restores the pre-state everywhere: the PDS record is removed
/// first (authoritative), then the local edge inside a transaction.
pub async fn unfollow(
    ctx: &WriteCtx,
    session: &PdsSession,
    subject: &Did,
) -> Result<(), WriteError> {
    let edge = graph_db::get_follow(ctx.db.pool(), session.did.as_str(), subject.as_str())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("no follow of {subject}")))?;

    ctx.records
        .delete(session, collections::FOLLOW, &edge.rkey)
        .await?;
    graph_db::delete_follow(ctx.db.pool(), session.did.as_str(), subject.as_str()).await?;
    Ok(())
}

pub async fn star(
    ctx: &WriteCtx,
    session: &PdsSession,
    subject: &AtUri,
) -> Result<AtUri, WriteError> {
    if graph_db::get_star(ctx.db.pool(), session.did.as_str(), &subject.to_string())
        .await?
        .is_some()
    {
        return Err(WriteError::Validation("already starred".to_owned()));
    }

    let rkey = Tid::now();
    let record = StarRecord {
        subject: subject.clone(),
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::STAR,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete star record", async move {
            records.delete(&session, collections::STAR, rkey.as_str()).await
        });
    }

    let outcome = async {
        graph_db::insert_star(
            ctx.db.pool(),
            session.did.as_str(),
            &subject.to_string(),
            rkey.as_str(),
            record.created_at,
        )
        .await?;
        Ok(())
    }
    .await;
    let result = ctx.finish(outcome, rollback).await;

    if result.is_ok() {
        if let Some(owner) = subject.authority_did() {
            ctx.notifier
                .notify(&NotificationEvent {
                    recipient: owner,
                    actor: session.did.clone(),
                    kind: NotificationKind::RepoStarred,
                    entity: Some(subject.to_string()),
                })
                .await;
        }
    }
    result.map(|()| uri)
}

pub async fn unstar(
    ctx: &WriteCtx,
    session: &PdsSession,
    subject: &AtUri,
) -> Result<(), WriteError> {
    let edge = graph_db::get_star(ctx.db.pool(), session.did.as_str(), &subject.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("no star on {subject}")))?;

    ctx.records.delete(session, collections::STAR, &edge.rkey).await?;
    graph_db::delete_star(ctx.db.pool(), session.did.as_str(), &subject.to_string()).await?;
    Ok(())
}

pub async fn react(
    ctx: &WriteCtx,
    session: &PdsSession,
    subject: &AtUri,
    kind: &str,
) -> Result<AtUri, WriteError> {
    if kind.is_empty() || kind.len() > 64 {
        return Err(WriteError::Validation("invalid reaction kind".to_owned()));
    }

    let rkey = Tid::now();
    let record = ReactionRecord {
        subject: subject.clone(),
        kind: kind.to_owned(),
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::REACTION,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete reaction record", async move {
            records.delete(&session, collections::REACTION, rkey.as_str()).await
        });
    }

    let outcome = async {
        graph_db::insert_reaction(
            ctx.db.pool(),
            session.did.as_str(),
            &subject.to_string(),
            kind,
            rkey.as_str(),
            record.created_at,
        )
        .await?;
        Ok(())
    }
    .await;
    ctx.finish(outcome, rollback).await.map(|()| uri)
}

pub async fn unreact(
    ctx: &WriteCtx,
    session: &PdsSession,
    subject: &AtUri,
    kind: &str,
) -> Result<(), WriteError> {
    let edges = graph_db::list_reactions(ctx.db.pool(), &subject.to_string()).await?;
    let edge = edges
        .into_iter()
        .find(|r| r.did == session.did.as_str() && r.kind == kind)
        .ok_or_else(|| WriteError::NotFound(format!("no {kind} reaction on {subject}")))?;

    ctx.records
        .delete(session, collections::REACTION, &edge.rkey)
        .await?;
    graph_db::delete_reaction(ctx.db.pool(), session.did.as_str(), &subject.to_string(), kind)
        .await?;
    Ok(())
}
