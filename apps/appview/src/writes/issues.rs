//! Issue writes: open, close, reopen, comment. Close/reopen are events at
//! the record layer (`sh.tangled.repo.issue.state`), not state fields.

use chrono::Utc;

use tangled_db::notifications::NotificationKind;
use tangled_db::{DbError, issues as issues_db, repos};
use tangled_rbac::actions;
use tangled_types::records::{IssueCommentRecord, IssueRecord, IssueState, IssueStateRecord};
use tangled_types::{AtUri, Did, Tid, collections};
use tangled_xrpc::pds::PdsSession;

use crate::notify::NotificationEvent;

use super::{Rollback, WriteCtx, WriteError};

pub async fn new_issue(
    ctx: &WriteCtx,
    session: &PdsSession,
    repo_at: &AtUri,
    title: &str,
    body: Option<String>,
) -> Result<AtUri, WriteError> {
    if title.trim().is_empty() {
        return Err(WriteError::Validation("issue title is empty".to_owned()));
    }
    let repo = repos::get_by_at_uri(ctx.db.pool(), &repo_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {repo_at}")))?;

    let rkey = Tid::now();
    let record = IssueRecord {
        repo: repo_at.clone(),
        title: title.to_owned(),
        body: body.clone(),
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::ISSUE,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete issue record", async move {
            records.delete(&session, collections::ISSUE, rkey.as_str()).await
        });
    }

    let outcome = async {
        let mut tx = ctx.db.begin().await?;
        let number = issues_db::next_issue_id(&mut *tx, &repo_at.to_string()).await?;
        issues_db::insert(
            &mut *tx,
            &issues_db::NewIssue {
                at_uri: uri.to_string(),
                repo_at: repo_at.to_string(),
                did: session.did.as_str().to_owned(),
                title: title.to_owned(),
                body,
                created_at: record.created_at,
            },
            number,
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
                    kind: NotificationKind::IssueOpened,
                    entity: Some(uri.to_string()),
                })
                .await;
        }
    }
    result.map(|()| uri)
}

async fn set_issue_state(
    ctx: &WriteCtx,
    session: &PdsSession,
    issue_at: &AtUri,
    state: IssueState,
) -> Result<(), WriteError> {
    let issue = issues_db::get_by_at_uri(ctx.db.pool(), &issue_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("issue {issue_at}")))?;
    let repo = repos::get_by_at_uri(ctx.db.pool(), &issue.repo_at)
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("repo {}", issue.repo_at)))?;

    // the author may manage their own issue; anyone else needs settings
    let resource = format!("{}/{}", repo.did, repo.name);
    let is_author = issue.did == session.did.as_str();
    if !is_author
        && !ctx
            .enforcer
            .enforce(session.did.as_str(), &repo.knot, &resource, actions::REPO_SETTINGS)
    {
        return Err(WriteError::Denied);
    }

    let rkey = Tid::now();
    let record = IssueStateRecord {
        issue: issue_at.clone(),
        state,
        created_at: Utc::now(),
    };
    ctx.records
        .put(
            session,
            collections::ISSUE_STATE,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete issue state record", async move {
            records
                .delete(&session, collections::ISSUE_STATE, rkey.as_str())
                .await
        });
    }

    let outcome = async {
        issues_db::set_open(
            ctx.db.pool(),
            &issue_at.to_string(),
            matches!(state, IssueState::Open),
        )
        .await?;
        Ok(())
    }
    .await;
    ctx.finish(outcome, rollback).await
}

pub async fn close_issue(
    ctx: &WriteCtx,
    session: &PdsSession,
    issue_at: &AtUri,
) -> Result<(), WriteError> {
    set_issue_state(ctx, session, issue_at, IssueState::Closed).await
}

pub async fn reopen_issue(
    ctx: &WriteCtx,
    session: &PdsSession,
    issue_at: &AtUri,
) -> Result<(), WriteError> {
    set_issue_state(ctx, session, issue_at, IssueState::Open).await
}

pub async fn comment(
    ctx: &WriteCtx,
    session: &PdsSession,
    issue_at: &AtUri,
    body: &str,
    reply_to: Option<AtUri>,
) -> Result<AtUri, WriteError> {
    if body.trim().is_empty() {
        return Err(WriteError::Validation("comment body is empty".to_owned()));
    }
    let issue = issues_db::get_by_at_uri(ctx.db.pool(), &issue_at.to_string())
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("issue {issue_at}")))?;

    let rkey = Tid::now();
    let record = IssueCommentRecord {
        issue: issue_at.clone(),
        body: body.to_owned(),
        reply_to: reply_to.clone(),
        created_at: Utc::now(),
    };
    let uri = ctx
        .records
        .put(
            session,
            collections::ISSUE_COMMENT,
            rkey.as_str(),
            serde_json::to_value(&record)?,
        )
        .await?;

    let mut rollback = Rollback::new();
    {
        let records = std::sync::Arc::clone(&ctx.records);
        let session = session.clone();
        let rkey = rkey.clone();
        rollback.push("delete comment record", async move {
            records
                .delete(&session, collections::ISSUE_COMMENT, rkey.as_str())
                .await
        });
    }

    let outcome = async {
        issues_db::insert_comment(
            ctx.db.pool(),
            &issues_db::IssueComment {
                id: 0,
                at_uri: uri.to_string(),
                issue_at: issue_at.to_string(),
                did: session.did.as_str().to_owned(),
                body: body.to_owned(),
                reply_to: reply_to.map(|r| r.to_string()),
                created_at: record.created_at,
            },
        )
        .await?;
        Ok(())
    }
    .await;
    let result = ctx.finish(outcome, rollback).await;

    if result.is_ok() {
        if let Ok(author) = Did::new(issue.did) {
            ctx.notifier
                .notify(&NotificationEvent {
                    recipient: author,
                    actor: session.did.clone(),
                    kind: NotificationKind::IssueCommented,
                    entity: Some(issue_at.to_string()),
                })
                .await;
        }
    }
    result.map(|()| uri)
}
