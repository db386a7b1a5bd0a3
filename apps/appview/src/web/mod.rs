//! HTTP routing. Handlers stay thin; identity resolution happens in the
//! auth middleware and permission checks happen at the write layer (plus
//! explicit gates for admin surfaces).

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod proxy;

pub fn router(state: AppState) -> Router {
    Router::new()
        // timeline
        .route("/", get(handlers::index))
        // social graph
        .route("/follow", post(handlers::follow))
        .route("/unfollow", post(handlers::unfollow))
        .route("/star", post(handlers::star))
        .route("/unstar", post(handlers::unstar))
        // repos
        .route("/repo/new", post(handlers::repo_new))
        .route("/repo/fork", post(handlers::repo_fork))
        // nodes
        .route("/knots", get(handlers::knots_list).post(handlers::knot_register))
        .route("/knots/{domain}/verify", post(handlers::knot_verify))
        .route("/spindles", post(handlers::spindle_register))
        .route("/spindles/{domain}/verify", post(handlers::spindle_verify))
        // ssh keys for knot AuthorizedKeysCommand
        .route("/keys/{user}", get(handlers::keys))
        // notifications
        .route("/notifications", get(handlers::notifications_list))
        .route("/notifications/read", post(handlers::notifications_read))
        // admin
        .route("/admin/reconcile", get(handlers::admin_reconcile))
        // repo pages; both @handle and flattened-DID owners resolve, the
        // handler 302s to the canonical form
        .route("/{owner}/{repo}", get(handlers::repo_page).delete(handlers::repo_delete))
        .route("/{owner}/{repo}/collaborators", post(handlers::collaborator_add))
        .route("/{owner}/{repo}/issues/new", post(handlers::issue_new))
        .route("/{owner}/{repo}/issues/{number}/close", post(handlers::issue_close))
        .route("/{owner}/{repo}/issues/{number}/reopen", post(handlers::issue_reopen))
        .route("/{owner}/{repo}/issues/{number}/comment", post(handlers::issue_comment))
        .route("/{owner}/{repo}/pulls/new", post(handlers::pull_new))
        .route("/{owner}/{repo}/pulls/{number}/merge", post(handlers::pull_merge))
        .route("/{owner}/{repo}/pulls/{number}/resubmit", post(handlers::pull_resubmit))
        .route("/{owner}/{repo}/pulls/{number}/close", post(handlers::pull_close))
        .route(
            "/{owner}/{repo}/pulls/{number}/interdiff/{round}",
            get(handlers::pull_interdiff),
        )
        // git smart-HTTP transport
        .route("/{owner}/{repo}/info/refs", get(proxy::git_proxy))
        .route("/{owner}/{repo}/git-upload-pack", post(proxy::git_proxy))
        .route("/{owner}/{repo}/git-receive-pack", post(proxy::git_proxy))
        .layer(middleware::from_fn_with_state(state.clone(), auth::authn_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
