//! Git smart-HTTP transport proxy. `/info/refs`, `/git-upload-pack` and
//! `/git-receive-pack` are reverse-proxied to the repo's knot with an
//! injected `x-tangled-repo-owner-handle` header; bodies stream through
//! unchanged in both directions.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;

use crate::state::AppState;
use crate::web::error::AppError;
use crate::writes::WriteError;

const OWNER_HANDLE_HEADER: &str = "x-tangled-repo-owner-handle";

/// Request headers worth forwarding to the knot.
const FORWARDED_REQUEST_HEADERS: [HeaderName; 3] = [
    header::CONTENT_TYPE,
    header::ACCEPT,
    HeaderName::from_static("git-protocol"),
];

pub async fn git_proxy(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    req: Request,
) -> Result<Response, AppError> {
    let resolved = state.repos.resolve(&owner, &repo).await?;

    // tail = the git transport suffix after /{owner}/{repo}
    let path = req.uri().path();
    let tail = path
        .rsplit_once(&format!("/{repo}/"))
        .map(|(_, tail)| tail.to_owned())
        .ok_or_else(|| WriteError::Validation("malformed git path".to_owned()))?;
    let scheme = if state.config.dev { "http" } else { "https" };
    let mut target = format!(
        "{scheme}://{}/{}/{}/{}",
        resolved.repo.knot, resolved.repo.did, resolved.repo.name, tail
    );
    if let Some(query) = req.uri().query() {
        target.push('?');
        target.push_str(query);
    }

    let method = req.method().clone();
    let headers = req.headers().clone();
    let body_stream = req
        .into_body()
        .into_data_stream()
        .map_err(std::io::Error::other);

    let mut upstream = state
        .proxy_http
        .request(method, &target)
        .body(reqwest::Body::wrap_stream(body_stream));
    for name in FORWARDED_REQUEST_HEADERS {
        if let Some(value) = headers.get(&name) {
            upstream = upstream.header(name, value);
        }
    }
    let handle = resolved
        .handle
        .as_ref()
        .map_or_else(|| resolved.owner.flattened(), ToString::to_string);
    upstream = upstream.header(OWNER_HANDLE_HEADER, handle);

    let response = upstream
        .send()
        .await
        .map_err(|e| WriteError::RemoteUnavailable(e.to_string()))?;

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for name in [header::CONTENT_TYPE, header::CACHE_CONTROL] {
        if let Some(value) = response.headers().get(&name) {
            if let Ok(value) = value.to_str() {
                builder = builder.header(name, value);
            }
        }
    }
    let body = Body::from_stream(response.bytes_stream().map_err(std::io::Error::other));
    builder
        .body(body)
        .map_err(|e| WriteError::Integrity(format!("proxy response assembly: {e}")).into())
}

/// Fallback for git paths that are not part of the smart-HTTP surface.
pub async fn unsupported() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "unsupported git endpoint")
}
