//! Identity-resolution middleware. Session/cookie mechanics live outside
//! the core behind [`SessionAuth`]; the middleware's job is to turn
//! whatever the session layer yields into an `AuthUser` request extension
//! that handlers and permission gates consume.

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use secrecy::SecretString;
use url::Url;

use tangled_types::Did;
use tangled_xrpc::pds::PdsSession;

use crate::state::AppState;

/// The signed-in user, as established by the session layer.
#[derive(Clone)]
pub struct AuthUser {
    pub session: PdsSession,
}

impl AuthUser {
    pub fn did(&self) -> &Did {
        &self.session.did
    }
}

/// Seam to the session/OAuth plumbing (out of scope here). Implementations
/// map request headers to a ready-to-use PDS session.
#[async_trait]
pub trait SessionAuth: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<AuthUser>;
}

/// Dev/interface implementation: trusts `x-tangled-did`, `x-tangled-pds`
/// and `x-tangled-token` headers as injected by an upstream session proxy.
pub struct HeaderSessionAuth;

#[async_trait]
impl SessionAuth for HeaderSessionAuth {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<AuthUser> {
        let did = headers
            .get("x-tangled-did")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Did::new(v).ok())?;
        let endpoint = headers
            .get("x-tangled-pds")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Url::parse(v).ok())?;
        let token = headers
            .get("x-tangled-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        Some(AuthUser {
            session: PdsSession {
                did,
                endpoint,
                access_token: SecretString::from(token.to_owned()),
            },
        })
    }
}

/// Resolves the caller's identity (if any) and stashes it as an extension.
/// Route handlers decide whether anonymous access is acceptable.
pub async fn authn_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(user) = state.sessions.authenticate(req.headers()).await {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}
