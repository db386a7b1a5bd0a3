//! Router-level checks: identity middleware, authorization responses, and
//! the plain-text authorized-keys surface.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use clap::Parser;
use tokio::sync::mpsc;
use tower::ServiceExt;
use url::Url;

use common::harness;

use tangled_appview::config::Config;
use tangled_appview::resolve::RepoResolver;
use tangled_appview::state::AppState;
use tangled_appview::web;
use tangled_appview::web::auth::HeaderSessionAuth;
use tangled_db::graph as graph_db;
use tangled_xrpc::{IdResolver, PdsClient};

const ALICE: &str = "did:plc:alice";
const BOB: &str = "did:plc:bob";

async fn app(h: &common::Harness) -> axum::Router {
    let identities =
        Arc::new(IdResolver::new(Url::parse("https://plc.directory").unwrap()).unwrap());
    let (source_tx, _source_rx) = mpsc::channel(4);
    let state = AppState {
        config: Arc::new(Config::parse_from(["appview"])),
        db: h.db.clone(),
        enforcer: Arc::clone(&h.enforcer),
        writes: Arc::clone(&h.ctx),
        identities: Arc::clone(&identities),
        repos: Arc::new(RepoResolver::new(h.db.clone(), identities)),
        pds: Arc::new(PdsClient::new().unwrap()),
        sessions: Arc::new(HeaderSessionAuth),
        new_sources: source_tx,
        proxy_http: reqwest::Client::new(),
    };
    web::router(state)
}

fn signed_in(req: axum::http::request::Builder, did: &str) -> axum::http::request::Builder {
    req.header("x-tangled-did", did)
        .header("x-tangled-pds", "https://pds.example.com")
        .header("x-tangled-token", "t")
}

#[tokio::test]
async fn index_is_public() {
    let h = harness().await;
    let response = app(&h)
        .await
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mutations_require_a_session() {
    let h = harness().await;
    let request = Request::builder()
        .method("POST")
        .uri("/follow")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("subject=did%3Aplc%3Abob"))
        .unwrap();
    let response = app(&h).await.oneshot(request).await.unwrap();
    // generic 401; the body must not say which check failed
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(std::str::from_utf8(&body).unwrap(), "not authorized");
}

#[tokio::test]
async fn follow_via_the_router_writes_the_edge() {
    let h = harness().await;
    let request = signed_in(Request::builder().method("POST").uri("/follow"), ALICE)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("subject=did%3Aplc%3Abob"))
        .unwrap();
    let response = app(&h).await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(graph_db::follow_exists(h.db.pool(), ALICE, BOB).await.unwrap());
}

#[tokio::test]
async fn keys_endpoint_is_plain_text() {
    let h = harness().await;
    tangled_db::public_keys::insert(
        h.db.pool(),
        ALICE,
        "rk1",
        Some("laptop"),
        "ssh-ed25519 AAAAC3Nza laptop",
        chrono::Utc::now(),
    )
    .await
    .unwrap();
    tangled_db::public_keys::insert(
        h.db.pool(),
        ALICE,
        "rk2",
        None,
        "ssh-ed25519 BBBBD4Ozb desktop",
        chrono::Utc::now(),
    )
    .await
    .unwrap();

    let request = Request::builder()
        .uri("/keys/did:plc:alice")
        .body(Body::empty())
        .unwrap();
    let response = app(&h).await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(
        text,
        "ssh-ed25519 AAAAC3Nza laptop\nssh-ed25519 BBBBD4Ozb desktop"
    );
}

#[tokio::test]
async fn knot_listing_is_empty_until_registration() {
    let h = harness().await;
    let response = app(&h)
        .await
        .oneshot(Request::builder().uri("/knots").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[tokio::test]
async fn unknown_repo_pages_are_404() {
    let h = harness().await;
    let response = app(&h)
        .await
        .oneshot(
            Request::builder()
                .uri("/did-plc-ghost/nothing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
