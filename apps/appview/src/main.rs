//! Bootstrap, in leaves-first dependency order: database → enforcer →
//! identity resolver → clients → notifier → ingester → consumer → router.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use tangled_consumer::{Consumer, ConsumerConfig};
use tangled_db::{Db, knots, spindles};
use tangled_rbac::Enforcer;
use tangled_xrpc::{IdResolver, PdsClient};

use tangled_appview::config::Config;
use tangled_appview::cursor::SqliteCursorStore;
use tangled_appview::ingest::Ingester;
use tangled_appview::notify::{AnalyticsNotifier, DbNotifier, MultiNotifier, Notifier};
use tangled_appview::resolve::RepoResolver;
use tangled_appview::sources::{JetstreamSource, KnotSource, SpindleSource};
use tangled_appview::state::{AppState, NewSource};
use tangled_appview::web;
use tangled_appview::web::auth::HeaderSessionAuth;
use tangled_appview::writes::{HttpNodeGateway, WriteCtx, XrpcRecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::parse());
    tracing::info!(listen = %config.listen_addr, dev = config.dev, "starting appview");

    // storage and policy
    let db = Db::connect(&config.db_path)
        .await
        .with_context(|| format!("opening database at {}", config.db_path))?;
    let enforcer = Arc::new(Enforcer::new(db.pool().clone()).await?);

    // identity + outbound clients
    let plc = Url::parse(&config.plc_directory).context("parsing PLC directory URL")?;
    let identities = Arc::new(IdResolver::new(plc)?);
    let pds = Arc::new(PdsClient::new()?);

    // notifier fan-out: DB sink always; analytics only when configured
    let mut notifier = MultiNotifier::new().with(Arc::new(DbNotifier::new(db.clone())));
    if let Some(api_key) = &config.posthog_api_key {
        notifier = notifier.with(Arc::new(AnalyticsNotifier::new(
            &config.posthog_endpoint,
            api_key,
        )?));
    }
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);

    // the write coordinator context
    let writes = Arc::new(WriteCtx {
        db: db.clone(),
        enforcer: Arc::clone(&enforcer),
        records: Arc::new(XrpcRecordStore::new(PdsClient::new()?)),
        nodes: Arc::new(HttpNodeGateway::new(db.clone(), config.dev)),
        notifier: Arc::clone(&notifier),
        identities: Some(Arc::clone(&identities)),
    });

    // event consumption
    let cancel = CancellationToken::new();
    let ingester = Arc::new(Ingester::new(
        db.clone(),
        Arc::clone(&enforcer),
        Arc::clone(&notifier),
        Some(Arc::clone(&identities)),
    ));
    let consumer = Consumer::new(
        ConsumerConfig {
            dev: config.dev,
            ..ConsumerConfig::default()
        },
        ingester,
        Arc::new(SqliteCursorStore::new(db.clone())),
        cancel.child_token(),
    );
    consumer.add_source(Arc::new(JetstreamSource::new(&config.jetstream_endpoint)?));
    for registration in knots::list_verified(db.pool()).await? {
        consumer.add_source(Arc::new(KnotSource::new(&registration.domain)?));
    }
    for spindle in spindles::list_verified(db.pool()).await? {
        consumer.add_source(Arc::new(SpindleSource::new(&spindle.domain)?));
    }

    // nodes verified at runtime enter the source set through this channel
    let (source_tx, mut source_rx) = mpsc::channel::<NewSource>(16);
    let consumer_cancel = cancel.clone();
    let consumer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = consumer_cancel.cancelled() => break,
                added = source_rx.recv() => match added {
                    Some(NewSource::Knot(domain)) => match KnotSource::new(&domain) {
                        Ok(source) => {
                            consumer.add_source(Arc::new(source));
                        }
                        Err(err) => tracing::error!(%domain, "bad knot domain: {err}"),
                    },
                    Some(NewSource::Spindle(domain)) => match SpindleSource::new(&domain) {
                        Ok(source) => {
                            consumer.add_source(Arc::new(source));
                        }
                        Err(err) => tracing::error!(%domain, "bad spindle domain: {err}"),
                    },
                    None => break,
                },
            }
        }
        consumer.stop().await;
    });

    // web surface
    let state = AppState {
        config: Arc::clone(&config),
        db: db.clone(),
        enforcer,
        writes,
        identities: Arc::clone(&identities),
        repos: Arc::new(RepoResolver::new(db, identities)),
        pds,
        sessions: Arc::new(HeaderSessionAuth),
        new_sources: source_tx,
        proxy_http: reqwest::Client::builder().build()?,
    };
    let app = web::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;

    // the serve future returned; make sure the consumer winds down too
    cancel.cancel();
    let _ = consumer_task.await;
    tracing::info!("appview stopped");
    Ok(())
}
