//! Domain-event fan-out. Sinks are best-effort: a failing sink logs and
//! never fails the mutation that produced the event.

use async_trait::async_trait;
use chrono::Utc;
use tangled_db::notifications::NotificationKind;
use tangled_db::{Db, notifications};
use tangled_types::Did;

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub recipient: Did,
    pub actor: Did,
    pub kind: NotificationKind,
    /// AT-URI of the entity the event is about, when there is one.
    pub entity: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent);
}

/// Multiplexes one event to every registered sink.
#[derive(Default)]
pub struct MultiNotifier {
    sinks: Vec<std::sync::Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, event: &NotificationEvent) {
        for sink in &self.sinks {
            sink.notify(event).await;
        }
    }
}

/// The database sink: suppresses self-notification and honors the
/// recipient's per-kind preferences.
pub struct DbNotifier {
    db: Db,
}

impl DbNotifier {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Notifier for DbNotifier {
    async fn notify(&self, event: &NotificationEvent) {
        if event.recipient == event.actor {
            return;
        }
        let prefs = match notifications::preferences(self.db.pool(), event.recipient.as_str()).await
        {
            Ok(prefs) => prefs,
            Err(err) => {
                tracing::error!("preference lookup failed: {err}");
                return;
            }
        };
        if !prefs.allows(event.kind) {
            return;
        }
        if let Err(err) = notifications::insert(
            self.db.pool(),
            event.recipient.as_str(),
            event.actor.as_str(),
            event.kind,
            event.entity.as_deref(),
            Utc::now(),
        )
        .await
        {
            tracing::error!("notification insert failed: {err}");
        }
    }
}

/// Product-analytics sink (PostHog-style capture endpoint). Disabled when
/// no API key is configured.
pub struct AnalyticsNotifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl AnalyticsNotifier {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()?,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        })
    }
}

#[async_trait]
impl Notifier for AnalyticsNotifier {
    async fn notify(&self, event: &NotificationEvent) {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "event": event.kind.as_str(),
            "distinct_id": event.actor.as_str(),
            "properties": { "entity": event.entity },
        });
        let url = format!("{}/capture/", self.endpoint);
        if let Err(err) = self.http.post(url).json(&body).send().await {
            tracing::debug!("analytics capture failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did(s: &str) -> Did {
        Did::new(s).unwrap()
    }

    #[tokio::test]
    async fn self_notification_is_suppressed() {
        let db = Db::connect_in_memory().await.unwrap();
        let notifier = DbNotifier::new(db.clone());
        notifier
            .notify(&NotificationEvent {
                recipient: did("did:plc:alice"),
                actor: did("did:plc:alice"),
                kind: NotificationKind::Followed,
                entity: None,
            })
            .await;
        let rows = notifications::list_for_recipient(db.pool(), "did:plc:alice", false)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn preference_gates_the_kind() {
        let db = Db::connect_in_memory().await.unwrap();
        let mut prefs = notifications::Preferences::default_for("did:plc:bob");
        prefs.followed = false;
        notifications::save_preferences(db.pool(), &prefs).await.unwrap();

        let notifier = DbNotifier::new(db.clone());
        let follow = NotificationEvent {
            recipient: did("did:plc:bob"),
            actor: did("did:plc:alice"),
            kind: NotificationKind::Followed,
            entity: None,
        };
        notifier.notify(&follow).await;
        assert!(
            notifications::list_for_recipient(db.pool(), "did:plc:bob", false)
                .await
                .unwrap()
                .is_empty()
        );

        // a kind that is still enabled goes through
        notifier
            .notify(&NotificationEvent {
                kind: NotificationKind::RepoStarred,
                entity: Some("at://did:plc:bob/sh.tangled.repo/x".to_owned()),
                ..follow
            })
            .await;
        assert_eq!(
            notifications::list_for_recipient(db.pool(), "did:plc:bob", false)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
