//! One long-lived WebSocket per registered source, a shared bounded job
//! queue, and a fixed worker pool.
//!
//! Guarantees:
//! - at-least-once delivery to the processor; cursors advance only after a
//!   successful call,
//! - per-source FIFO from a single reader into the queue; backpressure
//!   blocks the reader (and, through TCP, the sender) instead of dropping,
//! - reconnects with exponential backoff and jitter, capped; a clean
//!   disconnect re-enters after a fixed cooldown,
//! - `add_source` is idempotent and safe at runtime,
//! - cancelling the root token closes every connection and drains the
//!   queue.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub mod backoff;

mod cursor;
mod processor;
mod source;
mod workers;

pub use cursor::{CursorStore, InMemoryCursorStore};
pub use processor::MessageProcessor;
pub use source::Source;

use workers::{Job, WorkerPool};

/// Anything a processor or cursor store can fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Base reconnect delay after a failed connect or dirty disconnect.
    pub retry_interval: Duration,
    /// Backoff cap.
    pub max_retry_interval: Duration,
    /// Hard timeout on the initial connect.
    pub connection_timeout: Duration,
    /// Cooldown before re-entering after a clean disconnect.
    pub cooldown: Duration,
    pub worker_count: usize,
    pub queue_size: usize,
    /// Dev mode is passed through to `Source::url`.
    pub dev: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(15 * 60),
            max_retry_interval: Duration::from_secs(60 * 60),
            connection_timeout: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            worker_count: 5,
            queue_size: 100,
            dev: false,
        }
    }
}

pub struct Consumer {
    config: ConsumerConfig,
    cursors: Arc<dyn CursorStore>,
    jobs: tokio::sync::mpsc::Sender<Job>,
    pool: Option<WorkerPool>,
    readers: DashMap<String, JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Consumer {
    /// Build the consumer and spawn its worker pool. Sources are added
    /// separately, before or after startup.
    pub fn new(
        config: ConsumerConfig,
        processor: Arc<dyn MessageProcessor>,
        cursors: Arc<dyn CursorStore>,
        cancel: CancellationToken,
    ) -> Self {
        let pool = WorkerPool::spawn(
            config.worker_count,
            config.queue_size,
            processor,
            Arc::clone(&cursors),
            cancel.clone(),
        );
        let jobs = pool.sender();
        Self {
            config,
            cursors,
            jobs,
            pool: Some(pool),
            readers: DashMap::new(),
            cancel,
        }
    }

    /// Register a source and spawn its reader. Adding a source that is
    /// already registered is a no-op; a connection is never duplicated.
    pub fn add_source(&self, source: Arc<dyn Source>) -> bool {
        let key = source.key();
        match self.readers.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let task = ReaderTask {
                    source,
                    config: self.config.clone(),
                    cursors: Arc::clone(&self.cursors),
                    jobs: self.jobs.clone(),
                    cancel: self.cancel.clone(),
                };
                slot.insert(tokio::spawn(task.run()));
                tracing::info!(source = %key, "source added to consumer");
                true
            }
        }
    }

    pub fn source_count(&self) -> usize {
        self.readers.len()
    }

    /// Cancel everything, wait for readers to close their sockets and for
    /// workers to drain the queue.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        let keys: Vec<String> = self.readers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.readers.remove(&key) {
                let _ = handle.await;
            }
        }
        drop(self.jobs);
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
    }
}

struct ReaderTask {
    source: Arc<dyn Source>,
    config: ConsumerConfig,
    cursors: Arc<dyn CursorStore>,
    jobs: tokio::sync::mpsc::Sender<Job>,
    cancel: CancellationToken,
}

enum Disconnect {
    Clean,
    Dirty,
}

impl ReaderTask {
    async fn run(self) {
        let key = self.source.key();
        let mut attempt: u32 = 0;

        while !self.cancel.is_cancelled() {
            let cursor = match self.cursors.get(&key).await {
                Ok(c) => c,
                Err(err) => {
                    tracing::error!(source = %key, "cursor load failed: {err}");
                    None
                }
            };
            let url = self.source.url(cursor, self.config.dev);

            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                conn = tokio::time::timeout(self.config.connection_timeout, connect_async(url.as_str())) => conn,
            };

            match connected {
                Ok(Ok((stream, _response))) => {
                    tracing::info!(source = %key, cursor = ?cursor, "connected");
                    let (disconnect, delivered) = self.read_loop(&key, stream).await;
                    if delivered {
                        attempt = 0;
                    }
                    match disconnect {
                        Disconnect::Clean => {
                            tracing::info!(source = %key, "clean disconnect, cooling down");
                            if self.pause(self.config.cooldown).await {
                                break;
                            }
                        }
                        Disconnect::Dirty => {
                            attempt += 1;
                            let delay = backoff::delay(
                                self.config.retry_interval,
                                self.config.max_retry_interval,
                                attempt,
                            );
                            tracing::warn!(source = %key, attempt, ?delay, "stream error, backing off");
                            if self.pause(delay).await {
                                break;
                            }
                        }
                    }
                }
                Ok(Err(err)) => {
                    attempt += 1;
                    let delay = backoff::delay(
                        self.config.retry_interval,
                        self.config.max_retry_interval,
                        attempt,
                    );
                    tracing::warn!(source = %key, attempt, ?delay, "connect failed: {err}");
                    if self.pause(delay).await {
                        break;
                    }
                }
                Err(_elapsed) => {
                    attempt += 1;
                    let delay = backoff::delay(
                        self.config.retry_interval,
                        self.config.max_retry_interval,
                        attempt,
                    );
                    tracing::warn!(source = %key, attempt, ?delay, "connect timed out");
                    if self.pause(delay).await {
                        break;
                    }
                }
            }
        }
        tracing::info!(source = %self.source.key(), "reader exited");
    }

    /// Sleep unless cancelled first; returns whether we were cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }

    /// Pump messages until the stream ends. Only text frames become jobs.
    /// A full queue blocks here, which pauses the WebSocket read loop and
    /// lets TCP throttle the sender.
    async fn read_loop<S>(
        &self,
        key: &str,
        stream: tokio_tungstenite::WebSocketStream<S>,
    ) -> (Disconnect, bool)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (_write, mut read) = stream.split();
        let mut delivered = false;

        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => return (Disconnect::Clean, delivered),
                msg = read.next() => msg,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    let job = Job {
                        source_key: key.to_owned(),
                        text: text.to_string(),
                    };
                    if self.jobs.send(job).await.is_err() {
                        // worker pool is gone; treat as shutdown
                        return (Disconnect::Clean, delivered);
                    }
                    delivered = true;
                }
                Some(Ok(Message::Close(_))) | None => return (Disconnect::Clean, delivered),
                Some(Ok(_)) => {} // binary/ping/pong frames are not processed
                Some(Err(err)) => {
                    tracing::warn!(source = %key, "websocket error: {err}");
                    return (Disconnect::Dirty, delivered);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use url::Url;

    struct NullProcessor;

    #[async_trait]
    impl MessageProcessor for NullProcessor {
        async fn process(&self, _source_key: &str, _message: &str) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct FakeSource(&'static str);

    impl Source for FakeSource {
        fn key(&self) -> String {
            format!("knot:{}", self.0)
        }

        fn url(&self, cursor: Option<i64>, _dev: bool) -> Url {
            let mut url = Url::parse(&format!("wss://{}/events", self.0)).unwrap();
            if let Some(cursor) = cursor {
                url.query_pairs_mut().append_pair("cursor", &cursor.to_string());
            }
            url
        }
    }

    fn consumer() -> Consumer {
        Consumer::new(
            ConsumerConfig::default(),
            Arc::new(NullProcessor),
            Arc::new(InMemoryCursorStore::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn add_source_is_idempotent() {
        let consumer = consumer();
        let source = Arc::new(FakeSource("a.example.com"));
        assert!(consumer.add_source(Arc::clone(&source) as Arc<dyn Source>));
        assert!(!consumer.add_source(source as Arc<dyn Source>));
        assert_eq!(consumer.source_count(), 1);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn distinct_sources_get_distinct_readers() {
        let consumer = consumer();
        consumer.add_source(Arc::new(FakeSource("a.example.com")));
        consumer.add_source(Arc::new(FakeSource("b.example.com")));
        assert_eq!(consumer.source_count(), 2);
        consumer.stop().await;
    }

    #[test]
    fn source_url_carries_the_cursor() {
        let source = FakeSource("a.example.com");
        let url = source.url(Some(123), false);
        assert_eq!(url.as_str(), "wss://a.example.com/events?cursor=123");
        let bare = source.url(None, false);
        assert_eq!(bare.as_str(), "wss://a.example.com/events");
    }
}
