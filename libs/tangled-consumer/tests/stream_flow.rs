//! End-to-end consumer behavior against an in-process WebSocket server:
//! delivery through the worker pool, cursor advancement, and resume with
//! the stored cursor after a clean disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use tangled_consumer::{
    BoxError, Consumer, ConsumerConfig, CursorStore, InMemoryCursorStore, MessageProcessor,
    Source,
};

struct Recorder {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageProcessor for Recorder {
    async fn process(&self, _source_key: &str, message: &str) -> Result<(), BoxError> {
        self.seen.lock().unwrap().push(message.to_owned());
        Ok(())
    }
}

struct LocalSource {
    addr: SocketAddr,
}

impl Source for LocalSource {
    fn key(&self) -> String {
        "knot:local-test".to_owned()
    }

    fn url(&self, cursor: Option<i64>, _dev: bool) -> Url {
        let mut url = Url::parse(&format!("ws://{}/events", self.addr)).unwrap();
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", &cursor.to_string());
        }
        url
    }
}

fn test_config() -> ConsumerConfig {
    ConsumerConfig {
        retry_interval: Duration::from_millis(50),
        max_retry_interval: Duration::from_millis(200),
        connection_timeout: Duration::from_secs(2),
        // short cooldown so the clean-disconnect reconnect happens in-test
        cooldown: Duration::from_millis(250),
        worker_count: 2,
        queue_size: 16,
        dev: true,
    }
}

#[tokio::test]
async fn delivers_then_resumes_strictly_after_the_cursor() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // the server records the request URI of each accepted connection
    let uris: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let server_uris = Arc::clone(&uris);
    tokio::spawn(async move {
        // first connection: two messages, then a clean close
        let (stream, _) = listener.accept().await.unwrap();
        let record = Arc::clone(&server_uris);
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            record.lock().unwrap().push(req.uri().to_string());
            Ok(resp)
        };
        let mut ws = accept_hdr_async(stream, callback).await.unwrap();
        ws.send(Message::text("one")).await.unwrap();
        ws.send(Message::text("two")).await.unwrap();
        ws.close(None).await.unwrap();

        // second connection: one more message, then stay open
        let (stream, _) = listener.accept().await.unwrap();
        let record = Arc::clone(&server_uris);
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            record.lock().unwrap().push(req.uri().to_string());
            Ok(resp)
        };
        let mut ws = accept_hdr_async(stream, callback).await.unwrap();
        ws.send(Message::text("three")).await.unwrap();
        // hold the connection until the consumer shuts down
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let processor = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    let cursors = Arc::new(InMemoryCursorStore::new());
    let cancel = CancellationToken::new();
    let consumer = Consumer::new(
        test_config(),
        Arc::clone(&processor) as Arc<dyn MessageProcessor>,
        Arc::clone(&cursors) as Arc<dyn CursorStore>,
        cancel.clone(),
    );
    consumer.add_source(Arc::new(LocalSource { addr }));

    // wait for all three messages to make it through the worker pool
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if processor.seen.lock().unwrap().len() >= 3 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "messages never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let seen = processor.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["one", "two", "three"]);

    // the cursor advanced and the second connect resumed from it
    let cursor = cursors.get("knot:local-test").await.unwrap();
    assert!(cursor.is_some_and(|c| c > 0));

    let uris = uris.lock().unwrap().clone();
    assert_eq!(uris.len(), 2, "expected exactly one reconnect, got {uris:?}");
    assert!(!uris[0].contains("cursor="), "first connect must be cursorless: {}", uris[0]);
    assert!(uris[1].contains("cursor="), "resume must carry the cursor: {}", uris[1]);

    consumer.stop().await;
}
