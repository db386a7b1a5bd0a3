//! The fixed worker pool draining the shared bounded job queue.
//!
//! The cursor written for a job is the wall-clock nanosecond at which the
//! worker dequeued it, stored only after the processor returns `Ok`. A
//! processing error is logged and the message is not retried; ingesters
//! are idempotent under replay, so at-least-once delivery is enough.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cursor::CursorStore;
use crate::processor::MessageProcessor;

#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub source_key: String,
    pub text: String,
}

pub(crate) struct WorkerPool {
    tx: mpsc::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

async fn run_job(
    job: Job,
    processor: &Arc<dyn MessageProcessor>,
    cursors: &Arc<dyn CursorStore>,
) {
    let dequeued_at = now_nanos();
    match processor.process(&job.source_key, &job.text).await {
        Ok(()) => {
            if let Err(err) = cursors.advance(&job.source_key, dequeued_at).await {
                tracing::error!(source = %job.source_key, "failed to advance cursor: {err}");
            }
        }
        Err(err) => {
            // do not rewind, do not retry; the stream stays up
            tracing::error!(source = %job.source_key, "processing failed: {err}");
        }
    }
}

impl WorkerPool {
    pub fn spawn(
        worker_count: usize,
        queue_size: usize,
        processor: Arc<dyn MessageProcessor>,
        cursors: Arc<dyn CursorStore>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_size);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..worker_count)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let processor = Arc::clone(&processor);
                let cursors = Arc::clone(&cursors);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                // drain what is already queued, then exit
                                loop {
                                    let drained = rx.lock().await.try_recv();
                                    match drained {
                                        Ok(job) => run_job(job, &processor, &cursors).await,
                                        Err(_) => break,
                                    }
                                }
                                break;
                            }
                            received = async { rx.lock().await.recv().await } => {
                                match received {
                                    Some(job) => job,
                                    None => break,
                                }
                            }
                        };
                        run_job(job, &processor, &cursors).await;
                    }
                    tracing::debug!(worker, "worker exited");
                })
            })
            .collect();

        Self { tx, handles }
    }

    pub fn sender(&self) -> mpsc::Sender<Job> {
        self.tx.clone()
    }

    pub async fn join(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
