//! Compensation stack for partially completed writes.
//!
//! Steps are pushed as each phase succeeds and run in reverse order on
//! failure. Rollback is best-effort: every step runs even if earlier ones
//! fail, and failures are aggregated into one error log line.

use futures::future::BoxFuture;

use super::WriteError;

type Step = (&'static str, BoxFuture<'static, Result<(), WriteError>>);

#[derive(Default)]
pub struct Rollback {
    steps: Vec<Step>,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: &'static str, step: F)
    where
        F: std::future::Future<Output = Result<(), WriteError>> + Send + 'static,
    {
        self.steps.push((label, Box::pin(step)));
    }

    /// Successful finalize path: compensation is no longer needed.
    pub fn disarm(&mut self) {
        self.steps.clear();
    }

    pub async fn run(&mut self) {
        let mut failures = Vec::new();
        for (label, step) in self.steps.drain(..).rev() {
            if let Err(err) = step.await {
                failures.push(format!("{label}: {err}"));
            }
        }
        if !failures.is_empty() {
            tracing::error!("rollback partially failed: {}", failures.join("; "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_in_reverse_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut rollback = Rollback::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            rollback.push("step", async move {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        rollback.run().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn disarm_skips_everything() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut rollback = Rollback::new();
        let counter = Arc::clone(&ran);
        rollback.push("step", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        rollback.disarm();
        rollback.run().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_failing_step_does_not_stop_the_rest() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut rollback = Rollback::new();
        let counter = Arc::clone(&ran);
        rollback.push("later", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        rollback.push("failing", async { Err(WriteError::Validation("nope".to_owned())) });
        rollback.run().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
