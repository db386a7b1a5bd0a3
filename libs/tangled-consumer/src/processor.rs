use async_trait::async_trait;

use crate::BoxError;

/// Sink for stream messages. Delivery is at-least-once: implementations
/// must be idempotent under replay.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, source_key: &str, message: &str) -> Result<(), BoxError>;
}
