use async_trait::async_trait;
use dashmap::DashMap;

use crate::BoxError;

/// Durable resume positions, namespaced by source key.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i64>, BoxError>;

    /// Advance the cursor. Implementations must never let the stored value
    /// decrease.
    async fn advance(&self, key: &str, value: i64) -> Result<(), BoxError>;
}

/// Non-durable store for tests and dev mode.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    values: DashMap<String, i64>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, BoxError> {
        Ok(self.values.get(key).map(|v| *v))
    }

    async fn advance(&self, key: &str, value: i64) -> Result<(), BoxError> {
        self.values
            .entry(key.to_owned())
            .and_modify(|current| *current = (*current).max(value))
            .or_insert(value);
        Ok(())
    }
}
