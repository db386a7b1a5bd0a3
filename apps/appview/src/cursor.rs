//! Durable cursor store backed by the appview database.

use async_trait::async_trait;
use tangled_consumer::{BoxError, CursorStore};
use tangled_db::{Db, cursors};

pub struct SqliteCursorStore {
    db: Db,
}

impl SqliteCursorStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, BoxError> {
        Ok(cursors::get(self.db.pool(), key).await?)
    }

    async fn advance(&self, key: &str, value: i64) -> Result<(), BoxError> {
        cursors::advance(self.db.pool(), key, value).await?;
        Ok(())
    }
}
