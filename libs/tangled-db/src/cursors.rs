//! Resume positions per event source, in wall-clock nanoseconds.
//! Advancement is strictly monotonic: a smaller value never overwrites a
//! larger one, so replays cannot rewind a stream.

use sqlx::SqliteExecutor;

use crate::DbError;

pub async fn get<'e, E: SqliteExecutor<'e>>(exec: E, key: &str) -> Result<Option<i64>, DbError> {
    Ok(
        sqlx::query_scalar("SELECT value FROM cursors WHERE source_key = ?1")
            .bind(key)
            .fetch_optional(exec)
            .await?,
    )
}

/// Advance the cursor; values at or below the stored one are ignored.
pub async fn advance<'e, E: SqliteExecutor<'e>>(
    exec: E,
    key: &str,
    value: i64,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO cursors (source_key, value) VALUES (?1, ?2)
         ON CONFLICT (source_key) DO UPDATE SET value = excluded.value
         WHERE excluded.value > cursors.value",
    )
    .bind(key)
    .bind(value)
    .execute(exec)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn cursor_never_decreases() {
        let db = Db::connect_in_memory().await.unwrap();
        assert_eq!(get(db.pool(), "jetstream").await.unwrap(), None);

        advance(db.pool(), "jetstream", 100).await.unwrap();
        advance(db.pool(), "jetstream", 50).await.unwrap();
        assert_eq!(get(db.pool(), "jetstream").await.unwrap(), Some(100));

        advance(db.pool(), "jetstream", 150).await.unwrap();
        assert_eq!(get(db.pool(), "jetstream").await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn cursors_are_namespaced_by_source() {
        let db = Db::connect_in_memory().await.unwrap();
        advance(db.pool(), "knot:a.example.com", 10).await.unwrap();
        advance(db.pool(), "knot:b.example.com", 20).await.unwrap();
        assert_eq!(get(db.pool(), "knot:a.example.com").await.unwrap(), Some(10));
        assert_eq!(get(db.pool(), "knot:b.example.com").await.unwrap(), Some(20));
    }
}
