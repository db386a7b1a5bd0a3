//! Per-day commit tallies, incremented only for commits whose author email
//! is verified for the DID.

use chrono::NaiveDate;
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Punch {
    pub did: String,
    pub day: NaiveDate,
    pub count: i64,
}

pub async fn increment<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    day: NaiveDate,
    by: i64,
) -> Result<(), DbError> {
    if by <= 0 {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO punches (did, day, count) VALUES (?1, ?2, ?3)
         ON CONFLICT (did, day) DO UPDATE SET count = count + excluded.count",
    )
    .bind(did)
    .bind(day)
    .bind(by)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
    day: NaiveDate,
) -> Result<i64, DbError> {
    let count: Option<i64> =
        sqlx::query_scalar("SELECT count FROM punches WHERE did = ?1 AND day = ?2")
            .bind(did)
            .bind(day)
            .fetch_optional(exec)
            .await?;
    Ok(count.unwrap_or(0))
}

pub async fn list_for_did<'e, E: SqliteExecutor<'e>>(
    exec: E,
    did: &str,
) -> Result<Vec<Punch>, DbError> {
    Ok(sqlx::query_as("SELECT * FROM punches WHERE did = ?1 ORDER BY day")
        .bind(did)
        .fetch_all(exec)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn increments_accumulate_per_day() {
        let db = Db::connect_in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        increment(db.pool(), "did:plc:alice", day, 2).await.unwrap();
        increment(db.pool(), "did:plc:alice", day, 3).await.unwrap();
        increment(db.pool(), "did:plc:alice", day, 0).await.unwrap();
        assert_eq!(get(db.pool(), "did:plc:alice", day).await.unwrap(), 5);
        assert_eq!(
            get(db.pool(), "did:plc:alice", day.succ_opt().unwrap()).await.unwrap(),
            0
        );
    }
}
