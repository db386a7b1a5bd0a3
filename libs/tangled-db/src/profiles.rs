//! Per-DID profiles. Pinned repos (max 6) and vanity stats (max 2) are JSON
//! columns; size limits are enforced at write time, not by the schema.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

pub const MAX_PINNED: usize = 6;
pub const MAX_STATS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
struct ProfileRow {
    did: String,
    description: Option<String>,
    location: Option<String>,
    links: String,
    pinned: String,
    stats: String,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub did: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub links: Vec<String>,
    pub pinned: Vec<String>,
    pub stats: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

fn parse_json_list(column: &str, raw: &str) -> Result<Vec<String>, DbError> {
    serde_json::from_str(raw)
        .map_err(|e| DbError::Integrity(format!("profile {column} column: {e}")))
}

impl Profile {
    fn from_row(row: ProfileRow) -> Result<Self, DbError> {
        Ok(Self {
            links: parse_json_list("links", &row.links)?,
            pinned: parse_json_list("pinned", &row.pinned)?,
            stats: parse_json_list("stats", &row.stats)?,
            did: row.did,
            description: row.description,
            location: row.location,
            created_at: row.created_at,
        })
    }
}

/// Upsert the full profile. Oversized pin/stat selections are an integrity
/// error: the record layer should have truncated them already.
pub async fn upsert<'e, E: SqliteExecutor<'e>>(exec: E, profile: &Profile) -> Result<(), DbError> {
    if profile.pinned.len() > MAX_PINNED {
        return Err(DbError::Integrity(format!(
            "{} pinned repos exceeds the {MAX_PINNED}-slot limit",
            profile.pinned.len()
        )));
    }
    if profile.stats.len() > MAX_STATS {
        return Err(DbError::Integrity(format!(
            "{} vanity stats exceeds the {MAX_STATS}-slot limit",
            profile.stats.len()
        )));
    }
    let links = serde_json::to_string(&profile.links)
        .map_err(|e| DbError::Integrity(e.to_string()))?;
    let pinned = serde_json::to_string(&profile.pinned)
        .map_err(|e| DbError::Integrity(e.to_string()))?;
    let stats = serde_json::to_string(&profile.stats)
        .map_err(|e| DbError::Integrity(e.to_string()))?;

    sqlx::query(
        "INSERT INTO profiles (did, description, location, links, pinned, stats, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (did) DO UPDATE SET
             description = excluded.description,
             location = excluded.location,
             links = excluded.links,
             pinned = excluded.pinned,
             stats = excluded.stats",
    )
    .bind(&profile.did)
    .bind(&profile.description)
    .bind(&profile.location)
    .bind(links)
    .bind(pinned)
    .bind(stats)
    .bind(profile.created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get<'e, E: SqliteExecutor<'e>>(exec: E, did: &str) -> Result<Option<Profile>, DbError> {
    let row: Option<ProfileRow> = sqlx::query_as("SELECT * FROM profiles WHERE did = ?1")
        .bind(did)
        .fetch_optional(exec)
        .await?;
    row.map(Profile::from_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn upsert_replaces_previous_selection() {
        let db = Db::connect_in_memory().await.unwrap();
        let mut profile = Profile {
            did: "did:plc:alice".to_owned(),
            description: Some("hi".to_owned()),
            pinned: vec!["at://did:plc:alice/sh.tangled.repo/a".to_owned()],
            ..Profile::default()
        };
        upsert(db.pool(), &profile).await.unwrap();

        profile.pinned.clear();
        profile.stats = vec!["merged-prs".to_owned()];
        upsert(db.pool(), &profile).await.unwrap();

        let got = get(db.pool(), "did:plc:alice").await.unwrap().unwrap();
        assert!(got.pinned.is_empty());
        assert_eq!(got.stats, vec!["merged-prs"]);
    }

    #[tokio::test]
    async fn pin_limit_is_enforced() {
        let db = Db::connect_in_memory().await.unwrap();
        let profile = Profile {
            did: "did:plc:alice".to_owned(),
            pinned: (0..7).map(|i| format!("at://did:plc:alice/sh.tangled.repo/{i}")).collect(),
            ..Profile::default()
        };
        assert!(matches!(
            upsert(db.pool(), &profile).await.unwrap_err(),
            DbError::Integrity(_)
        ));
    }
}
