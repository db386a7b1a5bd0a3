use thiserror::Error;

/// Storage error taxonomy.
///
/// `NotFound` is reserved for lookups where the caller supplied an
/// identifier that must exist; plain absence is `Ok(None)`. `Conflict`
/// covers unique-constraint violations. `Integrity` flags stored data that
/// no longer parses (corrupt JSON column, bad identifier).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Sqlx(sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_owned()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_owned())
            }
            _ => Self::Sqlx(err),
        }
    }
}
