use thiserror::Error;

#[derive(Debug, Error)]
pub enum RbacError {
    #[error("policy storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("corrupt policy row: {0}")]
    Corrupt(String),
}
