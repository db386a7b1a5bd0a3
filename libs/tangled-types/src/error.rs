use thiserror::Error;

/// Rejection reasons for identifier parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid DID: {0}")]
    InvalidDid(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("invalid AT-URI: {0}")]
    InvalidAtUri(String),

    #[error("invalid TID: {0}")]
    InvalidTid(String),
}
