use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Non-success status from the remote. Callers branch on the code:
    /// 404 means "endpoint unsupported by this node", 400 a bad request.
    #[error("remote returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("unparseable response: {0}")]
    BadResponse(String),

    #[error("identity resolution failed: {0}")]
    Identity(String),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl ClientError {
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
