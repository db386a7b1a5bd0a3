//! Error → HTTP mapping per the appview's taxonomy:
//! validation → 400 inline notice, not-found → 404, authorization → 401
//! with a deliberately generic body, remote unavailability → 503 "try
//! again later", everything else → 500 with full server-side context.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tangled_db::DbError;
use tangled_rbac::RbacError;

use crate::resolve::ResolveError;
use crate::writes::WriteError;

pub struct AppError(WriteError);

impl From<WriteError> for AppError {
    fn from(err: WriteError) -> Self {
        Self(err)
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        Self(WriteError::Db(err))
    }
}

impl From<RbacError> for AppError {
    fn from(err: RbacError) -> Self {
        Self(WriteError::Policy(err))
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::BadOwner(msg) => Self(WriteError::Validation(msg)),
            ResolveError::NotFound(what) => Self(WriteError::NotFound(what)),
            ResolveError::Db(db) => Self(WriteError::Db(db)),
            ResolveError::Identity(msg) => Self(WriteError::RemoteUnavailable(msg)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self.0 {
            WriteError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()).into_response(),
            WriteError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "not found".to_owned()).into_response()
            }
            // never leak which check failed
            WriteError::Denied => {
                (StatusCode::UNAUTHORIZED, "not authorized".to_owned()).into_response()
            }
            WriteError::RemoteUnavailable(msg) => {
                tracing::warn!("remote unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service unavailable, try again later".to_owned(),
                )
                    .into_response()
            }
            WriteError::Integrity(msg) => {
                tracing::error!("integrity violation: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned()).into_response()
            }
            WriteError::Db(err) => {
                tracing::error!("storage error: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned()).into_response()
            }
            WriteError::Policy(err) => {
                tracing::error!("policy error: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned()).into_response()
            }
        }
    }
}
