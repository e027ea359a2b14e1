use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

use crate::api::Code;

#[derive(Debug, ThisError)]
pub enum KeyturnError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("Request body is not an array of commands")]
    NotABatch,

    #[error("Connection pool size must be at least 1")]
    EmptyPool,

    #[error("Command `{0}` registered twice")]
    DuplicateCommand(String),
}

impl From<figment::Error> for KeyturnError {
    fn from(e: figment::Error) -> Self {
        KeyturnError::Config(Box::new(e))
    }
}

/// Failure of a single batch command. Never aborts the batch; the dispatcher
/// turns it into an `{err, debug?}` result object.
#[derive(Debug, ThisError)]
pub enum CommandError {
    #[error("{0} required")]
    MissingField(&'static str),

    #[error("{0}")]
    InvalidOperation(&'static str),

    #[error("{0}")]
    AuthorizationRequired(&'static str),

    #[error("{0}")]
    Database(#[from] SqlxError),
}

impl CommandError {
    pub fn code(&self) -> Code {
        match self {
            CommandError::MissingField(_) => Code::MissingField,
            CommandError::InvalidOperation(_) => Code::InvalidOperation,
            CommandError::AuthorizationRequired(_) => Code::AuthorizationRequired,
            CommandError::Database(_) => Code::DatabaseError,
        }
    }
}

/// Transport-level rejection of a whole request, before any command runs.
#[derive(Debug, ThisError)]
pub enum RejectError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("empty request body")]
    EmptyBody,

    #[error("unsupported content type")]
    UnsupportedMediaType,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("internal error")]
    Internal,
}

impl IntoResponse for RejectError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RejectError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Only POST is accepted here.",
            ),
            RejectError::EmptyBody => (
                StatusCode::BAD_REQUEST,
                "The request body is empty; send an array of commands.",
            ),
            RejectError::UnsupportedMediaType => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Send application/json or application/msgpack.",
            ),
            RejectError::Malformed(_) => (
                StatusCode::BAD_REQUEST,
                "The request body could not be decoded as an array of commands.",
            ),
            RejectError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred.",
            ),
        };
        let mut resp = (status, message).into_response();
        let headers = resp.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=UTF-8"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        resp
    }
}
