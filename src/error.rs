//! Internal failure type and the caller-facing error codes carried in responses.

use thiserror::Error;

/// Library-internal failures. Distinct from [`ErrorCode`], which is what
/// crosses the wire and reaches a caller's callback.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid actor id: {0:?}")]
    InvalidAid(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid start params: {0}")]
    InvalidParams(String),
    #[error("already started")]
    AlreadyStarted,
    #[error("already stopped")]
    AlreadyStopped,
    #[error("lifecycle transition in flight")]
    TransitionInFlight,
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Error codes surfaced to callers inside [`crate::message::Response::err`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    /// Validation or internal failure.
    TechErr,
    /// The request's absolute deadline passed.
    Timeout,
    /// Discovery exhausted without locating the target actor.
    NotFound,
    /// The peer was gone and the deadline passed before a retry succeeded.
    Dropped,
    /// Middleware or handler declined the request explicitly.
    Forbidden,
}

/// The `{code, cause?}` pair carried in a [`crate::message::Response`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub cause: Option<serde_json::Value>,
}

impl ResponseError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, cause: None }
    }

    pub fn with_cause(code: ErrorCode, cause: impl Into<serde_json::Value>) -> Self {
        Self {
            code,
            cause: Some(cause.into()),
        }
    }
}

impl From<MeshError> for ResponseError {
    fn from(e: MeshError) -> Self {
        ResponseError::with_cause(ErrorCode::TechErr, e.to_string())
    }
}
