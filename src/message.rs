//! Wire-level request/response schemas and the middleware kind tag.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MeshError, ResponseError};

pub type Headers = Map<String, Value>;

/// A point-to-point request, as described in spec §3/§6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub content: Value,
    /// Send time, ms since epoch.
    pub date: i64,
    /// Deadline is `date + timeout`, fixed across retries.
    pub timeout: u64,
    #[serde(default)]
    pub headers: Headers,
    /// Whether the sender registered a callback awaiting a response.
    #[serde(default)]
    pub cb: bool,
}

impl Request {
    pub fn deadline_ms(&self) -> i64 {
        self.date + self.timeout as i64
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.deadline_ms()
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.id.is_empty() {
            return Err(MeshError::InvalidRequest("empty id".into()));
        }
        if self.from.is_empty() || self.to.is_empty() {
            return Err(MeshError::InvalidRequest("empty from/to".into()));
        }
        if self.timeout == 0 {
            return Err(MeshError::InvalidRequest("timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// The reply to a [`Request`], as described in spec §3/§6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ResponseError>,
    #[serde(default)]
    pub content: Value,
    pub date: i64,
    #[serde(default)]
    pub headers: Headers,
}

impl Response {
    pub fn ok(req: &Request, content: Value) -> Self {
        Self {
            id: req.id.clone(),
            from: req.to.clone(),
            to: req.from.clone(),
            err: None,
            content,
            date: req.date,
            headers: Headers::new(),
        }
    }

    pub fn error(req: &Request, err: ResponseError) -> Self {
        Self {
            id: req.id.clone(),
            from: req.to.clone(),
            to: req.from.clone(),
            err: Some(err),
            content: Value::Null,
            date: req.date,
            headers: Headers::new(),
        }
    }
}

/// Message kind tag, used by [`crate::middleware`] to select the station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    ReqOut,
    ReqIn,
    ResOut,
    ResIn,
}
