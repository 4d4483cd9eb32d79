//! JSON bodies exchanged with HTTP and WebSocket clients

use serde::{Deserialize, Serialize};

use sneak_core::{Entry, EntryId, SERVICE_NAME};

/// Body of `POST /api/punch`
///
/// Missing fields decode to empty values so the facade can report them as a
/// bad request instead of a parse failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRequest {
    /// Content key other peers will look up
    pub hash: String,
    /// Publisher's reachable host
    pub ip: String,
    /// Publisher's reachable port
    pub port: u16,
}

/// Reply to a successful publish
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub id: EntryId,
    pub status: String,
}

impl PublishResponse {
    pub fn success(id: EntryId) -> Self {
        Self {
            id,
            status: "success".into(),
        }
    }
}

/// Reply to `GET /health`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".into(),
            service: SERVICE_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Reply to `GET /stats`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub entries: usize,
    pub max_entries: usize,
    pub subscribers: usize,
}

/// Error codes
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed body or missing fields
    BadRequest,

    /// No matching entry
    NotFound,

    /// Path exists but not for this method
    MethodNotAllowed,

    /// Request too large to accept
    PayloadTooLarge,
}

/// Error body returned with every non-2xx response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}

/// Serialize the entry list pushed to WebSocket subscribers
pub fn entries_json(entries: &[Entry]) -> Result<String, serde_json::Error> {
    serde_json::to_string(entries)
}
