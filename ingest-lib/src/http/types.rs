use serde::{Deserialize, Serialize};

/// Body of a successful `POST /events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub queued_size: usize,
    pub timestamp: String,
}

/// Body of every non-2xx `POST /events` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// `queue_full`, `shutting_down` or `malformed_body`
    pub error: String,
    pub detail: String,
    pub queued_size: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: String,
    pub queued_size: usize,
    pub capacity: usize,
    pub consumers: String,
    pub processed: u64,
    pub failed: u64,
}
