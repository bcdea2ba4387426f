/// Request and response bodies for the HTTP API

use serde::{Deserialize, Serialize};

/// Request to shorten a URL
#[derive(Debug, Deserialize, Serialize)]
pub struct ShortenRequest {
    /// The long URL to shorten
    pub long_url: String,
    /// Lease in days; the server default applies when absent
    #[serde(default)]
    pub expiration_days: Option<i64>,
}

/// Response after shortening a URL
#[derive(Debug, Deserialize, Serialize)]
pub struct ShortenResponse {
    /// The claimed token
    pub token: String,
    /// The full short URL
    pub short_url: String,
    /// The original long URL
    pub long_url: String,
    pub expiration_days: i64,
    /// Claim attempts spent, including the winning one
    pub attempts: u64,
}

/// A live token and its target
#[derive(Debug, Deserialize, Serialize)]
pub struct LookupResponse {
    pub token: String,
    pub long_url: String,
}

/// New expiration window for an existing token
#[derive(Debug, Deserialize, Serialize)]
pub struct ReassignRequest {
    /// Days from the record's creation; zero or less expires it now
    pub expiration_days: i64,
}

/// Health check response
#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Storage engine name
    pub backend: String,
    pub token_length: usize,
    pub budget_ms: u64,
    /// Advisory claim attempts per budget window
    pub capacity_estimate: u64,
}

/// Error body returned for every failed request
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
