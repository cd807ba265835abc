//! Request analytics: one row per `/api/*` request, aggregated on demand.
//!
//! * [`store`]: SQLite persistence and the read-only aggregate queries.
//! * [`tracker`]: fire-and-forget recording from the request path.
//! * [`middleware`]: the axum layer that measures and reports each request.
//!
//! Client addresses are never stored. Each is reduced to the first 16 hex
//! chars of a salted SHA-256, which is enough to count distinct users.

pub mod middleware;
pub mod store;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub use middleware::{track_requests, FileCount};
pub use store::AnalyticsStore;
pub use tracker::RequestTracker;

/// Longest user agent kept.
pub const MAX_USER_AGENT_CHARS: usize = 200;

/// Hex chars kept from the client hash.
const CLIENT_HASH_HEX: usize = 16;

/// One tracked request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub status_code: u16,
    pub processing_ms: f64,
    pub file_count: u32,
    pub client_hash: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestEvent {
    /// UTC calendar date of the event, `YYYY-MM-DD`.
    pub fn date(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

/// `SHA-256(salt || address)`, first 16 hex chars.
pub fn hash_client(salt: &str, address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(address.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(CLIENT_HASH_HEX);
    for byte in digest.iter().take(CLIENT_HASH_HEX / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Cut a user agent to [`MAX_USER_AGENT_CHARS`] characters.
pub fn truncate_user_agent(ua: &str) -> String {
    ua.chars().take(MAX_USER_AGENT_CHARS).collect()
}

// ── Aggregates ───────────────────────────────────────────────────────────────

/// All-time totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Overview {
    pub total_requests: i64,
    pub unique_users: i64,
    pub tools_used: i64,
    pub avg_processing_ms: f64,
    pub success_count: i64,
    pub error_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPoint {
    pub date: String,
    pub requests: i64,
    pub users: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStats {
    pub tool: String,
    pub requests: i64,
    pub users: i64,
    pub avg_ms: f64,
    pub success: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentRequest {
    pub timestamp: String,
    pub tool: String,
    pub status_code: u16,
    pub processing_ms: f64,
    pub file_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    pub hour: u32,
    pub requests: i64,
}

/// Totals for the current UTC day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TodayStats {
    pub requests: i64,
    pub users: i64,
    pub success: i64,
}

/// Body of `GET /api/analytics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub overview: Overview,
    pub today: TodayStats,
    pub daily: Vec<DailyPoint>,
    pub tools: Vec<ToolStats>,
    pub recent: Vec<RecentRequest>,
    pub hourly: Vec<HourlyBucket>,
}
