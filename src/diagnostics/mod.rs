//! Health and uptime reporting for the orchestrator process.

use crate::search::{SearchRegistry, SearchState};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Server start time (set once at startup)
static SERVER_START_TIME: AtomicU64 = AtomicU64::new(0);

/// Initialize server start time. Call this once at server startup.
pub fn init_server_start_time() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    SERVER_START_TIME.store(now, Ordering::SeqCst);
}

/// Get server uptime in seconds
pub fn get_uptime_secs() -> u64 {
    let start = SERVER_START_TIME.load(Ordering::SeqCst);
    if start == 0 {
        return 0;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now.saturating_sub(start)
}

/// Format uptime as human-readable string
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// At least one search ended in error
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub uptime_human: String,
    pub generated_at: String,
    pub searches_total: usize,
    pub searches_running: usize,
    pub searches_failed: usize,
}

impl HealthReport {
    pub fn from_registry(registry: &SearchRegistry) -> Self {
        let summaries = registry.list();
        let count = |state: SearchState| summaries.iter().filter(|s| s.state == state).count();
        let failed = count(SearchState::Error);
        let uptime_secs = get_uptime_secs();

        Self {
            status: if failed > 0 {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            uptime_human: format_uptime(uptime_secs),
            generated_at: get_timestamp(),
            searches_total: summaries.len(),
            searches_running: count(SearchState::Running),
            searches_failed: failed,
        }
    }
}

/// Get current timestamp as ISO 8601 string
pub fn get_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
