//! Values flowing from a kernel to the orchestrator and on to subscribers.

use super::criteria::SearchCriteria;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A seed that matched the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub seed: String,
    pub score: i64,
    /// Per-clause sub-scores, aligned with the filter's labels.
    pub scores: Vec<i32>,
    pub ante: u8,
    pub timestamp: DateTime<Utc>,
}

impl SearchResult {
    pub fn new(seed: impl Into<String>, score: i64, scores: Vec<i32>, ante: u8) -> Self {
        Self {
            seed: seed.into(),
            score,
            scores,
            ante,
            timestamp: Utc::now(),
        }
    }
}

/// One raw event reported by a kernel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchProgress {
    pub new_result: Option<SearchResult>,
    pub message: Option<String>,
    pub seeds_searched: u64,
    pub is_complete: bool,
}

impl SearchProgress {
    pub fn found(result: SearchResult, seeds_searched: u64) -> Self {
        Self {
            new_result: Some(result),
            seeds_searched,
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>, seeds_searched: u64) -> Self {
        Self {
            message: Some(message.into()),
            seeds_searched,
            ..Default::default()
        }
    }

    pub fn heartbeat(seeds_searched: u64) -> Self {
        Self {
            seeds_searched,
            ..Default::default()
        }
    }

    pub fn complete(seeds_searched: u64) -> Self {
        Self {
            seeds_searched,
            is_complete: true,
            ..Default::default()
        }
    }

    /// A bare seed count with nothing else attached.
    pub fn is_heartbeat(&self) -> bool {
        self.new_result.is_none() && self.message.is_none() && !self.is_complete
    }
}

/// Lifecycle state of a search instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl SearchState {
    pub fn is_running(&self) -> bool {
        matches!(self, SearchState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchState::Completed | SearchState::Cancelled | SearchState::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchState::Idle => "idle",
            SearchState::Running => "running",
            SearchState::Completed => "completed",
            SearchState::Cancelled => "cancelled",
            SearchState::Error => "error",
        }
    }
}

impl std::fmt::Display for SearchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Cancelled,
    Error,
}

impl From<Outcome> for SearchState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => SearchState::Completed,
            Outcome::Cancelled => SearchState::Cancelled,
            Outcome::Error => SearchState::Error,
        }
    }
}

/// Sequence number of a job within one instance, starting at 1.
pub type JobId = u64;

/// Throttled event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    Started {
        job: JobId,
        criteria: SearchCriteria,
    },
    /// New results were appended; read the accumulator for them.
    ResultsUpdated { found: usize, seeds_searched: u64 },
    Status { message: String, seeds_searched: u64 },
    Progress { seeds_searched: u64 },
    /// Terminal event, always the last one for a job.
    Finished {
        outcome: Outcome,
        found: usize,
        seeds_searched: u64,
        message: Option<String>,
    },
}

impl SearchEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchEvent::Finished { .. })
    }
}
