//! Boundary to the seed-search kernel.
//!
//! The orchestrator never enumerates or scores seeds itself. A
//! [`KernelFactory`] is injected once at start-up; for every job it validates
//! the filter and hands back a [`SearchKernel`] that runs on the job's worker
//! thread.

pub mod filter;
pub mod hash;

use crate::search::{SearchCriteria, SearchProgress};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use filter::{FilterClause, FilterConfig, FilterSummary};
pub use hash::{HashKernel, HashKernelFactory};

/// How a kernel run ended other than by exhausting its seed space.
#[derive(Error, Debug)]
pub enum KernelError {
    /// The cancellation token was observed. Not a failure.
    #[error("search cancelled")]
    Cancelled,

    #[error("worker fault: {0}")]
    Fault(#[from] anyhow::Error),
}

impl KernelError {
    pub fn fault(message: impl std::fmt::Display) -> Self {
        KernelError::Fault(anyhow::anyhow!("{message}"))
    }
}

/// A filter definition that could not be loaded or failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("filter not found: {0}")]
    NotFound(String),

    #[error("failed to read filter {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("invalid filter {path}: {message}")]
    Invalid { path: String, message: String },
}

/// Receives raw progress from a running kernel.
///
/// Called from the kernel's own thread; implementations must not block for
/// long.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: SearchProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(SearchProgress) + Send + Sync,
{
    fn report(&self, progress: SearchProgress) {
        self(progress)
    }
}

/// One job's worth of seed search.
///
/// Contract:
/// - report each match once, in discovery order, as a `SearchProgress` with
///   `new_result` set;
/// - report a heartbeat (seed count only) at least once per batch;
/// - check `cancel` at least once per batch of `criteria.batch_size` seeds and
///   return [`KernelError::Cancelled`] promptly once it is set, without ever
///   reporting `is_complete`;
/// - report `is_complete = true` exactly once when the seed space is
///   exhausted, then return `Ok(())`.
///
/// Returning `Ok(())` without completing and without cancellation ends the
/// job in error.
pub trait SearchKernel: Send + Sync {
    fn run(
        &self,
        criteria: &SearchCriteria,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), KernelError>;

    /// Kernel-native stop hook, invoked in addition to cancelling the token.
    fn request_stop(&self) {}
}

/// Builds per-job kernels and validates filter definitions.
pub trait KernelFactory: Send + Sync {
    /// Validate a filter without starting anything.
    fn load_config(&self, config_path: &str) -> Result<FilterSummary, ConfigError>;

    /// Build the kernel for one job. Validation failures surface here, before
    /// the instance leaves its current state.
    fn prepare(&self, criteria: &SearchCriteria) -> Result<Arc<dyn SearchKernel>, ConfigError>;
}
