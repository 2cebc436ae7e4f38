//! Result storage for a single search job.
//!
//! The accumulator is the authoritative, never-truncated list of matches.
//! `MessageLog` is the bounded display buffer for status lines and is kept
//! separate so trimming it can never lose a result.

use super::progress::{JobId, SearchResult};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// Default number of status lines retained by a [`MessageLog`].
pub const DEFAULT_MESSAGE_LOG_CAPACITY: usize = 100;

/// Append-only store of results with snapshot reads.
///
/// One writer (the job's worker thread) and any number of readers. Readers
/// get copies, so they never hold the lock while rendering. The store is
/// stamped with the job that owns its contents; a restart resets both
/// together.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    entries: RwLock<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    job: JobId,
    results: Vec<SearchResult>,
}

/// Complete result set plus column labels, ready for an external exporter.
#[derive(Debug, Clone, Serialize)]
pub struct ResultExport {
    pub labels: Vec<String>,
    pub count: usize,
    pub highest_score: Option<i64>,
    pub average_score: Option<f64>,
    pub results: Vec<SearchResult>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, result: SearchResult) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.results.push(result);
        entries.results.len()
    }

    /// Drop everything and hand the store to `job`. Only called by the owning
    /// instance between jobs.
    pub(crate) fn reset(&self, job: JobId) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.job = job;
        entries.results.clear();
    }

    /// The job whose results are currently held.
    pub fn job(&self) -> JobId {
        self.read().job
    }

    pub fn snapshot(&self) -> Vec<SearchResult> {
        self.read().results.clone()
    }

    /// A snapshot together with the job it belongs to.
    pub fn job_snapshot(&self) -> (JobId, Vec<SearchResult>) {
        let entries = self.read();
        (entries.job, entries.results.clone())
    }

    /// Results after the first `offset` entries, for incremental readers.
    pub fn snapshot_from(&self, offset: usize) -> Vec<SearchResult> {
        tail(&self.read().results, offset)
    }

    /// Like [`snapshot_from`](Self::snapshot_from), but `None` once the store
    /// has moved on to a different job than `job`.
    pub fn job_snapshot_from(&self, job: JobId, offset: usize) -> Option<Vec<SearchResult>> {
        let entries = self.read();
        (entries.job == job).then(|| tail(&entries.results, offset))
    }

    pub fn count(&self) -> usize {
        self.read().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn highest_score(&self) -> Option<i64> {
        self.read().results.iter().map(|r| r.score).max()
    }

    pub fn average_score(&self) -> Option<f64> {
        average(&self.read().results)
    }

    /// Take one consistent snapshot and derive the export header from it.
    pub fn export(&self, labels: Vec<String>) -> ResultExport {
        let results = self.snapshot();
        ResultExport {
            labels,
            count: results.len(),
            highest_score: results.iter().map(|r| r.score).max(),
            average_score: average(&results),
            results,
        }
    }
}

fn tail(results: &[SearchResult], offset: usize) -> Vec<SearchResult> {
    results.get(offset..).map(<[_]>::to_vec).unwrap_or_default()
}

fn average(results: &[SearchResult]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let total: f64 = results.iter().map(|r| r.score as f64).sum();
    Some(total / results.len() as f64)
}

/// Bounded buffer of status lines; the oldest line is dropped first.
#[derive(Debug)]
pub struct MessageLog {
    lines: RwLock<VecDeque<String>>,
    capacity: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_LOG_CAPACITY)
    }
}

impl MessageLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.write().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<String> {
        self.lines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        self.lines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn result(seed: &str, score: i64) -> SearchResult {
        SearchResult::new(seed, score, vec![score as i32], 1)
    }

    #[test]
    fn test_append_preserves_order_and_stats() {
        let acc = ResultAccumulator::new();
        assert_eq!(acc.highest_score(), None);
        assert_eq!(acc.average_score(), None);

        acc.append(result("AAAA1111", 2));
        acc.append(result("BBBB2222", 6));
        acc.append(result("CCCC3333", 4));

        let seeds: Vec<_> = acc.snapshot().into_iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec!["AAAA1111", "BBBB2222", "CCCC3333"]);
        assert_eq!(acc.count(), 3);
        assert_eq!(acc.highest_score(), Some(6));
        assert_eq!(acc.average_score(), Some(4.0));
    }

    #[test]
    fn test_snapshot_from_offset() {
        let acc = ResultAccumulator::new();
        for i in 0..5 {
            acc.append(result(&format!("SEED{i}"), i));
        }
        let tail = acc.snapshot_from(3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seed, "SEED3");
        assert!(acc.snapshot_from(5).is_empty());
        assert!(acc.snapshot_from(99).is_empty());
    }

    #[test]
    fn test_stale_job_reads_nothing_after_reset() {
        let acc = ResultAccumulator::new();
        acc.reset(1);
        for i in 0..5 {
            acc.append(result(&format!("OLD{i}"), i));
        }
        assert_eq!(acc.job_snapshot_from(1, 3).map(|r| r.len()), Some(2));

        acc.reset(2);
        for i in 0..7 {
            acc.append(result(&format!("NEW{i}"), i));
        }
        assert_eq!(acc.job_snapshot_from(1, 3), None);
        let (job, all) = acc.job_snapshot();
        assert_eq!(job, 2);
        assert_eq!(all[0].seed, "NEW0");
        assert_eq!(acc.job_snapshot_from(2, 0).map(|r| r.len()), Some(7));
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let acc = ResultAccumulator::new();
        acc.append(result("AAAA1111", 1));
        let snapshot = acc.snapshot();
        acc.append(result("BBBB2222", 1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(acc.count(), 2);
    }

    #[test]
    fn test_export_carries_labels_and_header() {
        let acc = ResultAccumulator::new();
        acc.append(result("AAAA1111", 1));
        acc.append(result("BBBB2222", 3));
        let export = acc.export(vec!["Blueprint".into()]);
        assert_eq!(export.labels, vec!["Blueprint"]);
        assert_eq!(export.count, 2);
        assert_eq!(export.highest_score, Some(3));
        assert_eq!(export.average_score, Some(2.0));
        assert_eq!(export.results.len(), 2);
    }

    #[test]
    fn test_concurrent_reader_counts_never_decrease() {
        let acc = Arc::new(ResultAccumulator::new());
        let writer = {
            let acc = acc.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    acc.append(result(&format!("S{i}"), 1));
                }
            })
        };

        let mut last = 0;
        while !writer.is_finished() {
            let count = acc.snapshot().len();
            assert!(count >= last);
            last = count;
        }
        writer.join().unwrap();
        assert_eq!(acc.count(), 2000);
    }

    #[test]
    fn test_message_log_drops_oldest() {
        let log = MessageLog::with_capacity(3);
        for i in 0..5 {
            log.push(format!("line {i}"));
        }
        assert_eq!(log.lines(), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(log.last().as_deref(), Some("line 4"));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_message_log_default_capacity() {
        let log = MessageLog::default();
        for i in 0..250 {
            log.push(i.to_string());
        }
        assert_eq!(log.len(), DEFAULT_MESSAGE_LOG_CAPACITY);
        assert_eq!(log.lines()[0], "150");
    }
}
