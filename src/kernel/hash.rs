//! Reference kernel: enumerates the seed space and scores each seed from a
//! deterministic hash of (seed, deck, stake, clause, ante).
//!
//! Stands in for the real simulator so the orchestrator can run end to end.
//! Cancellation is checked before every batch and completion is reported
//! exactly once.

use super::filter::{resolve_filter_path, FilterClause, FilterConfig, FilterSummary};
use super::{ConfigError, KernelError, KernelFactory, ProgressSink, SearchKernel};
use crate::search::{SearchCriteria, SearchProgress, SearchResult};
use crate::utils::{format_number, seeds_per_sec};
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Characters a seed may contain (no `0` or `O`).
pub const SEED_ALPHABET: &[u8] = b"123456789ABCDEFGHIJKLMNPQRSTUVWXYZ";
pub const SEED_LEN: usize = 8;
/// Number of distinct seeds: 34^8.
pub const SEED_SPACE: u64 = 1_785_793_904_896;

/// A status line is reported every this many batches.
const STATUS_EVERY_BATCHES: u64 = 10;

/// The `index`-th seed in enumeration order (`11111111` is index 0).
pub fn seed_from_index(index: u64) -> String {
    let base = SEED_ALPHABET.len() as u64;
    let mut digits = [SEED_ALPHABET[0]; SEED_LEN];
    let mut rest = index % SEED_SPACE;
    for slot in digits.iter_mut().rev() {
        *slot = SEED_ALPHABET[(rest % base) as usize];
        rest /= base;
    }
    digits.iter().map(|&b| b as char).collect()
}

pub struct HashKernel {
    filter: FilterConfig,
    stop_requested: AtomicBool,
}

impl HashKernel {
    pub fn new(filter: FilterConfig) -> Self {
        Self {
            filter,
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    /// Score one seed; `None` if a must clause misses or the total is below
    /// `criteria.min_score`.
    pub fn evaluate(&self, seed: &str, criteria: &SearchCriteria) -> Option<SearchResult> {
        // Ante by which every must clause has hit.
        let mut ante = 1u8;
        for clause in &self.filter.must {
            let first_hit = clause
                .antes
                .iter()
                .copied()
                .find(|&a| roll(seed, criteria, clause, a) < clause.chance)?;
            ante = ante.max(first_hit);
        }

        let scores: Vec<i32> = self
            .filter
            .should
            .iter()
            .map(|clause| {
                let hits = clause
                    .antes
                    .iter()
                    .filter(|&&a| roll(seed, criteria, clause, a) < clause.chance)
                    .count() as i32;
                hits * clause.weight
            })
            .collect();
        let score: i64 = scores.iter().map(|&s| s as i64).sum();

        if score < criteria.min_score {
            return None;
        }
        Some(SearchResult::new(seed, score, scores, ante))
    }

    fn should_stop(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.stop_requested.load(Ordering::Acquire)
    }
}

impl SearchKernel for HashKernel {
    fn run(
        &self,
        criteria: &SearchCriteria,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), KernelError> {
        let total = criteria.max_seeds.unwrap_or(SEED_SPACE).min(SEED_SPACE);
        let batch_size = criteria.batch_size.max(1) as u64;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(criteria.thread_count.max(1))
            .thread_name(|i| format!("seed-worker-{i}"))
            .build()
            .map_err(|e| KernelError::Fault(e.into()))?;

        sink.report(SearchProgress::message(
            format!(
                "Searching {} seeds on {} threads",
                format_number(total as usize),
                criteria.thread_count
            ),
            0,
        ));

        let started = Instant::now();
        let mut searched = 0u64;
        let mut batch_num = 0u64;

        while searched < total {
            if self.should_stop(cancel) {
                debug!(seeds_searched = searched, "Cancellation observed");
                return Err(KernelError::Cancelled);
            }

            let end = (searched + batch_size).min(total);
            let found: Vec<SearchResult> = pool.install(|| {
                (searched..end)
                    .into_par_iter()
                    .filter_map(|i| self.evaluate(&seed_from_index(i), criteria))
                    .collect()
            });
            searched = end;
            batch_num += 1;

            for result in found {
                sink.report(SearchProgress::found(result, searched));
            }
            sink.report(SearchProgress::heartbeat(searched));

            if batch_num % STATUS_EVERY_BATCHES == 0 {
                let rate = seeds_per_sec(searched, started.elapsed());
                sink.report(SearchProgress::message(
                    format!(
                        "Searched {} seeds ({:.0} seeds/sec)",
                        format_number(searched as usize),
                        rate
                    ),
                    searched,
                ));
            }
        }

        sink.report(SearchProgress::message(
            format!("Search complete: {} seeds", format_number(total as usize)),
            total,
        ));
        sink.report(SearchProgress::complete(total));
        Ok(())
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }
}

/// Uniform value in `[0, 1)` for one clause in one ante.
fn roll(seed: &str, criteria: &SearchCriteria, clause: &FilterClause, ante: u8) -> f64 {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    criteria.deck.hash(&mut hasher);
    criteria.stake.hash(&mut hasher);
    clause.label.hash(&mut hasher);
    ante.hash(&mut hasher);
    let mixed = splitmix64(hasher.finish());
    (mixed >> 11) as f64 / (1u64 << 53) as f64
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Builds [`HashKernel`]s from filter files, resolving relative paths against
/// `filters_dir`.
#[derive(Debug, Clone, Default)]
pub struct HashKernelFactory {
    filters_dir: Option<PathBuf>,
}

impl HashKernelFactory {
    pub fn new(filters_dir: Option<PathBuf>) -> Self {
        Self { filters_dir }
    }

    fn load(&self, config_path: &str) -> Result<(FilterConfig, PathBuf), ConfigError> {
        let path = resolve_filter_path(config_path, self.filters_dir.as_deref());
        let filter = FilterConfig::load(&path)?;
        Ok((filter, path))
    }
}

impl KernelFactory for HashKernelFactory {
    fn load_config(&self, config_path: &str) -> Result<FilterSummary, ConfigError> {
        let (filter, path) = self.load(config_path)?;
        Ok(filter.summary(&path))
    }

    fn prepare(&self, criteria: &SearchCriteria) -> Result<Arc<dyn SearchKernel>, ConfigError> {
        let (filter, _) = self.load(&criteria.config_path)?;
        Ok(Arc::new(HashKernel::new(filter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn always_filter(weight: i32) -> FilterConfig {
        FilterConfig {
            name: "always".into(),
            deck: None,
            stake: None,
            must: vec![],
            should: vec![FilterClause {
                label: "Always".into(),
                chance: 1.0,
                weight,
                antes: vec![1, 2],
            }],
        }
    }

    fn collect(
        kernel: &HashKernel,
        criteria: &SearchCriteria,
    ) -> (Vec<SearchProgress>, Result<(), KernelError>) {
        let events = Mutex::new(Vec::new());
        let sink = |p: SearchProgress| events.lock().unwrap().push(p);
        let result = kernel.run(criteria, &sink, &CancellationToken::new());
        (events.into_inner().unwrap(), result)
    }

    #[test]
    fn test_seed_enumeration() {
        assert_eq!(seed_from_index(0), "11111111");
        assert_eq!(seed_from_index(1), "11111112");
        assert_eq!(seed_from_index(33), "1111111Z");
        assert_eq!(seed_from_index(34), "11111121");
        assert_eq!(seed_from_index(SEED_SPACE - 1), "ZZZZZZZZ");
        assert_eq!(SEED_SPACE, 34u64.pow(8));
    }

    #[test]
    fn test_certain_clause_matches_every_seed() {
        let kernel = HashKernel::new(always_filter(3));
        let criteria = SearchCriteria::new("unused").with_threads(2);
        let result = kernel.evaluate("ABCD1234", &criteria).unwrap();
        assert_eq!(result.scores, vec![6]);
        assert_eq!(result.score, 6);
        assert_eq!(result.ante, 1);

        let strict = criteria.with_min_score(7);
        assert!(kernel.evaluate("ABCD1234", &strict).is_none());
    }

    #[test]
    fn test_must_clause_gates_results() {
        let mut filter = always_filter(1);
        filter.must.push(FilterClause {
            label: "Never".into(),
            chance: f64::MIN_POSITIVE,
            weight: 1,
            antes: vec![1],
        });
        let kernel = HashKernel::new(filter);
        let criteria = SearchCriteria::new("unused");
        assert!(kernel.evaluate("ABCD1234", &criteria).is_none());
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let mut filter = always_filter(1);
        filter.should[0].chance = 0.5;
        let kernel = HashKernel::new(filter);
        let criteria = SearchCriteria::new("unused");
        let first: Vec<_> = (0..200)
            .map(|i| kernel.evaluate(&seed_from_index(i), &criteria).map(|r| r.score))
            .collect();
        let second: Vec<_> = (0..200)
            .map(|i| kernel.evaluate(&seed_from_index(i), &criteria).map(|r| r.score))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_run_reports_results_in_order_then_completes() {
        let kernel = HashKernel::new(always_filter(1));
        let criteria = SearchCriteria::new("unused")
            .with_threads(4)
            .with_batch_size(7)
            .with_max_seeds(Some(50));
        let (events, result) = collect(&kernel, &criteria);
        assert!(result.is_ok());

        let seeds: Vec<String> = events
            .iter()
            .filter_map(|p| p.new_result.as_ref().map(|r| r.seed.clone()))
            .collect();
        let expected: Vec<String> = (0..50).map(seed_from_index).collect();
        assert_eq!(seeds, expected);

        let completions: Vec<_> = events.iter().filter(|p| p.is_complete).collect();
        assert_eq!(completions.len(), 1);
        assert!(events.last().unwrap().is_complete);
        assert_eq!(events.last().unwrap().seeds_searched, 50);

        let counts: Vec<u64> = events.iter().map(|p| p.seeds_searched).collect();
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_cancelled_token_stops_before_first_batch() {
        let kernel = HashKernel::new(always_filter(1));
        let criteria = SearchCriteria::new("unused").with_max_seeds(Some(1000));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = |_: SearchProgress| {};
        let result = kernel.run(&criteria, &sink, &cancel);
        assert!(matches!(result, Err(KernelError::Cancelled)));
    }

    #[test]
    fn test_native_stop_hook_cancels() {
        let kernel = HashKernel::new(always_filter(1));
        kernel.request_stop();
        let criteria = SearchCriteria::new("unused").with_max_seeds(Some(1000));
        let sink = |_: SearchProgress| {};
        let result = kernel.run(&criteria, &sink, &CancellationToken::new());
        assert!(matches!(result, Err(KernelError::Cancelled)));
    }

    #[test]
    fn test_factory_rejects_missing_filter() {
        let factory = HashKernelFactory::new(None);
        let err = factory
            .prepare(&SearchCriteria::new("/no/such/filter.json"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
