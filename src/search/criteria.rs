//! Search parameters handed to a kernel for one job.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Default number of seeds a kernel processes per unit of work.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Starting deck, passed through to the kernel untouched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum,
)]
pub enum Deck {
    #[default]
    Red,
    Blue,
    Yellow,
    Green,
    Black,
    Magic,
    Nebula,
    Ghost,
    Abandoned,
    Checkered,
    Zodiac,
    Painted,
    Anaglyph,
    Plasma,
    Erratic,
}

/// Stake level, passed through to the kernel untouched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum,
)]
pub enum Stake {
    #[default]
    White,
    Red,
    Green,
    Black,
    Blue,
    Purple,
    Orange,
    Gold,
}

/// Immutable description of one search job.
///
/// Built once per `start` call. Thread and batch counts are clamped to at
/// least one so kernels never have to guard against zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Filter definition, resolved by the kernel factory.
    pub config_path: String,
    /// Worker threads the kernel may use.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    /// Seeds per unit of work; cancellation latency is bounded by one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Results scoring below this are discarded by the kernel.
    #[serde(default)]
    pub min_score: i64,
    /// Upper bound on seeds explored; `None` covers the whole seed space.
    #[serde(default)]
    pub max_seeds: Option<u64>,
    #[serde(default)]
    pub deck: Deck,
    #[serde(default)]
    pub stake: Stake,
}

pub(crate) fn default_thread_count() -> usize {
    num_cpus::get().max(1)
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl SearchCriteria {
    /// Criteria for `config_path` with every other field defaulted.
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            thread_count: default_thread_count(),
            batch_size: DEFAULT_BATCH_SIZE,
            min_score: 0,
            max_seeds: None,
            deck: Deck::default(),
            stake: Stake::default(),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.thread_count = threads.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_min_score(mut self, min_score: i64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_max_seeds(mut self, max_seeds: Option<u64>) -> Self {
        self.max_seeds = max_seeds;
        self
    }

    pub fn with_deck(mut self, deck: Deck) -> Self {
        self.deck = deck;
        self
    }

    pub fn with_stake(mut self, stake: Stake) -> Self {
        self.stake = stake;
        self
    }

    /// Re-apply the positivity clamps after deserializing untrusted input.
    pub fn normalized(mut self) -> Self {
        self.thread_count = self.thread_count.max(1);
        self.batch_size = self.batch_size.max(1);
        self
    }
}
