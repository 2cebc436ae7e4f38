//! Configuration management for seed_orchestrator
//!
//! Supports loading configuration from TOML files with CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::search::accumulator::DEFAULT_MESSAGE_LOG_CAPACITY;
use crate::search::criteria::{Deck, SearchCriteria, Stake, DEFAULT_BATCH_SIZE};
use crate::search::throttle::{
    ThrottleConfig, DEFAULT_HEARTBEAT_EVERY, DEFAULT_MESSAGE_WINDOW, DEFAULT_RESULT_WINDOW,
};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SEEDORCH_CONFIG";

/// Telemetry / OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Enable OpenTelemetry trace export (default: false)
    /// Can be overridden by env var SEEDORCH_TRACING_ENABLED or OTEL_SDK_DISABLED
    #[serde(default)]
    pub enabled: bool,

    /// OTLP exporter endpoint (default: http://localhost:4317)
    /// Can be overridden by env var OTEL_EXPORTER_OTLP_ENDPOINT
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,

    /// Service name reported to the collector (default: seed_orchestrator)
    /// Can be overridden by env var OTEL_SERVICE_NAME
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "seed_orchestrator".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
        }
    }
}

impl TelemetryConfig {
    /// Apply environment variable overrides.
    /// Env vars take precedence over TOML config values.
    pub fn with_env_overrides(mut self) -> Self {
        // OTEL_SDK_DISABLED=true → disabled (official OTel convention)
        if let Ok(val) = std::env::var("OTEL_SDK_DISABLED") {
            if val.eq_ignore_ascii_case("true") {
                self.enabled = false;
            }
        }
        if let Ok(val) = std::env::var("SEEDORCH_TRACING_ENABLED") {
            self.enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }
        if let Ok(val) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            if !val.is_empty() {
                self.otlp_endpoint = val;
            }
        }
        if let Ok(val) = std::env::var("OTEL_SERVICE_NAME") {
            if !val.is_empty() {
                self.service_name = val;
            }
        }
        self
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub search: SearchDefaults,

    #[serde(default)]
    pub throttle: ThrottleSettings,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP/WebSocket API to
    #[serde(default = "default_address")]
    pub address: String,

    /// Enable the REST and WebSocket API
    #[serde(default = "default_enable_web_ui")]
    pub enable_web_ui: bool,
}

/// Defaults applied to every search started without explicit values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDefaults {
    /// Worker threads per search (0 = logical CPU count)
    #[serde(default)]
    pub thread_count: usize,

    /// Seeds per batch; bounds how quickly a stop is observed
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub min_score: i64,

    /// Cap on seeds per search (unset = whole seed space)
    #[serde(default)]
    pub max_seeds: Option<u64>,

    #[serde(default)]
    pub deck: Deck,

    #[serde(default)]
    pub stake: Stake,

    /// Directory that relative filter paths are resolved against
    #[serde(default)]
    pub filters_dir: Option<String>,
}

/// Progress throttling windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    #[serde(default = "default_result_window_ms")]
    pub result_window_ms: u64,

    #[serde(default = "default_message_window_ms")]
    pub message_window_ms: u64,

    /// Every Nth heartbeat bypasses the message window (0 = never)
    #[serde(default = "default_heartbeat_every")]
    pub heartbeat_every: u64,

    /// Status lines kept per search for late subscribers
    #[serde(default = "default_message_log_capacity")]
    pub message_log_capacity: usize,
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_enable_web_ui() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_result_window_ms() -> u64 {
    DEFAULT_RESULT_WINDOW.as_millis() as u64
}

fn default_message_window_ms() -> u64 {
    DEFAULT_MESSAGE_WINDOW.as_millis() as u64
}

fn default_heartbeat_every() -> u64 {
    DEFAULT_HEARTBEAT_EVERY
}

fn default_message_log_capacity() -> usize {
    DEFAULT_MESSAGE_LOG_CAPACITY
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            enable_web_ui: default_enable_web_ui(),
        }
    }
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            thread_count: 0,
            batch_size: default_batch_size(),
            min_score: 0,
            max_seeds: None,
            deck: Deck::default(),
            stake: Stake::default(),
            filters_dir: None,
        }
    }
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            result_window_ms: default_result_window_ms(),
            message_window_ms: default_message_window_ms(),
            heartbeat_every: default_heartbeat_every(),
            message_log_capacity: default_message_log_capacity(),
        }
    }
}

impl ThrottleSettings {
    pub fn to_throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            heartbeat_every: self.heartbeat_every,
            ..ThrottleConfig::with_windows(
                Duration::from_millis(self.result_window_ms),
                Duration::from_millis(self.message_window_ms),
            )
        }
    }
}

impl SearchDefaults {
    /// Criteria for `config_path` with these defaults applied.
    pub fn criteria_for(&self, config_path: impl Into<String>) -> SearchCriteria {
        let mut criteria = SearchCriteria::new(config_path)
            .with_batch_size(self.batch_size)
            .with_min_score(self.min_score)
            .with_max_seeds(self.max_seeds)
            .with_deck(self.deck)
            .with_stake(self.stake);
        if self.thread_count > 0 {
            criteria = criteria.with_threads(self.thread_count);
        }
        criteria
    }

    pub fn filters_dir(&self) -> Option<PathBuf> {
        self.filters_dir.as_ref().map(PathBuf::from)
    }
}

/// Overrides collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub address: Option<String>,
    pub thread_count: Option<usize>,
    pub batch_size: Option<usize>,
    pub min_score: Option<i64>,
    pub max_seeds: Option<u64>,
    pub deck: Option<Deck>,
    pub stake: Option<Stake>,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from default locations
    ///
    /// Search order:
    /// 1. SEEDORCH_CONFIG environment variable
    /// 2. ./seed_orchestrator.toml (current directory)
    /// 3. ~/.config/seed_orchestrator/config.toml (user config)
    pub fn from_default_locations() -> Result<Option<(Self, PathBuf)>> {
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok(Some((config, path)));
            }
            tracing::warn!(
                path = %env_path,
                "{} points at a missing file, ignoring",
                CONFIG_ENV_VAR
            );
        }

        let local_path = PathBuf::from("seed_orchestrator.toml");
        if local_path.exists() {
            let config = Self::from_file(&local_path)?;
            return Ok(Some((config, local_path)));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("seed_orchestrator").join("config.toml");
            if user_path.exists() {
                let config = Self::from_file(&user_path)?;
                return Ok(Some((config, user_path)));
            }
        }

        Ok(None)
    }

    /// Generate a template configuration file
    pub fn generate_template() -> String {
        r#"# Seed Orchestrator Configuration
# Generated template - customize as needed

[server]
# Address to bind the REST/WebSocket API to
address = "127.0.0.1:8080"
enable_web_ui = true

[search]
# Worker threads per search (0 = number of logical CPUs)
thread_count = 0

# Seeds per batch. A stop request is observed within one batch.
batch_size = 4096

# Discard results scoring below this threshold
min_score = 0

# Cap on seeds per search (omit to cover the whole seed space)
# max_seeds = 10000000

deck = "Red"
stake = "White"

# Directory that relative filter paths are resolved against (optional)
# filters_dir = "filters"

[throttle]
# Minimum interval between result notifications to subscribers
result_window_ms = 100

# Minimum interval between status/progress notifications
message_window_ms = 250

# Every Nth heartbeat is delivered regardless of the window (0 = never)
heartbeat_every = 10

# Status lines kept per search for late subscribers
message_log_capacity = 100

[telemetry]
# Enable OpenTelemetry trace export (default: false)
# Set to true to enable OTLP export (console logging is always active)
# Env overrides: OTEL_SDK_DISABLED=true, SEEDORCH_TRACING_ENABLED=true
enabled = false

# OTLP gRPC exporter endpoint (default: http://localhost:4317)
# Env override: OTEL_EXPORTER_OTLP_ENDPOINT
otlp_endpoint = "http://localhost:4317"

# Service name reported to the collector
# Env override: OTEL_SERVICE_NAME
service_name = "seed_orchestrator"
"#
        .to_string()
    }

    /// Write template config to the specified path
    pub fn write_template(path: &Path) -> Result<()> {
        let template = Self::generate_template();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, template)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Merge CLI overrides into the configuration
    pub fn with_overrides(mut self, overrides: CliOverrides) -> Self {
        if let Some(addr) = overrides.address {
            self.server.address = addr;
        }
        if let Some(threads) = overrides.thread_count {
            self.search.thread_count = threads;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.search.batch_size = batch_size;
        }
        if let Some(min_score) = overrides.min_score {
            self.search.min_score = min_score;
        }
        if overrides.max_seeds.is_some() {
            self.search.max_seeds = overrides.max_seeds;
        }
        if let Some(deck) = overrides.deck {
            self.search.deck = deck;
        }
        if let Some(stake) = overrides.stake {
            self.search.stake = stake;
        }
        self
    }
}
