//! Filter files understood by the reference kernel.
//!
//! ```json
//! { "name": "Example",
//!   "must":   [ { "label": "Telescope", "chance": 0.5, "antes": [1, 2] } ],
//!   "should": [ { "label": "Blueprint", "chance": 0.1, "weight": 3, "antes": [1, 2, 3] } ] }
//! ```

use super::ConfigError;
use crate::search::{Deck, Stake};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Highest ante a clause may reference.
pub const MAX_ANTE: u8 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub label: String,
    /// Probability that the clause hits in a given ante.
    pub chance: f64,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default = "default_antes")]
    pub antes: Vec<u8>,
}

fn default_weight() -> i32 {
    1
}

fn default_antes() -> Vec<u8> {
    vec![1]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub name: String,
    /// Informational; the criteria's deck/stake are what the kernel uses.
    #[serde(default)]
    pub deck: Option<Deck>,
    #[serde(default)]
    pub stake: Option<Stake>,
    #[serde(default)]
    pub must: Vec<FilterClause>,
    #[serde(default)]
    pub should: Vec<FilterClause>,
}

/// What a caller learns from validating a filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSummary {
    pub name: String,
    pub path: String,
    /// Score column labels, one per `should` clause.
    pub labels: Vec<String>,
    pub must_clauses: usize,
}

impl FilterConfig {
    /// Read, parse and validate a filter file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::NotFound(display));
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: display.clone(),
            message: e.to_string(),
        })?;
        let config: FilterConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Invalid {
                path: display.clone(),
                message: e.to_string(),
            })?;
        config.validate().map_err(|message| ConfigError::Invalid {
            path: display,
            message,
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.must.is_empty() && self.should.is_empty() {
            return Err("filter has no must or should clauses".to_string());
        }
        for clause in self.must.iter().chain(&self.should) {
            if clause.label.trim().is_empty() {
                return Err("clause label must not be empty".to_string());
            }
            if !(clause.chance > 0.0 && clause.chance <= 1.0) {
                return Err(format!(
                    "clause '{}' has chance {} outside (0, 1]",
                    clause.label, clause.chance
                ));
            }
            if clause.antes.is_empty() {
                return Err(format!("clause '{}' lists no antes", clause.label));
            }
            if let Some(ante) = clause.antes.iter().find(|a| **a == 0 || **a > MAX_ANTE) {
                return Err(format!(
                    "clause '{}' references ante {} outside 1..={}",
                    clause.label, ante, MAX_ANTE
                ));
            }
        }
        Ok(())
    }

    pub fn labels(&self) -> Vec<String> {
        self.should.iter().map(|c| c.label.clone()).collect()
    }

    pub fn summary(&self, path: &Path) -> FilterSummary {
        let name = if self.name.is_empty() {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        } else {
            self.name.clone()
        };
        FilterSummary {
            name,
            path: path.display().to_string(),
            labels: self.labels(),
            must_clauses: self.must.len(),
        }
    }
}

/// Resolve `config_path` against an optional filters directory.
///
/// Absolute paths and paths that exist relative to the working directory are
/// used as given.
pub fn resolve_filter_path(config_path: &str, filters_dir: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(config_path);
    if path.is_absolute() || path.exists() {
        return path;
    }
    match filters_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}
