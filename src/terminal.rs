//! Terminal progress surface for headless runs.
//!
//! A subscriber like any other: it renders throttled events from one
//! instance onto an `indicatif` bar (or a spinner when the seed space is
//! unbounded) and prints the final table to stdout.

use crate::search::{Outcome, SearchEvent, SearchInstance, SearchResult, SearchSubscription};
use crate::utils::{format_number, format_rate, seeds_per_sec};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

const BAR_TEMPLATE: &str = concat!(
    "{msg}\n",
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})"
);
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

pub struct TerminalSurface {
    bar: ProgressBar,
    started: Instant,
    found: usize,
}

impl TerminalSurface {
    /// Bar over `total` seeds, or a spinner when there is no bound.
    pub fn new(total: Option<u64>) -> Self {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
                    bar.set_style(style.progress_chars("█▓░"));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
                    bar.set_style(style);
                }
                bar
            }
        };
        bar.enable_steady_tick(Duration::from_millis(80));
        Self::with_bar(bar)
    }

    /// Surface drawing to an existing bar, e.g. `ProgressBar::hidden()`.
    pub fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            started: Instant::now(),
            found: 0,
        }
    }

    pub fn found(&self) -> usize {
        self.found
    }

    pub fn render(&mut self, event: &SearchEvent) {
        match event {
            SearchEvent::Started { criteria, .. } => {
                self.started = Instant::now();
                self.found = 0;
                self.bar.set_position(0);
                self.bar.set_message(format!(
                    "Searching with {} ({} threads)",
                    criteria.config_path, criteria.thread_count
                ));
            }
            SearchEvent::ResultsUpdated {
                found,
                seeds_searched,
            } => {
                self.found = *found;
                self.bar.set_position(*seeds_searched);
                self.bar.set_message(self.status_line(*seeds_searched));
            }
            SearchEvent::Progress { seeds_searched } => {
                self.bar.set_position(*seeds_searched);
                self.bar.set_message(self.status_line(*seeds_searched));
            }
            SearchEvent::Status {
                message,
                seeds_searched,
            } => {
                self.bar.set_position(*seeds_searched);
                self.bar.set_message(message.clone());
            }
            SearchEvent::Finished {
                outcome,
                found,
                seeds_searched,
                message,
            } => {
                self.found = *found;
                self.bar.set_position(*seeds_searched);
                let verb = match outcome {
                    Outcome::Completed => "Search complete",
                    Outcome::Cancelled => "Search stopped",
                    Outcome::Error => "Search failed",
                };
                let mut line = format!(
                    "{verb}: {} found in {} seeds",
                    format_number(*found),
                    format_number(*seeds_searched as usize)
                );
                if let Some(message) = message {
                    let _ = write!(line, " ({message})");
                }
                self.bar.finish_with_message(line);
            }
        }
    }

    fn status_line(&self, seeds_searched: u64) -> String {
        let rate = seeds_per_sec(seeds_searched, self.started.elapsed());
        format!(
            "{} found | {} seeds | {} seeds/s",
            format_number(self.found),
            format_number(seeds_searched as usize),
            format_rate(rate)
        )
    }

    /// Render events until the job's terminal event, then return it.
    pub async fn follow(&mut self, subscription: &mut SearchSubscription) -> Option<SearchEvent> {
        while let Some(event) = subscription.recv().await {
            self.render(&event);
            if event.is_terminal() {
                return Some(event);
            }
        }
        self.bar.abandon();
        None
    }
}

/// Highest-scoring `limit` results, best first. Ties keep discovery order.
pub fn top_results(instance: &SearchInstance, limit: usize) -> Vec<SearchResult> {
    let mut results = instance.accumulator().snapshot();
    results.sort_by(|a, b| b.score.cmp(&a.score));
    results.truncate(limit);
    results
}

/// Plain-text table of results with one column per filter label.
pub fn format_results_table(results: &[SearchResult], labels: &[String]) -> String {
    let mut out = String::new();
    let _ = write!(out, "{:<10} {:>6} {:>5}", "SEED", "SCORE", "ANTE");
    for label in labels {
        let _ = write!(out, " {:>width$}", label, width = label.len().max(3));
    }
    out.push('\n');

    for result in results {
        let _ = write!(out, "{:<10} {:>6} {:>5}", result.seed, result.score, result.ante);
        for (i, label) in labels.iter().enumerate() {
            let value = result.scores.get(i).copied().unwrap_or(0);
            let _ = write!(out, " {:>width$}", value, width = label.len().max(3));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchCriteria;

    fn hidden() -> TerminalSurface {
        TerminalSurface::with_bar(ProgressBar::hidden())
    }

    #[test]
    fn test_render_tracks_found_count() {
        let mut surface = hidden();
        surface.render(&SearchEvent::Started {
            job: 1,
            criteria: SearchCriteria::new("f.json"),
        });
        surface.render(&SearchEvent::ResultsUpdated {
            found: 4,
            seeds_searched: 100,
        });
        assert_eq!(surface.found(), 4);
        surface.render(&SearchEvent::Finished {
            outcome: Outcome::Completed,
            found: 6,
            seeds_searched: 200,
            message: None,
        });
        assert_eq!(surface.found(), 6);
        assert!(surface.bar.is_finished());
    }

    #[test]
    fn test_results_table_has_label_columns() {
        let results = vec![
            SearchResult::new("ABCDEFGH", 12, vec![10, 2], 1),
            SearchResult::new("11111111", 3, vec![3], 2),
        ];
        let labels = vec!["Perkeo".to_string(), "Blueprint".to_string()];
        let table = format_results_table(&results, &labels);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Perkeo") && lines[0].contains("Blueprint"));
        assert!(lines[1].starts_with("ABCDEFGH"));
        // Missing per-label scores render as zero
        assert!(lines[2].trim_end().ends_with('0'));
    }
}
