//! Rate limiting between a kernel's raw progress and subscriber notifications.
//!
//! Two independent windows:
//! - result notifications, coalesced so a subscriber re-renders at most once
//!   per `result_window`. The results themselves are stored before the
//!   throttle is consulted, so coalescing never loses a match.
//! - status messages and heartbeats, coalesced per `message_window`. A newer
//!   message supersedes a pending one unless it is a must-show message.
//!
//! The throttle itself is clock-free. Pending notifications are released by
//! [`ProgressThrottle::poll`] once their window has elapsed, either from the
//! next incoming event or from the job's release timer, which sleeps until
//! [`ProgressThrottle::next_release`]. [`ProgressThrottle::flush`] releases
//! everything unconditionally before a terminal event.

use super::progress::SearchEvent;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_RESULT_WINDOW: Duration = Duration::from_millis(100);
pub const DEFAULT_MESSAGE_WINDOW: Duration = Duration::from_millis(250);
pub const DEFAULT_HEARTBEAT_EVERY: u64 = 10;

/// Predicate deciding whether a status message skips coalescing.
pub type MustShow = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Messages announcing a find or a completion are never coalesced away.
pub fn default_must_show(message: &str) -> bool {
    message.contains("Found") || message.contains("complete")
}

/// Window sizes and bypass rules for a [`ProgressThrottle`].
#[derive(Clone)]
pub struct ThrottleConfig {
    pub result_window: Duration,
    pub message_window: Duration,
    /// Every Nth heartbeat bypasses the message window (0 disables).
    pub heartbeat_every: u64,
    pub must_show: MustShow,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            result_window: DEFAULT_RESULT_WINDOW,
            message_window: DEFAULT_MESSAGE_WINDOW,
            heartbeat_every: DEFAULT_HEARTBEAT_EVERY,
            must_show: Arc::new(default_must_show),
        }
    }
}

impl fmt::Debug for ThrottleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleConfig")
            .field("result_window", &self.result_window)
            .field("message_window", &self.message_window)
            .field("heartbeat_every", &self.heartbeat_every)
            .finish_non_exhaustive()
    }
}

impl ThrottleConfig {
    pub fn with_windows(result_window: Duration, message_window: Duration) -> Self {
        Self {
            result_window,
            message_window,
            ..Default::default()
        }
    }

    /// No coalescing at all; every event is released as it arrives.
    pub fn unthrottled() -> Self {
        Self::with_windows(Duration::ZERO, Duration::ZERO)
    }

    pub fn with_must_show(
        mut self,
        must_show: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.must_show = Arc::new(must_show);
        self
    }
}

/// Per-job throttle state. Not shared; the owning job serializes access.
#[derive(Debug)]
pub struct ProgressThrottle {
    config: ThrottleConfig,
    last_result_release: Option<Instant>,
    pending_results: Option<usize>,
    last_message_release: Option<Instant>,
    pending_message: Option<String>,
    pending_progress: bool,
    heartbeats_seen: u64,
    seeds_searched: u64,
}

impl ProgressThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_result_release: None,
            pending_results: None,
            last_message_release: None,
            pending_message: None,
            pending_progress: false,
            heartbeats_seen: 0,
            seeds_searched: 0,
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// A result was stored; `found` is the accumulator count after the append.
    pub fn on_result(
        &mut self,
        now: Instant,
        found: usize,
        seeds_searched: u64,
    ) -> Vec<SearchEvent> {
        let mut released = self.poll(now, seeds_searched);
        if window_elapsed(self.last_result_release, now, self.config.result_window) {
            self.last_result_release = Some(now);
            self.pending_results = None;
            released.push(SearchEvent::ResultsUpdated {
                found,
                seeds_searched: self.seeds_searched,
            });
        } else {
            self.pending_results = Some(found);
        }
        released
    }

    pub fn on_message(
        &mut self,
        now: Instant,
        message: String,
        seeds_searched: u64,
    ) -> Vec<SearchEvent> {
        let mut released = self.poll(now, seeds_searched);
        if (self.config.must_show)(&message) {
            // Anything pending is older than this message.
            self.pending_message = None;
            self.pending_progress = false;
            released.push(self.status(message));
        } else if window_elapsed(self.last_message_release, now, self.config.message_window) {
            self.last_message_release = Some(now);
            self.pending_message = None;
            self.pending_progress = false;
            released.push(self.status(message));
        } else {
            self.pending_message = Some(message);
        }
        released
    }

    pub fn on_heartbeat(&mut self, now: Instant, seeds_searched: u64) -> Vec<SearchEvent> {
        let mut released = self.poll(now, seeds_searched);
        self.heartbeats_seen += 1;
        let decimated = self.config.heartbeat_every > 0
            && self.heartbeats_seen % self.config.heartbeat_every == 0;

        if decimated || window_elapsed(self.last_message_release, now, self.config.message_window) {
            if !decimated {
                self.last_message_release = Some(now);
            }
            // A pending status line already carries the seed count.
            match self.pending_message.take() {
                Some(message) => released.push(self.status(message)),
                None => released.push(SearchEvent::Progress {
                    seeds_searched: self.seeds_searched,
                }),
            }
            self.pending_progress = false;
        } else {
            self.pending_progress = true;
        }
        released
    }

    /// Release pending notifications whose window has elapsed.
    pub fn poll(&mut self, now: Instant, seeds_searched: u64) -> Vec<SearchEvent> {
        self.seeds_searched = self.seeds_searched.max(seeds_searched);
        let mut released = Vec::new();

        if self.pending_results.is_some()
            && window_elapsed(self.last_result_release, now, self.config.result_window)
        {
            self.last_result_release = Some(now);
            released.extend(self.take_results());
        }

        if (self.pending_message.is_some() || self.pending_progress)
            && window_elapsed(self.last_message_release, now, self.config.message_window)
        {
            self.last_message_release = Some(now);
            released.extend(self.take_message());
        }

        released
    }

    /// Release everything still pending, regardless of windows.
    pub fn flush(&mut self, seeds_searched: u64) -> Vec<SearchEvent> {
        self.seeds_searched = self.seeds_searched.max(seeds_searched);
        let mut released: Vec<SearchEvent> = self.take_results().into_iter().collect();
        released.extend(self.take_message());
        released
    }

    pub fn has_pending(&self) -> bool {
        self.pending_results.is_some() || self.pending_message.is_some() || self.pending_progress
    }

    /// When the earliest pending notification becomes releasable, or `None`
    /// when nothing is pending.
    pub fn next_release(&self, now: Instant) -> Option<Instant> {
        let results = self
            .pending_results
            .map(|_| release_at(self.last_result_release, now, self.config.result_window));
        let message = (self.pending_message.is_some() || self.pending_progress)
            .then(|| release_at(self.last_message_release, now, self.config.message_window));
        match (results, message) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn take_results(&mut self) -> Option<SearchEvent> {
        self.pending_results.take().map(|found| SearchEvent::ResultsUpdated {
            found,
            seeds_searched: self.seeds_searched,
        })
    }

    fn take_message(&mut self) -> Option<SearchEvent> {
        let had_progress = std::mem::take(&mut self.pending_progress);
        match self.pending_message.take() {
            Some(message) => Some(self.status(message)),
            None if had_progress => Some(SearchEvent::Progress {
                seeds_searched: self.seeds_searched,
            }),
            None => None,
        }
    }

    fn status(&self, message: String) -> SearchEvent {
        SearchEvent::Status {
            message,
            seeds_searched: self.seeds_searched,
        }
    }
}

fn release_at(last: Option<Instant>, now: Instant, window: Duration) -> Instant {
    match last {
        Some(last) => last + window,
        None => now,
    }
}

fn window_elapsed(last: Option<Instant>, now: Instant, window: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn throttle() -> (ProgressThrottle, Instant) {
        let throttle = ProgressThrottle::new(ThrottleConfig::default());
        (throttle, Instant::now())
    }

    #[test]
    fn test_first_result_is_released_immediately() {
        let (mut t, t0) = throttle();
        let events = t.on_result(t0, 1, 10);
        assert_eq!(
            events,
            vec![SearchEvent::ResultsUpdated {
                found: 1,
                seeds_searched: 10
            }]
        );
    }

    #[test]
    fn test_results_within_window_coalesce_to_latest_count() {
        let (mut t, t0) = throttle();
        t.on_result(t0, 1, 10);
        assert!(t.on_result(t0 + ms(10), 2, 20).is_empty());
        assert!(t.on_result(t0 + ms(50), 3, 30).is_empty());
        assert!(t.has_pending());

        let events = t.poll(t0 + ms(100), 40);
        assert_eq!(
            events,
            vec![SearchEvent::ResultsUpdated {
                found: 3,
                seeds_searched: 40
            }]
        );
        assert!(!t.has_pending());
    }

    #[test]
    fn test_flush_releases_pending_before_terminal() {
        let (mut t, t0) = throttle();
        t.on_result(t0, 1, 1);
        t.on_result(t0 + ms(1), 2, 2);
        t.on_message(t0, "first".into(), 2);
        t.on_message(t0 + ms(1), "second".into(), 2);

        let events = t.flush(5);
        assert_eq!(
            events,
            vec![
                SearchEvent::ResultsUpdated {
                    found: 2,
                    seeds_searched: 5
                },
                SearchEvent::Status {
                    message: "second".into(),
                    seeds_searched: 5
                },
            ]
        );
        assert!(t.flush(5).is_empty());
    }

    #[test]
    fn test_newer_message_supersedes_pending() {
        let (mut t, t0) = throttle();
        assert_eq!(t.on_message(t0, "a".into(), 0).len(), 1);
        assert!(t.on_message(t0 + ms(10), "b".into(), 0).is_empty());
        assert!(t.on_message(t0 + ms(20), "c".into(), 0).is_empty());

        let events = t.poll(t0 + ms(250), 0);
        assert_eq!(
            events,
            vec![SearchEvent::Status {
                message: "c".into(),
                seeds_searched: 0
            }]
        );
    }

    #[test]
    fn test_must_show_messages_bypass_window() {
        let (mut t, t0) = throttle();
        t.on_message(t0, "searching".into(), 0);
        assert!(t.on_message(t0 + ms(1), "pending".into(), 0).is_empty());

        let events = t.on_message(t0 + ms(2), "Found seed ABCD1234".into(), 0);
        assert_eq!(events.len(), 1);
        let events = t.on_message(t0 + ms(3), "Search complete".into(), 0);
        assert_eq!(events.len(), 1);
        // The superseded line is gone for good.
        assert!(t.flush(0).is_empty());
    }

    #[test]
    fn test_custom_must_show_predicate() {
        let config = ThrottleConfig::default().with_must_show(|m| m.starts_with('!'));
        let mut t = ProgressThrottle::new(config);
        let t0 = Instant::now();
        t.on_message(t0, "one".into(), 0);
        assert!(t.on_message(t0 + ms(1), "Found it".into(), 0).is_empty());
        assert_eq!(t.on_message(t0 + ms(2), "!urgent".into(), 0).len(), 1);
    }

    #[test]
    fn test_every_nth_heartbeat_bypasses() {
        let config = ThrottleConfig {
            heartbeat_every: 3,
            ..ThrottleConfig::default()
        };
        let mut t = ProgressThrottle::new(config);
        let t0 = Instant::now();

        assert_eq!(
            t.on_heartbeat(t0, 100),
            vec![SearchEvent::Progress {
                seeds_searched: 100
            }]
        );
        assert!(t.on_heartbeat(t0 + ms(1), 200).is_empty());
        assert_eq!(
            t.on_heartbeat(t0 + ms(2), 300),
            vec![SearchEvent::Progress {
                seeds_searched: 300
            }]
        );
        assert!(t.on_heartbeat(t0 + ms(3), 400).is_empty());
    }

    #[test]
    fn test_seed_count_never_goes_backwards() {
        let (mut t, t0) = throttle();
        t.on_heartbeat(t0, 500);
        let events = t.on_result(t0 + ms(1), 1, 100);
        assert_eq!(
            events,
            vec![SearchEvent::ResultsUpdated {
                found: 1,
                seeds_searched: 500
            }]
        );
    }

    #[test]
    fn test_unthrottled_releases_everything() {
        let mut t = ProgressThrottle::new(ThrottleConfig::unthrottled());
        let t0 = Instant::now();
        for i in 1..=5 {
            assert_eq!(t.on_result(t0, i, 0).len(), 1);
            assert_eq!(t.on_message(t0, format!("msg {i}"), 0).len(), 1);
        }
        assert!(!t.has_pending());
    }

    #[test]
    fn test_next_release_tracks_earliest_pending_window() {
        let (mut t, t0) = throttle();
        assert_eq!(t.next_release(t0), None);

        t.on_result(t0, 1, 0);
        t.on_message(t0, "first".into(), 0);
        assert_eq!(t.next_release(t0), None);

        t.on_message(t0 + ms(5), "second".into(), 0);
        assert_eq!(t.next_release(t0), Some(t0 + ms(250)));
        t.on_result(t0 + ms(5), 2, 0);
        assert_eq!(t.next_release(t0), Some(t0 + ms(100)));

        // Releasing at the deadline clears the result window only.
        let events = t.poll(t0 + ms(100), 0);
        assert_eq!(
            events,
            vec![SearchEvent::ResultsUpdated {
                found: 2,
                seeds_searched: 0
            }]
        );
        assert_eq!(t.next_release(t0), Some(t0 + ms(250)));
        assert_eq!(t.poll(t0 + ms(250), 0).len(), 1);
        assert_eq!(t.next_release(t0), None);
    }

    #[test]
    fn test_pending_status_released_by_heartbeat_after_window() {
        let (mut t, t0) = throttle();
        t.on_message(t0, "a".into(), 0);
        t.on_message(t0 + ms(1), "b".into(), 0);
        let events = t.on_heartbeat(t0 + ms(300), 50);
        assert_eq!(
            events,
            vec![SearchEvent::Status {
                message: "b".into(),
                seeds_searched: 50
            }]
        );
    }
}
