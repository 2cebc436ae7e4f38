//! Lifecycle of one search: start, stop, progress fan-out and completion.
//!
//! Each job runs its kernel on a dedicated named thread. Raw progress from
//! the kernel goes through the job's [`JobSink`], which stores results in the
//! accumulator, asks the throttle what to release, and publishes the released
//! events. All of that happens under the job's own lock, so subscribers see
//! events in exactly the order the throttle released them, and the terminal
//! event is always last. A companion release thread sleeps until the
//! throttle's next deadline, so a coalesced notification goes out when its
//! window closes even if the kernel has gone quiet.

use super::accumulator::{MessageLog, ResultAccumulator};
use super::broadcast::{ProgressBroadcaster, SearchSubscription};
use super::criteria::SearchCriteria;
use super::error::StartError;
use super::progress::{JobId, Outcome, SearchEvent, SearchProgress, SearchResult, SearchState};
use super::registry::SearchId;
use super::throttle::{ProgressThrottle, ThrottleConfig};
use crate::kernel::{KernelError, KernelFactory, ProgressSink, SearchKernel};
use crate::utils::{format_bytes, format_number, now_millis, seeds_per_sec};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only view of an instance for listings and health output.
#[derive(Debug, Clone, Serialize)]
pub struct SearchSummary {
    pub id: SearchId,
    pub state: SearchState,
    pub job: JobId,
    pub found: usize,
    pub seeds_searched: u64,
    pub highest_score: Option<i64>,
    pub average_score: Option<f64>,
    pub last_message: Option<String>,
    pub criteria: Option<SearchCriteria>,
    /// Unix epoch millis of the current/last job start
    pub started_at: Option<u64>,
    pub elapsed_secs: Option<f64>,
    pub subscribers: usize,
}

/// State shared between the instance handle and its worker threads.
struct Shared {
    accumulator: ResultAccumulator,
    messages: MessageLog,
    broadcaster: ProgressBroadcaster,
    seeds_searched: AtomicU64,
    status: Mutex<Status>,
}

impl Shared {
    fn publish(&self, event: SearchEvent) {
        if let SearchEvent::Status { message, .. } = &event {
            self.messages.push(message.clone());
        }
        self.broadcaster.publish(&event);
    }
}

#[derive(Default)]
struct Status {
    state: SearchState,
    job: JobId,
    criteria: Option<SearchCriteria>,
    started_at: Option<u64>,
    started: Option<Instant>,
    finished: Option<Instant>,
    active: Option<ActiveJob>,
    /// Set once the registry drops the instance; no further jobs start.
    retired: bool,
}

/// Handles needed to stop the running job.
struct ActiveJob {
    cancel: CancellationToken,
    kernel: Arc<dyn SearchKernel>,
}

/// A single search, restartable once its previous job has ended.
pub struct SearchInstance {
    id: SearchId,
    factory: Arc<dyn KernelFactory>,
    throttle: ThrottleConfig,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SearchInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchInstance")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SearchInstance {
    pub fn new(
        id: SearchId,
        factory: Arc<dyn KernelFactory>,
        throttle: ThrottleConfig,
        message_log_capacity: usize,
    ) -> Self {
        Self {
            id,
            factory,
            throttle,
            shared: Arc::new(Shared {
                accumulator: ResultAccumulator::new(),
                messages: MessageLog::with_capacity(message_log_capacity),
                broadcaster: ProgressBroadcaster::new(),
                seeds_searched: AtomicU64::new(0),
                status: Mutex::new(Status::default()),
            }),
        }
    }

    pub fn id(&self) -> SearchId {
        self.id
    }

    /// Validate the filter, reset the accumulator and launch a new job.
    ///
    /// Returns as soon as the worker thread is spawned. Completion is
    /// reported through the terminal [`SearchEvent::Finished`].
    pub fn start(&self, criteria: SearchCriteria) -> Result<JobId, StartError> {
        let criteria = criteria.normalized();
        if self.state().is_running() {
            return Err(StartError::AlreadyRunning);
        }

        // Filter I/O happens outside the status lock.
        let kernel = self.factory.prepare(&criteria).inspect_err(|e| {
            warn!(search_id = %self.id, error = %e, "Filter rejected, search not started");
        })?;

        let mut status = lock(&self.shared.status);
        if status.retired {
            return Err(StartError::Removed);
        }
        if status.state.is_running() {
            return Err(StartError::AlreadyRunning);
        }

        let job = status.job + 1;
        let cancel = CancellationToken::new();
        self.shared.accumulator.reset(job);
        self.shared.messages.clear();
        self.shared.seeds_searched.store(0, Ordering::Release);

        status.state = SearchState::Running;
        status.job = job;
        status.criteria = Some(criteria.clone());
        status.started_at = Some(now_millis());
        status.started = Some(Instant::now());
        status.finished = None;
        status.active = Some(ActiveJob {
            cancel: cancel.clone(),
            kernel: kernel.clone(),
        });

        // Published before the worker exists so it is always the first event.
        self.shared.broadcaster.publish(&SearchEvent::Started {
            job,
            criteria: criteria.clone(),
        });

        info!(
            search_id = %self.id,
            job,
            config_path = %criteria.config_path,
            threads = criteria.thread_count,
            batch_size = criteria.batch_size,
            max_seeds = ?criteria.max_seeds,
            "Search started"
        );

        let context = Arc::new(JobContext {
            search_id: self.id,
            job,
            shared: self.shared.clone(),
            core: Mutex::new(JobCore {
                throttle: ProgressThrottle::new(self.throttle.clone()),
                finished: false,
            }),
            wake: Condvar::new(),
        });

        let worker_context = context.clone();
        let span = info_span!("search_job", search_id = %self.id, job);
        let spawned = std::thread::Builder::new()
            .name(format!("search-{}-job-{}", self.id, job))
            .spawn(move || {
                let _entered = span.enter();
                run_job(worker_context, kernel, criteria, cancel);
            });

        // The worker's completion path takes the status lock.
        drop(status);

        match spawned {
            Ok(_) => {
                let timer_context = context.clone();
                let timer = std::thread::Builder::new()
                    .name(format!("search-{}-job-{}-release", self.id, job))
                    .spawn(move || run_release_timer(timer_context));
                if let Err(e) = timer {
                    // Pending notifications still go out with the next event.
                    warn!(
                        search_id = %self.id,
                        job,
                        error = %e,
                        "Failed to spawn release timer"
                    );
                }
                Ok(job)
            }
            Err(e) => {
                error!(search_id = %self.id, job, error = %e, "Failed to spawn search worker");
                context.finish(
                    Outcome::Error,
                    Some(format!("Search failed to start: {e}")),
                );
                Err(StartError::Spawn(e))
            }
        }
    }

    /// Request cancellation of the running job. A no-op when nothing runs.
    ///
    /// Returns immediately; the job is over once `Finished` is delivered.
    pub fn stop(&self) {
        let handles = lock(&self.shared.status)
            .active
            .as_ref()
            .map(|active| (active.cancel.clone(), active.kernel.clone()));

        if let Some((cancel, kernel)) = handles {
            if !cancel.is_cancelled() {
                info!(search_id = %self.id, "Stop requested");
            }
            cancel.cancel();
            kernel.request_stop();
        }
    }

    /// Refuse all future starts unless a job is running right now.
    ///
    /// Checked and set under the same lock `start` takes, so an instance is
    /// never retired while a job it just launched is running.
    pub(crate) fn retire(&self) -> bool {
        let mut status = lock(&self.shared.status);
        if status.state.is_running() {
            return false;
        }
        status.retired = true;
        true
    }

    /// Attach a new subscriber; it receives every event released from now on.
    pub fn subscribe(&self) -> SearchSubscription {
        self.shared.broadcaster.subscribe()
    }

    /// Subscribe, then snapshot, so no result falls between the two.
    pub fn attach(&self) -> (Vec<SearchResult>, SearchSubscription) {
        let subscription = self.subscribe();
        (self.shared.accumulator.snapshot(), subscription)
    }

    pub fn accumulator(&self) -> &ResultAccumulator {
        &self.shared.accumulator
    }

    pub fn messages(&self) -> &MessageLog {
        &self.shared.messages
    }

    pub fn last_message(&self) -> Option<String> {
        self.shared.messages.last()
    }

    pub fn state(&self) -> SearchState {
        lock(&self.shared.status).state
    }

    pub fn job(&self) -> JobId {
        lock(&self.shared.status).job
    }

    pub fn criteria(&self) -> Option<SearchCriteria> {
        lock(&self.shared.status).criteria.clone()
    }

    pub fn seeds_searched(&self) -> u64 {
        self.shared.seeds_searched.load(Ordering::Acquire)
    }

    pub fn summary(&self) -> SearchSummary {
        let status = lock(&self.shared.status);
        let elapsed_secs = status.started.map(|started| {
            status
                .finished
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started)
                .as_secs_f64()
        });
        let accumulator = &self.shared.accumulator;
        SearchSummary {
            id: self.id,
            state: status.state,
            job: status.job,
            found: accumulator.count(),
            seeds_searched: self.seeds_searched(),
            highest_score: accumulator.highest_score(),
            average_score: accumulator.average_score(),
            last_message: self.shared.messages.last(),
            criteria: status.criteria.clone(),
            started_at: status.started_at,
            elapsed_secs,
            subscribers: self.shared.broadcaster.subscriber_count(),
        }
    }
}

/// Per-job state. Once `finished` is set, nothing more is accepted from the
/// job's kernel, so a late or misbehaving worker cannot touch the next job.
struct JobContext {
    search_id: SearchId,
    job: JobId,
    shared: Arc<Shared>,
    core: Mutex<JobCore>,
    /// Signals the release timer that a deadline appeared or the job ended.
    wake: Condvar,
}

struct JobCore {
    throttle: ProgressThrottle,
    finished: bool,
}

impl JobContext {
    fn record_seeds(&self, seeds: u64) -> u64 {
        let previous = self.shared.seeds_searched.fetch_max(seeds, Ordering::AcqRel);
        previous.max(seeds)
    }

    fn handle(&self, progress: SearchProgress) {
        let now = Instant::now();
        let mut core = lock(&self.core);
        if core.finished {
            return;
        }

        let heartbeat = progress.is_heartbeat();
        let seeds = self.record_seeds(progress.seeds_searched);
        let mut released = Vec::new();

        if let Some(result) = progress.new_result {
            let found = self.shared.accumulator.append(result);
            released.extend(core.throttle.on_result(now, found, seeds));
        }
        if let Some(message) = progress.message {
            released.extend(core.throttle.on_message(now, message, seeds));
        }
        if heartbeat {
            released.extend(core.throttle.on_heartbeat(now, seeds));
        }

        for event in released {
            self.shared.publish(event);
        }

        if progress.is_complete {
            self.finish_locked(&mut core, Outcome::Completed, None);
        } else if core.throttle.has_pending() {
            self.wake.notify_one();
        }
    }

    /// Release whatever the throttle is holding once its window closes.
    fn release_due(&self, core: &mut JobCore, now: Instant) {
        let seeds = self.shared.seeds_searched.load(Ordering::Acquire);
        for event in core.throttle.poll(now, seeds) {
            self.shared.publish(event);
        }
    }

    fn is_finished(&self) -> bool {
        lock(&self.core).finished
    }

    fn finish(&self, outcome: Outcome, message: Option<String>) {
        let mut core = lock(&self.core);
        self.finish_locked(&mut core, outcome, message);
    }

    /// Flush the throttle, move the instance to its terminal state and
    /// publish `Finished`. Runs at most once per job.
    fn finish_locked(&self, core: &mut JobCore, outcome: Outcome, message: Option<String>) {
        if core.finished {
            return;
        }
        core.finished = true;
        self.wake.notify_one();

        let seeds = self.shared.seeds_searched.load(Ordering::Acquire);
        for event in core.throttle.flush(seeds) {
            self.shared.publish(event);
        }
        if let Some(message) = &message {
            self.shared.publish(SearchEvent::Status {
                message: message.clone(),
                seeds_searched: seeds,
            });
        }

        let found = self.shared.accumulator.count();
        info!(
            search_id = %self.search_id,
            job = self.job,
            outcome = ?outcome,
            found,
            seeds_searched = seeds,
            "Search finished"
        );

        // Published under the status lock so a restart's `Started` cannot
        // overtake it.
        let mut status = lock(&self.shared.status);
        if status.job == self.job {
            status.state = outcome.into();
            status.finished = Some(Instant::now());
            status.active = None;
        }
        self.shared.publish(SearchEvent::Finished {
            outcome,
            found,
            seeds_searched: seeds,
            message,
        });
    }
}

/// Release thread body: sleep until the throttle's next deadline and publish
/// what became due, until the job finishes.
fn run_release_timer(context: Arc<JobContext>) {
    let mut core = lock(&context.core);
    while !core.finished {
        let now = Instant::now();
        core = match core.throttle.next_release(now) {
            None => context
                .wake
                .wait(core)
                .unwrap_or_else(PoisonError::into_inner),
            Some(deadline) if deadline <= now => {
                context.release_due(&mut core, now);
                core
            }
            Some(deadline) => context
                .wake
                .wait_timeout(core, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0),
        };
    }
    debug!(search_id = %context.search_id, job = context.job, "Release timer stopped");
}

/// The sink handed to the kernel.
struct JobSink {
    context: Arc<JobContext>,
}

impl ProgressSink for JobSink {
    fn report(&self, progress: SearchProgress) {
        self.context.handle(progress);
    }
}

/// Worker thread body: run the kernel and classify how it ended.
fn run_job(
    context: Arc<JobContext>,
    kernel: Arc<dyn SearchKernel>,
    criteria: SearchCriteria,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let sink = JobSink {
        context: context.clone(),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        kernel.run(&criteria, &sink, &cancel)
    }));

    match outcome {
        Ok(Ok(())) => {
            if !context.is_finished() {
                if cancel.is_cancelled() {
                    context.finish(Outcome::Cancelled, None);
                } else {
                    warn!(
                        search_id = %context.search_id,
                        job = context.job,
                        "Kernel returned without reporting completion"
                    );
                    context.finish(
                        Outcome::Error,
                        Some("Search ended early: kernel returned before completing".to_string()),
                    );
                }
            }
        }
        Ok(Err(KernelError::Cancelled)) => context.finish(Outcome::Cancelled, None),
        Ok(Err(KernelError::Fault(e))) => {
            error!(
                search_id = %context.search_id,
                job = context.job,
                error = %e,
                "Search kernel failed"
            );
            context.finish(Outcome::Error, Some(format!("Search failed: {e:#}")));
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(
                search_id = %context.search_id,
                job = context.job,
                reason = %reason,
                "Search kernel panicked"
            );
            context.finish(
                Outcome::Error,
                Some(format!("Search worker panicked: {reason}")),
            );
        }
    }

    log_completion_stats(&context, started.elapsed());
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_completion_stats(context: &JobContext, elapsed: Duration) {
    let seeds = context.shared.seeds_searched.load(Ordering::Acquire);

    let process_memory = {
        use sysinfo::{Pid, ProcessesToUpdate, System};
        let pid = Pid::from_u32(std::process::id());
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).map(|p| p.memory()).unwrap_or(0)
    };

    info!(
        search_id = %context.search_id,
        job = context.job,
        elapsed_secs = format!("{:.1}", elapsed.as_secs_f64()),
        seeds_searched = %format_number(seeds as usize),
        seeds_per_sec = format!("{:.0}", seeds_per_sec(seeds, elapsed)),
        found = context.shared.accumulator.count(),
        process_memory = %format_bytes(process_memory),
        "Search worker exited"
    );
}
