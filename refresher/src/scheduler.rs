use crate::gateway::GatewayError;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::icao::Icao;
use shared::notam::FetchStatus;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Delay before re-examining the queue after skipping an entry that turned
/// out to be loaded/loading already. Keeps the loop from spinning.
const SKIP_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sliding-window budget: at most this many upstream calls...
    pub calls_per_window: usize,
    /// ...within any trailing window of this duration.
    pub window: Duration,
    /// Fixed pause between consecutive fetch attempts.
    pub inter_call_delay: Duration,
    /// Added to the wait when the window is saturated, so the oldest call
    /// has definitely expired when the loop wakes.
    pub safety_margin: Duration,
    /// Total attempts per code before it is marked permanently failed.
    pub retry_cap: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            calls_per_window: 25,
            window: Duration::from_secs(65),
            inter_call_delay: Duration::from_secs(3),
            safety_margin: Duration::from_millis(500),
            retry_cap: 3,
        }
    }
}

/// Queue entries carry their own retry count so the scheduler state is fully
/// inspectable without reaching into closures or side tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub code: Icao,
    pub retries: u32,
}

/// What the scheduler needs from the orchestrator: the session gate, status
/// lookups, and the actual fetch-and-apply step. Keeping it behind a trait
/// means the drain loop can be driven by a scripted dispatcher in tests.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn session_active(&self) -> bool;
    fn status(&self, code: &Icao) -> Option<FetchStatus>;
    fn mark_loading(&self, code: &Icao);
    /// Return a code to the queued state after a retryable failure, so the
    /// re-queued entry is not skipped as still loading.
    fn mark_queued(&self, code: &Icao);
    /// Fetch one code and apply the result. `Err` means retryable failure.
    async fn dispatch(&self, code: &Icao) -> Result<(), GatewayError>;
    fn mark_failed(&self, code: &Icao);
}

/// Strictly serialized, rate-limited drain of pending airport codes. Never
/// more than one fetch in flight; parks when the queue empties.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Mutex<VecDeque<QueueEntry>>,
    call_times: Mutex<Vec<Instant>>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            call_times: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Append codes not already pending, loading, or loaded. Idempotent with
    /// respect to the dispatcher's current status view.
    pub fn enqueue(&self, codes: &[Icao], dispatcher: &dyn Dispatcher) {
        let mut queue = self.queue.lock();
        for code in codes {
            if queue.iter().any(|entry| &entry.code == code) {
                continue;
            }
            if matches!(
                dispatcher.status(code),
                Some(FetchStatus::Loading | FetchStatus::Loaded)
            ) {
                continue;
            }
            queue.push_back(QueueEntry {
                code: code.clone(),
                retries: 0,
            });
        }
    }

    /// Begin draining on a background task if not already running. No-op for
    /// an empty queue or inactive session.
    pub fn start(self: Arc<Self>, dispatcher: Arc<dyn Dispatcher>) {
        if self.queue.lock().is_empty() || !dispatcher.session_active() {
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tokio::spawn(async move {
            loop {
                self.drain(dispatcher.as_ref()).await;
                self.running.store(false, Ordering::SeqCst);
                // An enqueue may have raced the shutdown of this task.
                if self.queue.lock().is_empty()
                    || !dispatcher.session_active()
                    || self
                        .running
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                {
                    break;
                }
            }
        });
    }

    /// One full drain: runs until the queue is empty or the session goes
    /// inactive. Errors never escape; every failure becomes a requeue or a
    /// terminal failed status.
    pub async fn drain(&self, dispatcher: &dyn Dispatcher) {
        loop {
            if !dispatcher.session_active() {
                info!("session inactive, stopping queue processing");
                return;
            }

            if let Some(wait) = self.window_saturated_for() {
                debug!(wait_ms = wait.as_millis() as u64, "rate window full, waiting");
                sleep(wait).await;
                continue;
            }

            let Some(entry) = self.queue.lock().pop_front() else {
                debug!("queue empty, scheduler going idle");
                return;
            };

            if matches!(
                dispatcher.status(&entry.code),
                Some(FetchStatus::Loading | FetchStatus::Loaded)
            ) {
                debug!(icao = %entry.code, "skipping already loaded/loading code");
                sleep(SKIP_DELAY).await;
                continue;
            }

            dispatcher.mark_loading(&entry.code);
            self.call_times.lock().push(Instant::now());

            match dispatcher.dispatch(&entry.code).await {
                Ok(()) => {}
                Err(e) => {
                    let attempts = entry.retries + 1;
                    if attempts < self.config.retry_cap {
                        warn!(icao = %entry.code, attempts, error = %e, "fetch failed, re-queueing");
                        dispatcher.mark_queued(&entry.code);
                        self.queue.lock().push_back(QueueEntry {
                            code: entry.code,
                            retries: attempts,
                        });
                    } else {
                        warn!(icao = %entry.code, attempts, error = %e, "retry cap exceeded, giving up");
                        dispatcher.mark_failed(&entry.code);
                    }
                }
            }

            sleep(self.config.inter_call_delay).await;
        }
    }

    /// When the sliding window is at capacity, the time until the oldest
    /// call expires (plus the safety margin); otherwise `None`.
    fn window_saturated_for(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut calls = self.call_times.lock();
        calls.retain(|t| now.duration_since(*t) < self.config.window);
        if calls.len() < self.config.calls_per_window {
            return None;
        }
        let oldest = *calls.first()?;
        Some(self.config.window - now.duration_since(oldest) + self.config.safety_margin)
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn queued_codes(&self) -> Vec<Icao> {
        self.queue.lock().iter().map(|e| e.code.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct ScriptedDispatcher {
        active: AtomicBool,
        statuses: Mutex<HashMap<Icao, FetchStatus>>,
        failures_remaining: Mutex<HashMap<Icao, u32>>,
        calls: Mutex<Vec<(Icao, Instant)>>,
        failed: Mutex<Vec<Icao>>,
    }

    impl ScriptedDispatcher {
        fn new() -> Self {
            Self {
                active: AtomicBool::new(true),
                statuses: Mutex::new(HashMap::new()),
                failures_remaining: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                failed: Mutex::new(Vec::new()),
            }
        }

        fn fail_times(&self, code: &Icao, times: u32) {
            self.failures_remaining.lock().insert(code.clone(), times);
        }

        fn call_log(&self) -> Vec<(Icao, Instant)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for ScriptedDispatcher {
        fn session_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn status(&self, code: &Icao) -> Option<FetchStatus> {
            self.statuses.lock().get(code).copied()
        }

        fn mark_loading(&self, code: &Icao) {
            self.statuses
                .lock()
                .insert(code.clone(), FetchStatus::Loading);
        }

        fn mark_queued(&self, code: &Icao) {
            self.statuses
                .lock()
                .insert(code.clone(), FetchStatus::Queued);
        }

        async fn dispatch(&self, code: &Icao) -> Result<(), GatewayError> {
            self.calls.lock().push((code.clone(), Instant::now()));
            let mut failures = self.failures_remaining.lock();
            if let Some(remaining) = failures.get_mut(code)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(GatewayError::Upstream {
                    message: "scripted failure".to_string(),
                    details: None,
                });
            }
            drop(failures);
            self.statuses
                .lock()
                .insert(code.clone(), FetchStatus::Loaded);
            Ok(())
        }

        fn mark_failed(&self, code: &Icao) {
            self.statuses
                .lock()
                .insert(code.clone(), FetchStatus::Failed);
            self.failed.lock().push(code.clone());
        }
    }

    fn codes(raw: &[&str]) -> Vec<Icao> {
        raw.iter().map(|c| c.parse().unwrap()).collect()
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            calls_per_window: 2,
            window: Duration::from_secs(10),
            inter_call_delay: Duration::from_millis(100),
            safety_margin: Duration::from_millis(500),
            retry_cap: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_rate_budget_in_any_window() {
        let scheduler = Scheduler::new(fast_config());
        let dispatcher = ScriptedDispatcher::new();
        scheduler.enqueue(&codes(&["KJFK", "KLGA", "KEWR", "KBOS", "KPHL"]), &dispatcher);

        scheduler.drain(&dispatcher).await;

        let calls = dispatcher.call_log();
        assert_eq!(calls.len(), 5);
        // With a budget of 2 per 10s window, call i+2 must start at least a
        // full window after call i.
        for pair in calls.windows(3) {
            let elapsed = pair[2].1.duration_since(pair[0].1);
            assert!(
                elapsed >= Duration::from_secs(10),
                "third call within a window: {elapsed:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_marks_code_failed_and_stops_requeueing() {
        let scheduler = Scheduler::new(fast_config());
        let dispatcher = ScriptedDispatcher::new();
        let bad: Icao = "CYOW".parse().unwrap();
        dispatcher.fail_times(&bad, 99);
        scheduler.enqueue(&[bad.clone()], &dispatcher);

        scheduler.drain(&dispatcher).await;

        assert_eq!(dispatcher.call_log().len(), 3, "exactly retry_cap attempts");
        assert_eq!(dispatcher.status(&bad), Some(FetchStatus::Failed));
        assert!(scheduler.is_empty(), "failed code must not be re-enqueued");
        assert_eq!(dispatcher.failed.lock().as_slice(), &[bad]);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_code_goes_to_the_back_of_the_queue() {
        let scheduler = Scheduler::new(fast_config());
        let dispatcher = ScriptedDispatcher::new();
        let flaky: Icao = "CYUL".parse().unwrap();
        dispatcher.fail_times(&flaky, 1);
        scheduler.enqueue(&[flaky.clone(), "KJFK".parse().unwrap()], &dispatcher);

        scheduler.drain(&dispatcher).await;

        let order: Vec<String> = dispatcher
            .call_log()
            .iter()
            .map(|(c, _)| c.to_string())
            .collect();
        assert_eq!(order, ["CYUL", "KJFK", "CYUL"]);
        assert_eq!(dispatcher.status(&flaky), Some(FetchStatus::Loaded));
    }

    #[tokio::test(start_paused = true)]
    async fn skips_codes_already_loaded() {
        let scheduler = Scheduler::new(fast_config());
        let dispatcher = ScriptedDispatcher::new();
        let loaded: Icao = "KSEA".parse().unwrap();
        scheduler.enqueue(&[loaded.clone()], &dispatcher);
        // Status changed underneath the queue, e.g. by a cache hit.
        dispatcher
            .statuses
            .lock()
            .insert(loaded.clone(), FetchStatus::Loaded);

        scheduler.drain(&dispatcher).await;
        assert!(dispatcher.call_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_is_idempotent() {
        let scheduler = Scheduler::new(fast_config());
        let dispatcher = ScriptedDispatcher::new();
        let code: Icao = "KDEN".parse().unwrap();
        scheduler.enqueue(&[code.clone()], &dispatcher);
        scheduler.enqueue(&[code.clone()], &dispatcher);
        assert_eq!(scheduler.len(), 1);

        dispatcher
            .statuses
            .lock()
            .insert(code.clone(), FetchStatus::Loaded);
        scheduler.clear();
        scheduler.enqueue(&[code], &dispatcher);
        assert!(scheduler.is_empty(), "loaded codes are not re-added");
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_session_stops_the_drain() {
        let scheduler = Scheduler::new(fast_config());
        let dispatcher = ScriptedDispatcher::new();
        dispatcher.active.store(false, Ordering::SeqCst);
        scheduler.enqueue(&codes(&["KJFK", "KBOS"]), &dispatcher);

        scheduler.drain(&dispatcher).await;

        assert!(dispatcher.call_log().is_empty());
        assert_eq!(scheduler.len(), 2, "queue preserved for reactivation");
    }
}
