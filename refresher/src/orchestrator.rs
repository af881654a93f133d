use crate::cache::DiskCache;
use crate::gateway::{FetchGateway, FetchOutcome, GatewayError};
use crate::notify::Event;
use crate::scheduler::{Dispatcher, Scheduler};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use shared::icao::Icao;
use shared::notam::{FetchStatus, NewNotamMarker, NotamRecord, diff};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub auto_refresh_interval: Duration,
    /// How long a "new notice" marker survives before the sweep removes it.
    pub highlight_window: chrono::Duration,
    pub sweep_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_refresh_interval: Duration::from_secs(300),
            highlight_window: chrono::Duration::seconds(60),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Single-tab arbitration reduced to the one bit the core needs: is this
/// process the active session. The scheduler checks it before every step.
#[derive(Debug)]
pub struct SessionGate {
    active: AtomicBool,
}

impl SessionGate {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct CoreState {
    configured: Vec<Icao>,
    status: HashMap<Icao, FetchStatus>,
    records: HashMap<Icao, Vec<NotamRecord>>,
    markers: HashMap<Icao, Vec<NewNotamMarker>>,
    /// Codes whose pending fetch was triggered by the silent auto-refresh
    /// timer. Membership suppresses popup notifications but not highlight
    /// markers, and is consumed when the fetch resolves, so a concurrent
    /// manually triggered load keeps its notifications.
    silent_codes: HashSet<Icao>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: usize,
    pub loading: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// Top-level state machine of the refresh pipeline. Owns the per-code status
/// table, the record store, the highlight markers, and every timer; all
/// mutations of shared state go through its transition functions.
pub struct Orchestrator {
    state: RwLock<CoreState>,
    scheduler: Arc<Scheduler>,
    gateway: Arc<dyn FetchGateway>,
    session: Arc<SessionGate>,
    events: UnboundedSender<Event>,
    cache: Option<DiskCache>,
    config: OrchestratorConfig,
    countdown: AtomicU64,
    /// Self-reference handed to the scheduler as its dispatcher.
    weak: Weak<Orchestrator>,
}

impl Orchestrator {
    pub fn new(
        scheduler: Arc<Scheduler>,
        gateway: Arc<dyn FetchGateway>,
        session: Arc<SessionGate>,
        events: UnboundedSender<Event>,
        cache: Option<DiskCache>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let countdown = AtomicU64::new(config.auto_refresh_interval.as_secs());
        Arc::new_cyclic(|weak| Self {
            state: RwLock::new(CoreState::default()),
            scheduler,
            gateway,
            session,
            events,
            cache,
            config,
            countdown,
            weak: weak.clone(),
        })
    }

    /// Initial registration: pre-populate from a fresh disk cache when one
    /// exists, then enqueue everything still cold.
    pub fn bootstrap(&self, codes: Vec<Icao>) {
        let cached = self.cache.as_ref().and_then(DiskCache::load_fresh);
        let mut to_enqueue = Vec::new();
        {
            let mut state = self.state.write();
            state.configured = codes.clone();
            if let Some(cached) = cached {
                info!(codes = cached.records.len(), "pre-populating from disk cache");
                for (code, records) in cached.records {
                    if codes.contains(&code) {
                        state.status.insert(code.clone(), FetchStatus::Loaded);
                        state.records.insert(code, records);
                    }
                }
            }
            for code in &codes {
                if !state.status.contains_key(code) {
                    state.status.insert(code.clone(), FetchStatus::Queued);
                    to_enqueue.push(code.clone());
                }
            }
        }
        self.scheduler.enqueue(&to_enqueue, self);
        self.start();
    }

    /// Configuration change: enqueue newly added codes, garbage-collect all
    /// state for removed ones.
    pub fn set_configured(&self, codes: Vec<Icao>) {
        let mut to_enqueue = Vec::new();
        {
            let mut state = self.state.write();
            let keep: HashSet<&Icao> = codes.iter().collect();
            state.status.retain(|code, _| keep.contains(code));
            state.records.retain(|code, _| keep.contains(code));
            state.markers.retain(|code, _| keep.contains(code));
            state.silent_codes.retain(|code| keep.contains(code));
            for code in &codes {
                if !state.status.contains_key(code) {
                    state.status.insert(code.clone(), FetchStatus::Queued);
                    to_enqueue.push(code.clone());
                }
            }
            state.configured = codes;
        }
        self.scheduler.enqueue(&to_enqueue, self);
        self.start();
        self.persist();
    }

    /// Manual reload: drop the cache and all in-memory state, then fetch
    /// every configured code as a fresh, non-silent load.
    pub fn reload_all(&self) {
        if let Some(cache) = &self.cache {
            cache.clear_snapshot();
        }
        let configured;
        {
            let mut state = self.state.write();
            state.silent_codes.clear();
            state.records.clear();
            state.markers.clear();
            configured = state.configured.clone();
            state.status = configured
                .iter()
                .map(|code| (code.clone(), FetchStatus::Queued))
                .collect();
        }
        info!(codes = configured.len(), "manual reload of all codes");
        self.scheduler.clear();
        self.scheduler.enqueue(&configured, self);
        self.countdown
            .store(self.config.auto_refresh_interval.as_secs(), Ordering::SeqCst);
        self.start();
    }

    /// Silent refresh: re-enqueue every loaded code. Codes currently
    /// loading, queued, or failed are left alone.
    pub fn auto_refresh(&self) {
        let mut to_enqueue = Vec::new();
        {
            let mut state = self.state.write();
            let configured = state.configured.clone();
            for code in configured {
                if state.status.get(&code) == Some(&FetchStatus::Loaded) {
                    state.status.insert(code.clone(), FetchStatus::Queued);
                    state.silent_codes.insert(code.clone());
                    to_enqueue.push(code);
                }
            }
        }
        if !to_enqueue.is_empty() {
            debug!(codes = to_enqueue.len(), "auto-refresh re-enqueueing loaded codes");
            self.scheduler.enqueue(&to_enqueue, self);
            self.start();
        }
    }

    /// Drop highlight markers older than the configured window.
    pub fn sweep_markers(&self) {
        let cutoff = Utc::now() - self.config.highlight_window;
        let mut state = self.state.write();
        state.markers.retain(|_, markers| {
            markers.retain(|m| m.detected_at > cutoff);
            !markers.is_empty()
        });
    }

    fn start(&self) {
        let Some(dispatcher) = self.weak.upgrade() else {
            return;
        };
        Arc::clone(&self.scheduler).start(dispatcher as Arc<dyn Dispatcher>);
    }

    fn apply_success(&self, code: &Icao, outcome: FetchOutcome) {
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            // The code may have been dropped from the configuration while
            // this fetch was in flight; its result is then discarded.
            if !state.configured.contains(code) {
                debug!(icao = %code, "discarding fetch result for unconfigured code");
                return;
            }

            let previous = state.records.get(code).cloned().unwrap_or_default();
            let changes = diff(&previous, &outcome.records);
            let silent = state.silent_codes.remove(code);
            if !changes.added.is_empty() {
                let now = Utc::now();
                state
                    .markers
                    .entry(code.clone())
                    .or_default()
                    .extend(changes.added.iter().map(|r| NewNotamMarker {
                        record_id: r.id.clone(),
                        detected_at: now,
                    }));
                if !silent {
                    events.push(Event::NewNotices {
                        code: code.clone(),
                        records: changes.added,
                    });
                }
            }
            if !changes.removed.is_empty() && !silent {
                events.push(Event::RemovedNotices {
                    code: code.clone(),
                    count: changes.removed.len(),
                });
            }

            state.records.insert(code.clone(), outcome.records);
            state.status.insert(code.clone(), FetchStatus::Loaded);
        }
        for event in events {
            let _ = self.events.send(event);
        }
        self.persist();
    }

    fn persist(&self) {
        let Some(cache) = &self.cache else { return };
        let (codes, records) = {
            let state = self.state.read();
            (state.configured.clone(), state.records.clone())
        };
        if let Err(e) = cache.save_snapshot(&codes, &records) {
            warn!(error = %e, "failed to write disk cache");
        }
    }

    /// Timer loop: auto-refresh interval, 1 Hz countdown for display, and
    /// the marker sweep. All die together with the token.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let full = self.config.auto_refresh_interval.as_secs();
        let mut refresh = tokio::time::interval(self.config.auto_refresh_interval);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        let mut countdown = tokio::time::interval(Duration::from_secs(1));
        // Intervals fire immediately on creation; consume those ticks so the
        // first auto-refresh happens a full period after startup.
        refresh.tick().await;
        sweep.tick().await;
        countdown.tick().await;

        info!("refresh orchestrator started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping orchestrator timers");
                    break;
                }
                _ = refresh.tick() => {
                    self.auto_refresh();
                    self.countdown.store(full, Ordering::SeqCst);
                }
                _ = countdown.tick() => {
                    let current = self.countdown.load(Ordering::SeqCst);
                    self.countdown
                        .store(if current > 0 { current - 1 } else { full }, Ordering::SeqCst);
                }
                _ = sweep.tick() => {
                    self.sweep_markers();
                }
            }
        }
    }

    pub fn records_for(&self, code: &Icao) -> Option<Vec<NotamRecord>> {
        self.state.read().records.get(code).cloned()
    }

    pub fn status_of(&self, code: &Icao) -> Option<FetchStatus> {
        self.state.read().status.get(code).copied()
    }

    pub fn markers_for(&self, code: &Icao) -> Vec<NewNotamMarker> {
        self.state
            .read()
            .markers
            .get(code)
            .cloned()
            .unwrap_or_default()
    }

    pub fn counts(&self) -> StatusCounts {
        let state = self.state.read();
        let mut counts = StatusCounts::default();
        for status in state.status.values() {
            match status {
                FetchStatus::Queued => counts.queued += 1,
                FetchStatus::Loading => counts.loading += 1,
                FetchStatus::Loaded => counts.loaded += 1,
                FetchStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn countdown_seconds(&self) -> u64 {
        self.countdown.load(Ordering::SeqCst)
    }

    pub fn configured(&self) -> Vec<Icao> {
        self.state.read().configured.clone()
    }
}

#[async_trait]
impl Dispatcher for Orchestrator {
    fn session_active(&self) -> bool {
        self.session.is_active()
    }

    fn status(&self, code: &Icao) -> Option<FetchStatus> {
        self.status_of(code)
    }

    fn mark_loading(&self, code: &Icao) {
        let mut state = self.state.write();
        if state.configured.contains(code) {
            state.status.insert(code.clone(), FetchStatus::Loading);
        }
    }

    fn mark_queued(&self, code: &Icao) {
        let mut state = self.state.write();
        if state.configured.contains(code) {
            state.status.insert(code.clone(), FetchStatus::Queued);
        }
    }

    async fn dispatch(&self, code: &Icao) -> Result<(), GatewayError> {
        let outcome = self.gateway.fetch(code).await?;
        self.apply_success(code, outcome);
        Ok(())
    }

    fn mark_failed(&self, code: &Icao) {
        {
            let mut state = self.state.write();
            if !state.configured.contains(code) {
                return;
            }
            state.status.insert(code.clone(), FetchStatus::Failed);
            state.silent_codes.remove(code);
        }
        let _ = self.events.send(Event::LoadFailed { code: code.clone() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify;
    use crate::scheduler::SchedulerConfig;
    use shared::notam::{Classification, Provider};

    struct NullGateway;

    #[async_trait]
    impl FetchGateway for NullGateway {
        async fn fetch(&self, _code: &Icao) -> Result<FetchOutcome, GatewayError> {
            Err(GatewayError::Upstream {
                message: "unused".to_string(),
                details: None,
            })
        }
    }

    fn record(code: &Icao, id: &str) -> NotamRecord {
        NotamRecord {
            id: id.to_string(),
            code: code.clone(),
            number: None,
            classification: Classification::Other,
            valid_from: None,
            valid_to: None,
            issued: Some(Utc::now()),
            summary: format!("summary {id}"),
            body: String::new(),
            q_line: None,
            source: Provider::Primary,
        }
    }

    fn build() -> (Arc<Orchestrator>, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = notify::channel();
        let orchestrator = Orchestrator::new(
            Arc::new(Scheduler::new(SchedulerConfig::default())),
            Arc::new(NullGateway),
            Arc::new(SessionGate::new()),
            tx,
            None,
            OrchestratorConfig::default(),
        );
        (orchestrator, rx)
    }

    #[tokio::test]
    async fn success_replaces_records_and_marks_added() {
        let (orchestrator, mut rx) = build();
        let code: Icao = "KJFK".parse().unwrap();
        orchestrator.bootstrap(vec![code.clone()]);

        orchestrator.apply_success(
            &code,
            FetchOutcome {
                records: vec![record(&code, "KJFK-1")],
                source: Provider::Primary,
            },
        );
        assert_eq!(orchestrator.status_of(&code), Some(FetchStatus::Loaded));
        assert_eq!(orchestrator.markers_for(&code).len(), 1);
        assert!(matches!(rx.try_recv(), Ok(Event::NewNotices { .. })));

        // Second fetch drops one notice and adds none.
        orchestrator.apply_success(
            &code,
            FetchOutcome {
                records: vec![],
                source: Provider::Primary,
            },
        );
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::RemovedNotices { count: 1, .. })
        ));
        assert_eq!(orchestrator.records_for(&code).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn silent_refresh_creates_markers_but_no_events() {
        let (orchestrator, mut rx) = build();
        let code: Icao = "CYYZ".parse().unwrap();
        orchestrator.bootstrap(vec![code.clone()]);
        orchestrator.apply_success(
            &code,
            FetchOutcome {
                records: vec![record(&code, "CYYZ-1")],
                source: Provider::Secondary,
            },
        );
        let _ = rx.try_recv();

        orchestrator.auto_refresh();
        assert_eq!(orchestrator.status_of(&code), Some(FetchStatus::Queued));
        orchestrator.apply_success(
            &code,
            FetchOutcome {
                records: vec![record(&code, "CYYZ-1"), record(&code, "CYYZ-2")],
                source: Provider::Secondary,
            },
        );

        assert_eq!(orchestrator.markers_for(&code).len(), 2);
        assert!(rx.try_recv().is_err(), "silent refresh must not notify");
    }

    #[tokio::test]
    async fn retryable_failure_returns_code_to_queued() {
        let (orchestrator, _rx) = build();
        let code: Icao = "CYUL".parse().unwrap();
        orchestrator.bootstrap(vec![code.clone()]);

        Dispatcher::mark_loading(orchestrator.as_ref(), &code);
        assert_eq!(orchestrator.status_of(&code), Some(FetchStatus::Loading));

        // A retryable failure hands the code back for its next attempt.
        Dispatcher::mark_queued(orchestrator.as_ref(), &code);
        assert_eq!(orchestrator.status_of(&code), Some(FetchStatus::Queued));

        // Codes dropped from configuration never re-enter the status table.
        orchestrator.set_configured(Vec::new());
        Dispatcher::mark_queued(orchestrator.as_ref(), &code);
        assert_eq!(orchestrator.status_of(&code), None);
    }

    #[tokio::test]
    async fn manual_load_keeps_notifying_after_auto_refresh_fires() {
        let (orchestrator, mut rx) = build();
        let refreshed: Icao = "KJFK".parse().unwrap();
        let pending: Icao = "KLGA".parse().unwrap();
        orchestrator.bootstrap(vec![refreshed.clone(), pending.clone()]);
        orchestrator.apply_success(
            &refreshed,
            FetchOutcome {
                records: vec![record(&refreshed, "KJFK-1")],
                source: Provider::Primary,
            },
        );
        let _ = rx.try_recv();

        // The timer fires while the initial load of the other code is still
        // pending; only the re-enqueued code goes silent.
        orchestrator.auto_refresh();

        orchestrator.apply_success(
            &pending,
            FetchOutcome {
                records: vec![record(&pending, "KLGA-1")],
                source: Provider::Primary,
            },
        );
        assert!(
            matches!(rx.try_recv(), Ok(Event::NewNotices { code, .. }) if code == pending),
            "initial load must notify even with an auto-refresh in flight"
        );

        orchestrator.apply_success(
            &refreshed,
            FetchOutcome {
                records: vec![record(&refreshed, "KJFK-1"), record(&refreshed, "KJFK-2")],
                source: Provider::Primary,
            },
        );
        assert!(rx.try_recv().is_err(), "the silent batch stays silent");
        assert_eq!(orchestrator.markers_for(&refreshed).len(), 2);

        // The silent bit is consumed with the fetch: the next change for the
        // same code notifies again.
        orchestrator.apply_success(
            &refreshed,
            FetchOutcome {
                records: vec![
                    record(&refreshed, "KJFK-1"),
                    record(&refreshed, "KJFK-2"),
                    record(&refreshed, "KJFK-3"),
                ],
                source: Provider::Primary,
            },
        );
        assert!(matches!(rx.try_recv(), Ok(Event::NewNotices { .. })));
    }

    #[tokio::test]
    async fn result_for_removed_code_is_discarded() {
        let (orchestrator, _rx) = build();
        let keep: Icao = "KJFK".parse().unwrap();
        let removed: Icao = "KLGA".parse().unwrap();
        orchestrator.bootstrap(vec![keep.clone(), removed.clone()]);

        // Simulate the scheduler having started the fetch...
        Dispatcher::mark_loading(orchestrator.as_ref(), &removed);
        // ...then the user dropping the code while it is in flight.
        orchestrator.set_configured(vec![keep.clone()]);

        orchestrator.apply_success(
            &removed,
            FetchOutcome {
                records: vec![record(&removed, "KLGA-1")],
                source: Provider::Primary,
            },
        );

        assert_eq!(orchestrator.status_of(&removed), None);
        assert!(orchestrator.records_for(&removed).is_none());
        assert!(orchestrator.markers_for(&removed).is_empty());
        assert!(orchestrator.configured().contains(&keep));
    }

    #[tokio::test]
    async fn reload_all_resets_state_and_queues_everything() {
        let (orchestrator, _rx) = build();
        let code: Icao = "KBOS".parse().unwrap();
        orchestrator.bootstrap(vec![code.clone()]);
        orchestrator.apply_success(
            &code,
            FetchOutcome {
                records: vec![record(&code, "KBOS-1")],
                source: Provider::Primary,
            },
        );

        orchestrator.reload_all();

        assert_eq!(orchestrator.status_of(&code), Some(FetchStatus::Queued));
        assert!(orchestrator.records_for(&code).is_none());
        assert!(orchestrator.markers_for(&code).is_empty());
        assert_eq!(orchestrator.counts().queued, 1);
    }

    #[tokio::test]
    async fn sweep_prunes_only_expired_markers() {
        let (orchestrator, _rx) = build();
        let code: Icao = "KPHL".parse().unwrap();
        orchestrator.bootstrap(vec![code.clone()]);
        {
            let mut state = orchestrator.state.write();
            state.markers.insert(
                code.clone(),
                vec![
                    NewNotamMarker {
                        record_id: "old".to_string(),
                        detected_at: Utc::now() - chrono::Duration::seconds(120),
                    },
                    NewNotamMarker {
                        record_id: "fresh".to_string(),
                        detected_at: Utc::now(),
                    },
                ],
            );
        }

        orchestrator.sweep_markers();

        let markers = orchestrator.markers_for(&code);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].record_id, "fresh");
    }

    #[tokio::test]
    async fn permanent_failure_surfaces_without_touching_other_codes() {
        let (orchestrator, mut rx) = build();
        let good: Icao = "KJFK".parse().unwrap();
        let bad: Icao = "CYOW".parse().unwrap();
        orchestrator.bootstrap(vec![good.clone(), bad.clone()]);
        orchestrator.apply_success(
            &good,
            FetchOutcome {
                records: vec![record(&good, "KJFK-1")],
                source: Provider::Primary,
            },
        );
        let _ = rx.try_recv();

        Dispatcher::mark_failed(orchestrator.as_ref(), &bad);

        assert_eq!(orchestrator.status_of(&bad), Some(FetchStatus::Failed));
        assert_eq!(orchestrator.status_of(&good), Some(FetchStatus::Loaded));
        assert!(matches!(rx.try_recv(), Ok(Event::LoadFailed { .. })));
    }
}
