//! Compliance monitor: the scan cycle, the periodic scheduler and the
//! command/query surface exposed to consumers.
//!
//! All store mutation goes through one mutex. The lock is never held across
//! an `.await`; the reading fetch happens before it is taken, so commands
//! applied before the lock is acquired are visible to that scan's
//! dismissed-id filter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertSeverity};
use crate::generator::AlertGenerator;
use crate::notify::NotificationSink;
use crate::source::ReadingSource;
use crate::store::AlertStore;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

// ------------------------------------------------------------------ //
//  Types                                                              //
// ------------------------------------------------------------------ //

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("reading store fetch failed: {0:#}")]
    StoreFetch(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed { new_alerts: Vec<Alert> },
    /// Another scan was in flight, or the monitor has been stopped.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub emergency_count:    usize,
    pub critical_count:     usize,
    pub acknowledged_count: usize,
    pub active_count:       usize,
    pub last_check:         Option<DateTime<Utc>>,
}

struct State {
    store:      AlertStore,
    last_check: Option<DateTime<Utc>>,
}

struct Inner {
    state:     Mutex<State>,
    generator: AlertGenerator,
    source:    Arc<dyn ReadingSource>,
    sink:      Arc<dyn NotificationSink>,
    alerts_tx: watch::Sender<Vec<Alert>>,
    scanning:  AtomicBool,
    stopped:   AtomicBool,
}

// ------------------------------------------------------------------ //
//  Monitor                                                            //
// ------------------------------------------------------------------ //

/// Shared handle to one alert store and its scan pipeline. Clones refer to
/// the same store.
#[derive(Clone)]
pub struct ComplianceMonitor {
    inner: Arc<Inner>,
}

impl ComplianceMonitor {
    pub fn new(
        generator: AlertGenerator,
        source: Arc<dyn ReadingSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (alerts_tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State { store: AlertStore::new(), last_check: None }),
                generator,
                source,
                sink,
                alerts_tx,
                scanning: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, store: &AlertStore) {
        self.inner.alerts_tx.send_replace(store.active_alerts().to_vec());
    }

    /// Run one scan cycle now.
    pub async fn check_now(&self) -> Result<ScanOutcome, EngineError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Ok(ScanOutcome::Skipped);
        }
        if self
            .inner
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("scan already in flight; skipping");
            return Ok(ScanOutcome::Skipped);
        }
        let _scanning = ScanningGuard(&self.inner.scanning);

        let readings = self
            .inner
            .source
            .fetch_readings()
            .await
            .map_err(EngineError::StoreFetch)?;

        let now = Utc::now();
        let new_alerts = {
            let mut state = self.state();
            let candidates = self.inner.generator.scan(&readings, state.store.dismissed_ids(), now);
            let inserted = state.store.merge(candidates);
            state.last_check = Some(now);
            if !inserted.is_empty() {
                self.publish(&state.store);
            }
            inserted
        };

        info!(
            readings = readings.len(),
            new_alerts = new_alerts.len(),
            "compliance scan complete"
        );
        self.notify_emergencies(&new_alerts);

        Ok(ScanOutcome::Completed { new_alerts })
    }

    fn notify_emergencies(&self, new_alerts: &[Alert]) {
        let emergencies: Vec<Alert> = new_alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Emergency)
            .cloned()
            .collect();
        if emergencies.is_empty() {
            return;
        }

        let sink = Arc::clone(&self.inner.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.notify(&emergencies).await {
                warn!(error = %e, count = emergencies.len(), "emergency notification failed (non-fatal)");
            }
        });
    }

    // -------------------------------------------------------------- //
    //  Commands                                                      //
    // -------------------------------------------------------------- //

    pub fn acknowledge(&self, id: &str) -> bool {
        let mut state = self.state();
        let changed = state.store.acknowledge(id);
        if changed {
            self.publish(&state.store);
        }
        changed
    }

    pub fn dismiss(&self, id: &str) -> bool {
        let mut state = self.state();
        let removed = state.store.dismiss(id);
        if removed {
            self.publish(&state.store);
        }
        removed
    }

    pub fn clear_acknowledged(&self) -> usize {
        let mut state = self.state();
        let cleared = state.store.clear_acknowledged();
        if cleared > 0 {
            self.publish(&state.store);
        }
        cleared
    }

    // -------------------------------------------------------------- //
    //  Queries                                                       //
    // -------------------------------------------------------------- //

    /// Receiver that observes the active alert list after every change.
    /// Dropping it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Alert>> {
        self.inner.alerts_tx.subscribe()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state().store.active_alerts().to_vec()
    }

    pub fn summary(&self) -> Summary {
        let state = self.state();
        Summary {
            emergency_count: state.store.emergency_count(),
            critical_count: state.store.critical_count(),
            acknowledged_count: state.store.acknowledged_count(),
            active_count: state.store.active_alerts().len(),
            last_check: state.last_check,
        }
    }

    pub fn scan_state(&self) -> ScanState {
        if self.inner.scanning.load(Ordering::Acquire) {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    // -------------------------------------------------------------- //
    //  Scheduler                                                     //
    // -------------------------------------------------------------- //

    /// Start the periodic scan loop. The first scan runs immediately; later
    /// ones follow the wall-clock `period`, skipping ticks missed while a
    /// scan was running.
    pub fn spawn(&self, period: Duration) -> SchedulerHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_scheduler(self.clone(), period, trigger_rx, shutdown_rx));
        SchedulerHandle {
            monitor: self.clone(),
            trigger_tx,
            shutdown_tx,
            task,
        }
    }
}

struct ScanningGuard<'a>(&'a AtomicBool);

impl Drop for ScanningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_scheduler(
    monitor: ComplianceMonitor,
    period: Duration,
    mut triggers: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(period_secs = period.as_secs(), "compliance scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            Some(()) = triggers.recv() => debug!("on-demand scan requested"),
        }
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = monitor.check_now().await {
            error!(error = %e, "scan aborted; retrying on next tick");
        }
    }

    info!("compliance scheduler stopped");
}

/// Controls a running scheduler loop. Dropping the handle without calling
/// [`SchedulerHandle::stop`] also ends the loop after any in-flight scan.
pub struct SchedulerHandle {
    monitor:     ComplianceMonitor,
    trigger_tx:  mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    task:        JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request an immediate scan. At most one request is queued behind a
    /// running scan; returns `false` when the request was coalesced into an
    /// already-queued one.
    pub fn trigger(&self) -> bool {
        match self.trigger_tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("scan already queued; coalescing trigger");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }

    /// Stop the loop and wait for it to exit. An in-flight scan finishes;
    /// no new scan starts, including through [`ComplianceMonitor::check_now`].
    pub async fn stop(self) {
        self.monitor.inner.stopped.store(true, Ordering::Release);
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Semaphore;

    use crate::notify::FakeNotificationSink;
    use crate::reading::ChemicalReading;
    use crate::source::StaticReadingSource;
    use crate::standards::Parameter;

    fn pool_004() -> ChemicalReading {
        ChemicalReading::new("POOL-004", "Therapy Pool", Utc::now() - ChronoDuration::hours(1))
            .with_value("free_chlorine", 0.3)
            .with_value("ph", 6.5)
            .with_value("alkalinity", 50.0)
    }

    fn monitor_with(
        readings: Vec<ChemicalReading>,
    ) -> (ComplianceMonitor, StaticReadingSource, FakeNotificationSink) {
        let source = StaticReadingSource::new(readings);
        let sink = FakeNotificationSink::new();
        let monitor = ComplianceMonitor::new(
            AlertGenerator::default(),
            Arc::new(source.clone()),
            Arc::new(sink.clone()),
        );
        (monitor, source, sink)
    }

    fn new_alerts(outcome: ScanOutcome) -> Vec<Alert> {
        match outcome {
            ScanOutcome::Completed { new_alerts } => new_alerts,
            ScanOutcome::Skipped => panic!("scan was skipped"),
        }
    }

    async fn wait_for_batches(sink: &FakeNotificationSink, n: usize) {
        for _ in 0..50 {
            if sink.snapshot().len() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Source that blocks each fetch until a permit is released.
    struct GatedSource {
        inner: StaticReadingSource,
        gate:  Arc<Semaphore>,
    }

    #[async_trait]
    impl ReadingSource for GatedSource {
        async fn fetch_readings(&self) -> Result<Vec<ChemicalReading>> {
            self.gate.acquire().await?.forget();
            self.inner.fetch_readings().await
        }
    }

    fn gated() -> (ComplianceMonitor, StaticReadingSource, Arc<Semaphore>) {
        let inner = StaticReadingSource::new(vec![pool_004()]);
        let gate = Arc::new(Semaphore::new(0));
        let source = GatedSource { inner: inner.clone(), gate: Arc::clone(&gate) };
        let monitor = ComplianceMonitor::new(
            AlertGenerator::default(),
            Arc::new(source),
            Arc::new(FakeNotificationSink::new()),
        );
        (monitor, inner, gate)
    }

    #[tokio::test]
    async fn scan_populates_store_and_summary() {
        let (monitor, _, _) = monitor_with(vec![pool_004()]);
        let alerts = new_alerts(monitor.check_now().await.unwrap());
        assert_eq!(alerts.len(), 3);

        let summary = monitor.summary();
        assert_eq!(summary.emergency_count, 1);
        assert_eq!(summary.critical_count, 2);
        assert_eq!(summary.active_count, 3);
        assert!(summary.last_check.is_some());
    }

    #[tokio::test]
    async fn second_scan_adds_nothing() {
        let (monitor, _, _) = monitor_with(vec![pool_004()]);
        monitor.check_now().await.unwrap();
        let again = new_alerts(monitor.check_now().await.unwrap());
        assert!(again.is_empty());
        assert_eq!(monitor.active_alerts().len(), 3);
    }

    #[tokio::test]
    async fn dismissed_alert_never_returns() {
        let (monitor, _, _) = monitor_with(vec![pool_004()]);
        monitor.check_now().await.unwrap();
        let ph = monitor
            .active_alerts()
            .into_iter()
            .find(|a| a.chemical == Some(Parameter::Ph))
            .unwrap();

        assert!(monitor.dismiss(&ph.id));
        for _ in 0..3 {
            monitor.check_now().await.unwrap();
            assert!(monitor.active_alerts().iter().all(|a| a.id != ph.id));
        }
        assert_eq!(monitor.active_alerts().len(), 2);
    }

    #[tokio::test]
    async fn acknowledge_then_clear() {
        let (monitor, _, _) = monitor_with(vec![pool_004()]);
        monitor.check_now().await.unwrap();
        let id = monitor.active_alerts()[0].id.clone();

        assert!(monitor.acknowledge(&id));
        assert_eq!(monitor.active_alerts().len(), 3);
        assert_eq!(monitor.summary().acknowledged_count, 1);

        assert_eq!(monitor.clear_acknowledged(), 1);
        monitor.check_now().await.unwrap();
        assert_eq!(monitor.active_alerts().len(), 2);
        assert!(!monitor.acknowledge(&id));
    }

    #[tokio::test]
    async fn subscribers_see_every_change() {
        let (monitor, _, _) = monitor_with(vec![pool_004()]);
        let mut rx = monitor.subscribe();

        monitor.check_now().await.unwrap();
        assert!(rx.has_changed().unwrap());
        let id = rx.borrow_and_update()[0].id.clone();

        monitor.check_now().await.unwrap();
        assert!(!rx.has_changed().unwrap());

        monitor.acknowledge(&id);
        assert!(rx.borrow_and_update()[0].acknowledged);

        monitor.dismiss(&id);
        assert_eq!(rx.borrow_and_update().len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_tick_without_side_effects() {
        let (monitor, source, _) = monitor_with(vec![pool_004()]);
        source.set_unavailable(true);

        let err = monitor.check_now().await.unwrap_err();
        assert!(matches!(err, EngineError::StoreFetch(_)));
        assert!(monitor.active_alerts().is_empty());
        assert_eq!(monitor.summary().last_check, None);
        assert_eq!(monitor.scan_state(), ScanState::Idle);

        source.set_unavailable(false);
        assert_eq!(new_alerts(monitor.check_now().await.unwrap()).len(), 3);
    }

    #[tokio::test]
    async fn notifies_only_new_emergencies() {
        let (monitor, _, sink) = monitor_with(vec![pool_004()]);
        monitor.check_now().await.unwrap();
        wait_for_batches(&sink, 1).await;

        let batches = sink.snapshot();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].chemical, Some(Parameter::FreeChlorine));

        monitor.check_now().await.unwrap();
        wait_for_batches(&sink, 2).await;
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn no_notification_without_emergency() {
        let reading = ChemicalReading::new("POOL-001", "Main", Utc::now()).with_value("ph", 6.5);
        let (monitor, _, sink) = monitor_with(vec![reading]);
        assert_eq!(new_alerts(monitor.check_now().await.unwrap()).len(), 1);
        wait_for_batches(&sink, 1).await;
        assert!(sink.snapshot().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_scan() {
        let sink = FakeNotificationSink::failing();
        let monitor = ComplianceMonitor::new(
            AlertGenerator::default(),
            Arc::new(StaticReadingSource::new(vec![pool_004()])),
            Arc::new(sink.clone()),
        );
        assert_eq!(new_alerts(monitor.check_now().await.unwrap()).len(), 3);
        wait_for_batches(&sink, 1).await;
        assert_eq!(sink.snapshot().len(), 1);
        assert_eq!(monitor.active_alerts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_check_is_skipped() {
        let (monitor, inner, gate) = gated();
        let background = monitor.clone();
        let first = tokio::spawn(async move { background.check_now().await });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(monitor.scan_state(), ScanState::Scanning);
        assert_eq!(monitor.check_now().await.unwrap(), ScanOutcome::Skipped);

        gate.add_permits(1);
        assert_eq!(new_alerts(first.await.unwrap().unwrap()).len(), 3);
        assert_eq!(inner.fetch_count(), 1);
        assert_eq!(monitor.scan_state(), ScanState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_scans_immediately_then_every_period() {
        let (monitor, source, _) = monitor_with(vec![pool_004()]);
        let handle = monitor.spawn(DEFAULT_SCAN_INTERVAL);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(monitor.active_alerts().len(), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.fetch_count(), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.fetch_count(), 4);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_recovers_after_fetch_failure() {
        let (monitor, source, _) = monitor_with(vec![pool_004()]);
        source.set_unavailable(true);
        let handle = monitor.spawn(DEFAULT_SCAN_INTERVAL);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(monitor.active_alerts().is_empty());

        source.set_unavailable(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.active_alerts().len(), 3);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_scan_after_stop() {
        let (monitor, source, _) = monitor_with(vec![pool_004()]);
        let handle = monitor.spawn(DEFAULT_SCAN_INTERVAL);
        tokio::time::sleep(Duration::from_millis(1)).await;

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(monitor.check_now().await.unwrap(), ScanOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_during_scan_coalesce_into_one_follow_up() {
        let (monitor, inner, gate) = gated();
        let handle = monitor.spawn(Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(monitor.scan_state(), ScanState::Scanning);

        assert!(handle.trigger());
        assert!(!handle.trigger());
        assert!(!handle.trigger());

        gate.add_permits(10);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(inner.fetch_count(), 2);
        assert_eq!(monitor.scan_state(), ScanState::Idle);

        assert!(handle.trigger());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(inner.fetch_count(), 3);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_scan() {
        let (monitor, inner, gate) = gated();
        let handle = monitor.spawn(DEFAULT_SCAN_INTERVAL);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(monitor.scan_state(), ScanState::Scanning);

        let release = Arc::clone(&gate);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            release.add_permits(1);
        });
        handle.stop().await;

        assert_eq!(inner.fetch_count(), 1);
        assert_eq!(monitor.active_alerts().len(), 3);
        assert_eq!(monitor.scan_state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn escalation_keeps_earlier_critical_alert() {
        let first = ChemicalReading::new("POOL-002", "Lap Pool", Utc::now() - ChronoDuration::hours(2))
            .with_value("free_chlorine", 0.7);
        let (monitor, source, _) = monitor_with(vec![first]);
        monitor.check_now().await.unwrap();
        assert_eq!(monitor.active_alerts().len(), 1);

        source.push(
            ChemicalReading::new("POOL-002", "Lap Pool", Utc::now() - ChronoDuration::hours(1))
                .with_value("free_chlorine", 0.3),
        );
        let added = new_alerts(monitor.check_now().await.unwrap());
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].severity, AlertSeverity::Emergency);

        let severities: Vec<_> = monitor
            .active_alerts()
            .iter()
            .filter(|a| a.chemical == Some(Parameter::FreeChlorine))
            .map(|a| a.severity)
            .collect();
        assert_eq!(severities, vec![AlertSeverity::Critical, AlertSeverity::Emergency]);
    }

    #[tokio::test]
    async fn fixture_file_end_to_end() {
        use crate::source::JsonFileReadingSource;

        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/readings.json");
        let sink = FakeNotificationSink::new();
        let monitor = ComplianceMonitor::new(
            AlertGenerator::default(),
            Arc::new(JsonFileReadingSource::new(path)),
            Arc::new(sink.clone()),
        );

        let alerts = new_alerts(monitor.check_now().await.unwrap());
        let mut got: Vec<(String, Option<Parameter>, AlertSeverity)> = alerts
            .iter()
            .map(|a| (a.facility_id.clone(), a.chemical, a.severity))
            .collect();
        got.sort_by(|a, b| (&a.0, a.1.map(|p| p.key())).cmp(&(&b.0, b.1.map(|p| p.key()))));

        // Every fixture reading is from 2024, so each facility is also stale.
        let expected = vec![
            ("POOL-001".to_string(), None, AlertSeverity::Critical),
            ("POOL-002".to_string(), None, AlertSeverity::Critical),
            ("POOL-003".to_string(), None, AlertSeverity::Critical),
            ("POOL-004".to_string(), None, AlertSeverity::Critical),
            ("POOL-004".to_string(), Some(Parameter::Alkalinity), AlertSeverity::Critical),
            ("POOL-004".to_string(), Some(Parameter::FreeChlorine), AlertSeverity::Emergency),
            ("POOL-004".to_string(), Some(Parameter::Ph), AlertSeverity::Critical),
        ];
        assert_eq!(got, expected);

        let summary = monitor.summary();
        assert_eq!(summary.emergency_count, 1);
        assert_eq!(summary.critical_count, 6);

        wait_for_batches(&sink, 1).await;
        assert_eq!(sink.snapshot().len(), 1);
        assert_eq!(sink.snapshot()[0][0].value, Some(0.3));
    }
}
