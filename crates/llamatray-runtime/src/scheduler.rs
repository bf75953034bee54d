//! Refresh scheduler: one fetch-aggregate-publish cycle at a time.
//!
//! A single tokio task owns the timer. Cycles are fixed-delay: the next tick
//! is armed only after the previous cycle has published. Commands and config
//! changes are handled between cycles, never during one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use llamatray_client::{StatusPayload, StatusSource};
use llamatray_core::{ConfigChange, ConfigStore};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregator::aggregate;
use crate::types::{ErrorState, RefreshState, StatusUpdate};

/// Receives every published update, on the scheduler task. Must not block.
pub trait StatusSink: Send + Sync + 'static {
    fn publish(&self, update: StatusUpdate);
}

impl<F> StatusSink for F
where
    F: Fn(StatusUpdate) + Send + Sync + 'static,
{
    fn publish(&self, update: StatusUpdate) {
        self(update)
    }
}

enum Command {
    Trigger,
    Reconfigure(Duration),
}

/// Handle to the running refresh task.
pub struct RefreshScheduler {
    commands: mpsc::UnboundedSender<Command>,
    in_flight: Arc<AtomicBool>,
    trigger_pending: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Spawn the refresh task: one cycle right away, then one per polling
    /// interval. Must be called from within a tokio runtime.
    pub fn start<S: StatusSink>(
        store: Arc<ConfigStore>,
        source: Arc<dyn StatusSource>,
        sink: S,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicBool::new(false));
        let trigger_pending = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        let changes = store.subscribe();
        let interval = interval_from_secs(store.snapshot().polling_interval_secs);
        let worker = Worker {
            store,
            source,
            sink: Box::new(sink),
            in_flight: in_flight.clone(),
            trigger_pending: trigger_pending.clone(),
            stopped: stopped.clone(),
            interval,
            cycle: 0,
            last: None,
        };

        info!("Refresh scheduler started: interval={:?}", interval);
        let task = tokio::spawn(worker.run(rx, changes));

        Self {
            commands,
            in_flight,
            trigger_pending,
            stopped,
            task: Mutex::new(Some(task)),
        }
    }

    /// Re-arm the timer with a new interval, without an extra fetch.
    pub fn reconfigure_interval(&self, secs: u64) {
        let _ = self
            .commands
            .send(Command::Reconfigure(interval_from_secs(secs)));
    }

    /// Run one cycle now. Returns `false` when the request was dropped
    /// because a cycle is already running or queued, or after `stop`.
    pub fn trigger_immediate(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) || self.in_flight.load(Ordering::SeqCst) {
            debug!("Refresh already in progress, dropping manual trigger");
            return false;
        }
        if self.trigger_pending.swap(true, Ordering::SeqCst) {
            debug!("Refresh already queued, dropping manual trigger");
            return false;
        }
        if self.commands.send(Command::Trigger).is_err() {
            self.trigger_pending.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Whether a cycle is currently fetching.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Prevent further cycles. An in-flight cycle still finishes and
    /// publishes. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Refresh scheduler stopping");
        }
        // Wake the task so it notices.
        let _ = self.commands.send(Command::Trigger);
    }

    /// [`stop`](Self::stop), then wait for the task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn interval_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

struct Worker {
    store: Arc<ConfigStore>,
    source: Arc<dyn StatusSource>,
    sink: Box<dyn StatusSink>,
    in_flight: Arc<AtomicBool>,
    trigger_pending: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    interval: Duration,
    cycle: u64,
    /// Sets from the last successful cycle; `None` after a failure.
    last: Option<StatusPayload>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut changes: broadcast::Receiver<ConfigChange>,
    ) {
        self.run_cycle().await;
        let mut next_tick = Instant::now() + self.interval;
        let mut changes_open = true;

        loop {
            if self.is_stopped() {
                break;
            }

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Trigger) => {
                        self.trigger_pending.store(false, Ordering::SeqCst);
                        if self.is_stopped() {
                            break;
                        }
                        self.run_cycle().await;
                        next_tick = Instant::now() + self.interval;
                    }
                    Some(Command::Reconfigure(interval)) => {
                        self.rearm(interval, &mut next_tick);
                    }
                    None => break,
                },

                change = changes.recv(), if changes_open => match change {
                    Ok(change) => self.apply_change(change, &mut next_tick).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} config changes, resyncing", missed);
                        let interval = interval_from_secs(self.store.snapshot().polling_interval_secs);
                        self.rearm(interval, &mut next_tick);
                        self.republish();
                    }
                    Err(broadcast::error::RecvError::Closed) => changes_open = false,
                },

                _ = tokio::time::sleep_until(next_tick) => {
                    self.run_cycle().await;
                    next_tick = Instant::now() + self.interval;
                }
            }
        }

        info!("Refresh scheduler stopped after {} cycles", self.cycle);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn rearm(&mut self, interval: Duration, next_tick: &mut Instant) {
        debug!("Polling interval set to {:?}", interval);
        self.interval = interval;
        *next_tick = Instant::now() + interval;
    }

    async fn apply_change(&mut self, change: ConfigChange, next_tick: &mut Instant) {
        match change {
            ConfigChange::BaseUrl(url) => {
                info!("Base URL changed to {}, refreshing", url);
                self.run_cycle().await;
                *next_tick = Instant::now() + self.interval;
            }
            ConfigChange::PollingInterval(secs) => {
                self.rearm(interval_from_secs(secs), next_tick);
            }
            change if change.affects_display_only() => {
                debug!("Display setting changed: {:?}", change);
                self.republish();
            }
            _ => {}
        }
    }

    /// One fetch-aggregate-publish unit of work.
    async fn run_cycle(&mut self) {
        self.in_flight.store(true, Ordering::SeqCst);

        let config = self.store.snapshot();
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        debug!("Refresh cycle {} against {}", self.cycle + 1, config.base_url);

        let state = match self.source.fetch_status(&config.base_url, timeout).await {
            Ok(payload) => {
                // Settings may have moved while the fetch was out.
                let view = aggregate(&payload.running, &payload.catalog, &self.store.display());
                debug!(
                    "{} running, {} total, mode={:?}",
                    view.running_count, view.total_count, view.execution_mode
                );
                self.last = Some(payload);
                RefreshState::Ready(view)
            }
            Err(e) => {
                warn!("Failed to fetch status from {}: {}", config.base_url, e);
                self.last = None;
                RefreshState::Failed(ErrorState::from(&e))
            }
        };

        self.publish(state);
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Re-derive from the last good sets with current settings. Skipped while
    /// the last cycle is failed so the error stays visible.
    fn republish(&mut self) {
        let Some(payload) = &self.last else {
            return;
        };
        let view = aggregate(&payload.running, &payload.catalog, &self.store.display());
        self.publish(RefreshState::Ready(view));
    }

    fn publish(&mut self, state: RefreshState) {
        self.cycle += 1;
        self.sink.publish(StatusUpdate {
            cycle: self.cycle,
            published_at: Utc::now(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionMode, IDLE_DISPLAY_LINE};
    use llamatray_client::MockStatusSource;
    use llamatray_core::{FetchError, FetchErrorKind, ModelRecord, TrayConfig};

    const INTERVAL: Duration = Duration::from_secs(10);

    fn payload() -> StatusPayload {
        StatusPayload {
            running: vec![ModelRecord::new("llama3:8b").with_size(4.9e9).with_vram(3.8e9)],
            catalog: vec![
                ModelRecord::new("llama3:8b").with_size(4.9e9),
                ModelRecord::new("phi3").with_size(2.1e9),
            ],
        }
    }

    fn store() -> Arc<ConfigStore> {
        Arc::new(ConfigStore::in_memory(TrayConfig {
            gpu_ram_mb: 8192,
            ..TrayConfig::default()
        }))
    }

    fn start(
        store: &Arc<ConfigStore>,
        source: &Arc<MockStatusSource>,
    ) -> (RefreshScheduler, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = RefreshScheduler::start(store.clone(), source.clone(), move |u: StatusUpdate| {
            let _ = tx.send(u);
        });
        (scheduler, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_cycle_then_interval() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        let (scheduler, mut rx) = start(&store, &source);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.cycle, 1);
        let view = first.view().unwrap();
        assert_eq!(view.execution_mode, ExecutionMode::Gpu);
        assert_eq!(view.gpu_utilization_percent, 44);

        let before = Instant::now();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.cycle, 2);
        assert_eq!(before.elapsed(), INTERVAL);
        assert_eq!(source.calls(), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_publishes_error_and_waits_for_tick() {
        let store = store();
        let source = Arc::new(MockStatusSource::failing(FetchError::Network(
            "connection refused".into(),
        )));
        let (scheduler, mut rx) = start(&store, &source);

        let update = rx.recv().await.unwrap();
        let err = update.error().unwrap();
        assert_eq!(err.kind, FetchErrorKind::Network);
        assert_eq!(err.message, "connection refused");

        let before = Instant::now();
        let retry = rx.recv().await.unwrap();
        assert!(retry.error().is_some());
        assert_eq!(before.elapsed(), INTERVAL);
        assert_eq!(source.calls(), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_clears_last_known_sets() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        source.push(Ok(payload()));
        source.push(Err(FetchError::Parse("bad json".into())));
        source.set_fallback(Ok(StatusPayload::default()));
        let (scheduler, mut rx) = start(&store, &source);

        assert!(rx.recv().await.unwrap().view().is_some());
        assert!(rx.recv().await.unwrap().error().is_some());

        // Display changes don't resurrect stale data after a failure.
        store.set_show_cpu_usage(false).unwrap();
        let before = Instant::now();
        let next = rx.recv().await.unwrap();
        assert_eq!(before.elapsed(), INTERVAL);
        assert_eq!(source.calls(), 3);
        let view = next.view().unwrap();
        assert_eq!(view.execution_mode, ExecutionMode::Idle);
        assert_eq!(view.display_line.as_deref(), Some(IDLE_DISPLAY_LINE));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_change_rederives_without_fetch() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        let (scheduler, mut rx) = start(&store, &source);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first.view().unwrap().display_line.as_deref(),
            Some("llama3 (GPU:3624MB CPU:4673MB)")
        );

        store.set_show_cpu_usage(false).unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second.view().unwrap().display_line.as_deref(),
            Some("llama3 (GPU:3624MB)")
        );

        store.set_gpu_ram(4096).unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(third.view().unwrap().gpu_utilization_percent, 88);
        assert_eq!(third.view().unwrap().gpu_capacity_mb, 4096);

        assert_eq!(source.calls(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_url_change_refreshes_immediately() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        let (scheduler, mut rx) = start(&store, &source);
        rx.recv().await.unwrap();

        let before = Instant::now();
        store.set_base_url("http://gpu-box.lan:11434").unwrap();
        rx.recv().await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(
            source.urls(),
            vec!["http://localhost:11434", "http://gpu-box.lan:11434"]
        );

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_mid_cycle() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        source.set_delay(Duration::from_secs(3));
        let (scheduler, mut rx) = start(&store, &source);

        let started = Instant::now();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_refreshing());
        store.set_polling_interval(2).unwrap();

        // In-flight cycle still publishes.
        let first = rx.recv().await.unwrap();
        assert!(first.view().is_some());
        assert_eq!(started.elapsed(), Duration::from_secs(3));

        // Re-armed at 2s after the cycle settled, plus the 3s fetch.
        let second = rx.recv().await.unwrap();
        assert_eq!(second.cycle, 2);
        assert_eq!(started.elapsed(), Duration::from_secs(8));
        assert_eq!(source.max_in_flight(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_interval_does_not_fetch() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        let (scheduler, mut rx) = start(&store, &source);
        rx.recv().await.unwrap();

        let before = Instant::now();
        scheduler.reconfigure_interval(30);
        rx.recv().await.unwrap();
        assert_eq!(before.elapsed(), Duration::from_secs(30));
        assert_eq!(source.calls(), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_cycle_is_dropped() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        source.set_delay(Duration::from_secs(3));
        let (scheduler, mut rx) = start(&store, &source);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!scheduler.trigger_immediate());
        rx.recv().await.unwrap();

        let before = Instant::now();
        rx.recv().await.unwrap();
        assert_eq!(before.elapsed(), INTERVAL + Duration::from_secs(3));
        assert_eq!(source.calls(), 2);
        assert_eq!(source.max_in_flight(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_when_idle_runs_now() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        let (scheduler, mut rx) = start(&store, &source);
        rx.recv().await.unwrap();

        let before = Instant::now();
        assert!(scheduler.trigger_immediate());
        assert!(!scheduler.trigger_immediate());
        rx.recv().await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(source.calls(), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_final() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        let (scheduler, mut rx) = start(&store, &source);
        rx.recv().await.unwrap();

        scheduler.stop();
        scheduler.stop();
        scheduler.shutdown().await;
        assert!(!scheduler.trigger_immediate());

        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(source.calls(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_cycle_still_publishes() {
        let store = store();
        let source = Arc::new(MockStatusSource::new(payload()));
        source.set_delay(Duration::from_secs(3));
        let (scheduler, mut rx) = start(&store, &source);

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;

        assert!(rx.recv().await.unwrap().view().is_some());
        assert!(rx.recv().await.is_none());
        assert_eq!(source.calls(), 1);
    }
}
