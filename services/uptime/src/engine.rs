//! Engine: schedules probes, feeds state machines, persists transitions

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dispatcher::{Delivery, NotificationDispatcher};
use crate::health::HealthStateMachine;
use crate::model::{Monitor, MonitorId, ProbeResult, TransitionEvent};
use crate::monthly::MonthlyReporter;
use crate::probe::Probe;
use crate::store::StoreHandle;
use crate::{Result, UptimeError};

/// Reply channel for an on-demand check
type CheckRequest = oneshot::Sender<ProbeResult>;

/// Extra time granted over a monitor's own timeout before a probe is abandoned
const PROBE_GRACE: Duration = Duration::from_secs(1);

/// A persisted transition and its background delivery
#[derive(Debug)]
pub struct Dispatched {
    pub event: TransitionEvent,
    pub delivery: JoinHandle<Delivery>,
}

/// The engine runs one polling task per active monitor, the retention
/// sweep and, when configured, the monthly report schedule
#[derive(Clone)]
pub struct Engine {
    store: StoreHandle,
    probe: Arc<dyn Probe>,
    dispatcher: NotificationDispatcher,
    config: EngineConfig,
    cancel: CancellationToken,
    checks: Arc<DashMap<MonitorId, mpsc::Sender<CheckRequest>>>,
    reporter: Option<MonthlyReporter>,
}

impl Engine {
    pub fn new(
        store: StoreHandle,
        probe: Arc<dyn Probe>,
        dispatcher: NotificationDispatcher,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            probe,
            dispatcher,
            config,
            cancel,
            checks: Arc::new(DashMap::new()),
            reporter: None,
        }
    }

    pub fn with_reports(mut self, reporter: MonthlyReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Start polling all active monitors. Returns when the cancellation token is triggered.
    pub async fn run(&self) {
        let monitors: Vec<Monitor> = self
            .store
            .read()
            .await
            .monitors()
            .iter()
            .filter(|m| m.active)
            .cloned()
            .collect();

        let mut handles = Vec::new();
        for monitor in monitors {
            handles.push(self.start_monitor(monitor).await);
        }

        let polling = handles.len();
        let engine = self.clone();
        handles.push(tokio::spawn(async move { engine.retention_loop().await }));
        if let Some(reporter) = self.reporter.clone() {
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move { reporter.run(cancel).await }));
        }

        tracing::info!("Engine polling {} monitor(s)", polling);

        // Wait for cancellation
        self.cancel.cancelled().await;

        // Wait for all polling tasks to finish
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Spawn the polling task for one monitor, resuming its persisted state
    pub async fn start_monitor(&self, monitor: Monitor) -> JoinHandle<()> {
        let state = self.store.read().await.state(&monitor.id);
        let machine = HealthStateMachine::resume(state, self.config.debounce_threshold);
        let (sender, checks) = mpsc::channel(4);
        self.checks.insert(monitor.id.clone(), sender);
        let engine = self.clone();
        tracing::debug!(
            "Polling '{}' every {:?} (timeout {:?})",
            monitor.name,
            monitor.interval,
            monitor.timeout
        );
        tokio::spawn(async move { engine.poll_loop(monitor, machine, checks).await })
    }

    /// Check `monitor_id` now, through its polling task so the result feeds
    /// the state machine like any scheduled check. The next scheduled check
    /// follows one interval later.
    pub async fn check_now(&self, monitor_id: &str) -> Result<ProbeResult> {
        let sender = self
            .checks
            .get(monitor_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| {
                UptimeError::Conflict(format!("monitor '{}' is not being polled", monitor_id))
            })?;
        let (reply, result) = oneshot::channel();
        let stopped = || UptimeError::Probe(format!("polling for '{}' has stopped", monitor_id));
        sender.send(reply).await.map_err(|_| stopped())?;
        result.await.map_err(|_| stopped())
    }

    async fn poll_loop(
        &self,
        monitor: Monitor,
        mut machine: HealthStateMachine,
        mut checks: mpsc::Receiver<CheckRequest>,
    ) {
        let mut requested: Option<CheckRequest> = None;
        loop {
            let result = self.probe_bounded(&monitor).await;
            self.ingest(&mut machine, result.clone()).await;
            if let Some(reply) = requested.take() {
                let _ = reply.send(result);
            }

            // Wait for the next poll, an on-demand check or cancellation
            tokio::select! {
                _ = tokio::time::sleep(monitor.interval) => {}
                Some(reply) = checks.recv() => requested = Some(reply),
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Polling loop for '{}' cancelled", monitor.name);
                    break;
                }
            }
        }
        self.checks.remove(&monitor.id);
    }

    async fn probe_bounded(&self, monitor: &Monitor) -> ProbeResult {
        let limit = monitor.timeout + PROBE_GRACE;
        match tokio::time::timeout(limit, self.probe.probe(monitor)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Probe for '{}' stalled past {:?}", monitor.name, limit);
                ProbeResult::failure(
                    &monitor.id,
                    Utc::now(),
                    format!("probe timed out after {:?}", limit),
                )
            }
        }
    }

    /// Record one probe result and apply any transition it causes
    pub async fn ingest(
        &self,
        machine: &mut HealthStateMachine,
        result: ProbeResult,
    ) -> Option<Dispatched> {
        let monitor_id = result.monitor_id.clone();
        let error = result.error.clone();
        let transition = machine.observe(&result);

        let event = {
            let mut store = self.store.write().await;
            store.record_probe(result);
            match transition {
                Some(transition) => Some(store.record_transition(
                    &monitor_id,
                    &transition,
                    machine.state().clone(),
                    error,
                )),
                None => {
                    store.put_state(machine.state().clone());
                    None
                }
            }
        };

        let event = event?;
        tracing::info!(
            "Monitor '{}' changed {} -> {}",
            event.monitor_id,
            event.from,
            event.to
        );
        let delivery = self.dispatcher.notify(event.clone());
        Some(Dispatched { event, delivery })
    }

    async fn retention_loop(&self) {
        loop {
            self.prune().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.retention_sweep) => {}
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    /// Drop probe results older than the retention period
    pub async fn prune(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(30));
        let cutoff = Utc::now() - retention;
        let removed = self.store.write().await.prune_probe_results(cutoff);
        if removed > 0 {
            tracing::info!("Pruned {} probe result(s) older than {}", removed, cutoff);
        }
        removed
    }
}
