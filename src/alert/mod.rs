//! Out-of-band alert evaluation.
//!
//! Ingestion calls [`AlertDispatcher::check`] after a successful write. The
//! dispatcher resolves SMTP settings and alert configs up front, then hands
//! an [`AlertTask`] to a single worker through a bounded queue so alerts are
//! evaluated one task at a time in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SmtpConfig;
use crate::export::health::HealthMetrics;
use crate::store::ConfigRepository;
use crate::wire::{AlertConfig, AlertKind};

/// Alert-path failures. None of these ever reach an agent.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("failed to read {target} for agent {agent_id}")]
    ConfigLookup {
        agent_id: String,
        target: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{kind} alert {alert_id} failed for agent {agent_id}")]
    Evaluation {
        agent_id: String,
        alert_id: String,
        kind: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("alert worker shutting down")]
    Shutdown,
}

/// Everything the worker needs to evaluate one round of alerts.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTask {
    pub agent_id: String,
    pub agent_display: String,
    pub kind: AlertKind,
    pub configs: Vec<AlertConfig>,
    pub smtp: SmtpConfig,
    pub capture_time: i64,
}

/// Evaluates alert conditions and sends notifications.
#[async_trait]
pub trait AlertEvaluator: Send + Sync {
    async fn check_transaction_alert(
        &self,
        agent_id: &str,
        agent_display: &str,
        config: &AlertConfig,
        capture_time: i64,
        smtp: &SmtpConfig,
    ) -> Result<()>;

    async fn check_gauge_alert(
        &self,
        agent_id: &str,
        agent_display: &str,
        config: &AlertConfig,
        capture_time: i64,
        smtp: &SmtpConfig,
    ) -> Result<()>;

    async fn check_heartbeat_alert(
        &self,
        agent_id: &str,
        agent_display: &str,
        config: &AlertConfig,
        smtp: &SmtpConfig,
    ) -> Result<()>;
}

/// Evaluator that only records which alerts would be checked.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEvaluator;

#[async_trait]
impl AlertEvaluator for LoggingEvaluator {
    async fn check_transaction_alert(
        &self,
        _agent_id: &str,
        agent_display: &str,
        config: &AlertConfig,
        capture_time: i64,
        _smtp: &SmtpConfig,
    ) -> Result<()> {
        tracing::info!(
            agent = %agent_display,
            alert = %config.id,
            transaction_type = %config.transaction_type,
            percentile = config.transaction_percentile,
            threshold_millis = config.threshold_millis,
            capture_time,
            "checking transaction alert",
        );
        Ok(())
    }

    async fn check_gauge_alert(
        &self,
        _agent_id: &str,
        agent_display: &str,
        config: &AlertConfig,
        capture_time: i64,
        _smtp: &SmtpConfig,
    ) -> Result<()> {
        tracing::info!(
            agent = %agent_display,
            alert = %config.id,
            gauge = %config.gauge_name,
            threshold = config.gauge_threshold,
            capture_time,
            "checking gauge alert",
        );
        Ok(())
    }

    async fn check_heartbeat_alert(
        &self,
        _agent_id: &str,
        agent_display: &str,
        config: &AlertConfig,
        _smtp: &SmtpConfig,
    ) -> Result<()> {
        tracing::info!(
            agent = %agent_display,
            alert = %config.id,
            time_period_seconds = config.time_period_seconds,
            "checking heartbeat alert",
        );
        Ok(())
    }
}

/// What [`AlertDispatcher::check`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Enqueued,
    SmtpDisabled,
    NoConfigs,
    LookupFailed,
    QueueFull,
    Closed,
}

/// Coordinates alert checks off the ingestion path.
pub struct AlertDispatcher {
    configs: Arc<dyn ConfigRepository>,
    evaluator: Arc<dyn AlertEvaluator>,
    metrics: Option<Arc<HealthMetrics>>,
    tx: mpsc::Sender<AlertTask>,
    rx: parking_lot::Mutex<Option<mpsc::Receiver<AlertTask>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    enqueued: AtomicU64,
}

impl AlertDispatcher {
    pub fn new(
        configs: Arc<dyn ConfigRepository>,
        evaluator: Arc<dyn AlertEvaluator>,
        queue_capacity: usize,
        metrics: Option<Arc<HealthMetrics>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        Self {
            configs,
            evaluator,
            metrics,
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            worker: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Total tasks accepted onto the queue.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Resolve alert settings for the agent and queue a task if anything
    /// applies. Never fails the caller; every problem is logged here.
    pub async fn check(
        &self,
        agent_id: &str,
        agent_display: &str,
        kind: AlertKind,
        capture_time: i64,
    ) -> CheckOutcome {
        if self.cancel.is_cancelled() {
            return CheckOutcome::Closed;
        }

        let smtp = match self.configs.smtp_config().await {
            Ok(smtp) => smtp,
            Err(source) => {
                log_lookup_failure(
                    agent_display,
                    AlertError::ConfigLookup {
                        agent_id: agent_id.to_string(),
                        target: "smtp config",
                        source,
                    },
                );
                return CheckOutcome::LookupFailed;
            }
        };
        if !smtp.is_enabled() {
            return CheckOutcome::SmtpDisabled;
        }

        let configs = match self.configs.alert_configs(agent_id, kind).await {
            Ok(configs) => configs,
            Err(source) => {
                log_lookup_failure(
                    agent_display,
                    AlertError::ConfigLookup {
                        agent_id: agent_id.to_string(),
                        target: "alert configs",
                        source,
                    },
                );
                return CheckOutcome::LookupFailed;
            }
        };
        if configs.is_empty() {
            return CheckOutcome::NoConfigs;
        }

        let task = AlertTask {
            agent_id: agent_id.to_string(),
            agent_display: agent_display.to_string(),
            kind,
            configs,
            smtp,
            capture_time,
        };

        match self.tx.try_send(task) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.metrics {
                    m.alert_tasks_enqueued.inc();
                    m.alert_queue_length.set(queue_len(&self.tx) as f64);
                }
                CheckOutcome::Enqueued
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                tracing::warn!(
                    agent = %agent_display,
                    kind = task.kind.as_str(),
                    "alert queue full, dropping alert task",
                );
                if let Some(ref m) = self.metrics {
                    m.alert_tasks_dropped.with_label_values(&["full"]).inc();
                }
                CheckOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if let Some(ref m) = self.metrics {
                    m.alert_tasks_dropped.with_label_values(&["closed"]).inc();
                }
                CheckOutcome::Closed
            }
        }
    }

    /// Spawn the worker. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };

        let evaluator = self.evaluator.clone();
        let metrics = self.metrics.clone();
        let cancel = self.cancel.clone();
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                let task = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    task = rx.recv() => match task {
                        Some(task) => task,
                        None => break,
                    },
                };

                if let Some(ref m) = metrics {
                    m.alert_queue_length.set(queue_len(&tx) as f64);
                }

                let result = run_task(&task, evaluator.as_ref(), metrics.as_deref(), &cancel).await;
                if let Err(e) = result {
                    tracing::debug!(
                        agent = %task.agent_display,
                        error = %e,
                        "alert task interrupted",
                    );
                    break;
                }
            }

            // Unstarted tasks are discarded on shutdown.
            rx.close();
            tracing::debug!("alert worker stopped");
        });

        *self.worker.lock() = Some(handle);
    }

    /// Cancel the worker and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "alert worker panicked");
            }
        }
    }
}

fn queue_len(tx: &mpsc::Sender<AlertTask>) -> usize {
    tx.max_capacity() - tx.capacity()
}

fn log_lookup_failure(agent_display: &str, err: AlertError) {
    tracing::error!(
        agent = %agent_display,
        error = %format!("{:#}", anyhow::Error::from(err)),
        "alert check skipped",
    );
}

/// Evaluate every config of a task, stopping early on cancellation.
async fn run_task(
    task: &AlertTask,
    evaluator: &dyn AlertEvaluator,
    metrics: Option<&HealthMetrics>,
    cancel: &CancellationToken,
) -> Result<(), AlertError> {
    for config in &task.configs {
        if cancel.is_cancelled() {
            return Err(AlertError::Shutdown);
        }

        let result = match task.kind {
            AlertKind::Transaction => {
                evaluator
                    .check_transaction_alert(
                        &task.agent_id,
                        &task.agent_display,
                        config,
                        task.capture_time,
                        &task.smtp,
                    )
                    .await
            }
            AlertKind::Gauge => {
                evaluator
                    .check_gauge_alert(
                        &task.agent_id,
                        &task.agent_display,
                        config,
                        task.capture_time,
                        &task.smtp,
                    )
                    .await
            }
            AlertKind::Heartbeat => {
                evaluator
                    .check_heartbeat_alert(&task.agent_id, &task.agent_display, config, &task.smtp)
                    .await
            }
        };

        let outcome = match result {
            Ok(()) => "ok",
            Err(source) => {
                let err = AlertError::Evaluation {
                    agent_id: task.agent_id.clone(),
                    alert_id: config.id.clone(),
                    kind: task.kind.as_str(),
                    source,
                };
                tracing::error!(
                    agent = %task.agent_display,
                    error = %format!("{:#}", anyhow::Error::from(err)),
                    "alert evaluation failed",
                );
                "error"
            }
        };

        if let Some(m) = metrics {
            m.alert_evaluations
                .with_label_values(&[task.kind.as_str(), outcome])
                .inc();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::memory::FailPoint;
    use crate::store::MemoryStore;
    use crate::wire::AgentConfig;

    /// Records calls and fails or blocks on request.
    #[derive(Default)]
    struct RecordingEvaluator {
        started: AtomicU64,
        calls: parking_lot::Mutex<Vec<(AlertKind, String, Option<i64>)>>,
        fail_ids: Vec<String>,
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    impl RecordingEvaluator {
        async fn record(&self, kind: AlertKind, config: &AlertConfig, at: Option<i64>) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(ref gate) = self.gate {
                let permit = gate.acquire().await?;
                permit.forget();
            }
            self.calls.lock().push((kind, config.id.clone(), at));
            if self.fail_ids.contains(&config.id) {
                anyhow::bail!("evaluation of {} failed", config.id);
            }
            Ok(())
        }

        fn ids(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(_, id, _)| id.clone()).collect()
        }
    }

    #[async_trait]
    impl AlertEvaluator for RecordingEvaluator {
        async fn check_transaction_alert(
            &self,
            _agent_id: &str,
            _agent_display: &str,
            config: &AlertConfig,
            capture_time: i64,
            _smtp: &SmtpConfig,
        ) -> Result<()> {
            self.record(AlertKind::Transaction, config, Some(capture_time)).await
        }

        async fn check_gauge_alert(
            &self,
            _agent_id: &str,
            _agent_display: &str,
            config: &AlertConfig,
            capture_time: i64,
            _smtp: &SmtpConfig,
        ) -> Result<()> {
            self.record(AlertKind::Gauge, config, Some(capture_time)).await
        }

        async fn check_heartbeat_alert(
            &self,
            _agent_id: &str,
            _agent_display: &str,
            config: &AlertConfig,
            _smtp: &SmtpConfig,
        ) -> Result<()> {
            self.record(AlertKind::Heartbeat, config, None).await
        }
    }

    fn smtp() -> SmtpConfig {
        SmtpConfig {
            host: "mail.example.com".to_string(),
            ..Default::default()
        }
    }

    fn store_with_alerts(agent_id: &str, alerts: &[(&str, AlertKind)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(smtp()));
        store.put_config(
            agent_id,
            AgentConfig {
                alert_config: alerts
                    .iter()
                    .map(|(id, kind)| AlertConfig {
                        id: id.to_string(),
                        kind: *kind as i32,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
        );
        store
    }

    async fn wait_for_calls(evaluator: &RecordingEvaluator, n: usize) {
        for _ in 0..200 {
            if evaluator.calls.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} evaluator calls, saw {:?}", evaluator.ids());
    }

    async fn wait_for_started(evaluator: &RecordingEvaluator, n: u64) {
        for _ in 0..200 {
            if evaluator.started.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} evaluations to start");
    }

    #[tokio::test]
    async fn test_failing_config_does_not_stop_loop() {
        let store = store_with_alerts(
            "a1",
            &[
                ("t1", AlertKind::Transaction),
                ("t2", AlertKind::Transaction),
                ("t3", AlertKind::Transaction),
                ("g1", AlertKind::Gauge),
            ],
        );
        let evaluator = Arc::new(RecordingEvaluator {
            fail_ids: vec!["t2".to_string()],
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(store, evaluator.clone(), 8, None);
        dispatcher.start();

        let outcome = dispatcher
            .check("a1", "Agent One", AlertKind::Transaction, 60_000)
            .await;
        assert_eq!(outcome, CheckOutcome::Enqueued);

        wait_for_calls(&evaluator, 3).await;
        assert_eq!(evaluator.ids(), vec!["t1", "t2", "t3"]);
        assert!(evaluator
            .calls
            .lock()
            .iter()
            .all(|(kind, _, at)| *kind == AlertKind::Transaction && *at == Some(60_000)));

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_heartbeat_evaluated_without_capture_time() {
        let store = store_with_alerts("a1", &[("h1", AlertKind::Heartbeat)]);
        let evaluator = Arc::new(RecordingEvaluator::default());
        let dispatcher = AlertDispatcher::new(store, evaluator.clone(), 8, None);
        dispatcher.start();

        dispatcher.check("a1", "a1", AlertKind::Heartbeat, 5).await;
        wait_for_calls(&evaluator, 1).await;
        assert_eq!(
            evaluator.calls.lock().clone(),
            vec![(AlertKind::Heartbeat, "h1".to_string(), None)]
        );

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_tasks_run_in_order() {
        let store = store_with_alerts(
            "a1",
            &[("t1", AlertKind::Transaction), ("g1", AlertKind::Gauge)],
        );
        let evaluator = Arc::new(RecordingEvaluator::default());
        let dispatcher = AlertDispatcher::new(store, evaluator.clone(), 8, None);

        // Queued before the worker exists.
        dispatcher.check("a1", "a1", AlertKind::Gauge, 1).await;
        dispatcher.check("a1", "a1", AlertKind::Transaction, 2).await;
        dispatcher.start();

        wait_for_calls(&evaluator, 2).await;
        assert_eq!(evaluator.ids(), vec!["g1", "t1"]);
        assert_eq!(dispatcher.enqueued(), 2);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_skip_conditions() {
        let store = store_with_alerts("a1", &[("t1", AlertKind::Transaction)]);
        let evaluator = Arc::new(RecordingEvaluator::default());
        let dispatcher = AlertDispatcher::new(store.clone(), evaluator, 8, None);

        assert_eq!(
            dispatcher.check("a1", "a1", AlertKind::Gauge, 1).await,
            CheckOutcome::NoConfigs
        );

        store.set_failing(FailPoint::AlertConfigs, true);
        assert_eq!(
            dispatcher.check("a1", "a1", AlertKind::Transaction, 1).await,
            CheckOutcome::LookupFailed
        );
        store.set_failing(FailPoint::AlertConfigs, false);

        store.set_failing(FailPoint::SmtpConfig, true);
        assert_eq!(
            dispatcher.check("a1", "a1", AlertKind::Transaction, 1).await,
            CheckOutcome::LookupFailed
        );
        store.set_failing(FailPoint::SmtpConfig, false);

        store.set_smtp_config(SmtpConfig::default());
        assert_eq!(
            dispatcher.check("a1", "a1", AlertKind::Transaction, 1).await,
            CheckOutcome::SmtpDisabled
        );

        assert_eq!(dispatcher.enqueued(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_task() {
        let store = store_with_alerts("a1", &[("t1", AlertKind::Transaction)]);
        let evaluator = Arc::new(RecordingEvaluator::default());
        let dispatcher = AlertDispatcher::new(store, evaluator, 1, None);

        assert_eq!(
            dispatcher.check("a1", "a1", AlertKind::Transaction, 1).await,
            CheckOutcome::Enqueued
        );
        assert_eq!(
            dispatcher.check("a1", "a1", AlertKind::Transaction, 2).await,
            CheckOutcome::QueueFull
        );
        assert_eq!(dispatcher.enqueued(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_configs() {
        let store = store_with_alerts(
            "a1",
            &[
                ("t1", AlertKind::Transaction),
                ("t2", AlertKind::Transaction),
                ("t3", AlertKind::Transaction),
            ],
        );
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let evaluator = Arc::new(RecordingEvaluator {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(store, evaluator.clone(), 8, None);
        dispatcher.start();

        dispatcher.check("a1", "a1", AlertKind::Transaction, 1).await;
        dispatcher.check("a1", "a1", AlertKind::Transaction, 2).await;

        // Let exactly one evaluation through, then cancel while the second
        // is parked on the gate.
        gate.add_permits(1);
        wait_for_calls(&evaluator, 1).await;
        wait_for_started(&evaluator, 2).await;

        dispatcher.cancel.cancel();
        gate.add_permits(10);
        dispatcher.stop().await;

        // The in-flight evaluation finishes; nothing after it starts.
        assert_eq!(evaluator.ids(), vec!["t1", "t2"]);

        assert_eq!(
            dispatcher.check("a1", "a1", AlertKind::Transaction, 3).await,
            CheckOutcome::Closed
        );
    }
}
