use std::sync::Arc;

use super::{
    Ack, AggregateBatch, Batch, DelayState, GaugeBatch, IngestError, IngestStats, TraceBatch,
};
use crate::alert::AlertDispatcher;
use crate::clock::Clock;
use crate::export::health::HealthMetrics;
use crate::store::Stores;
use crate::wire::AlertKind;

/// Commits reassembled batches to storage and schedules alert checks.
///
/// A batch is acknowledged only after every write it needs has returned;
/// alert checks are queued only after that point and never affect the ack.
pub struct Dispatcher {
    stores: Stores,
    alerts: Arc<AlertDispatcher>,
    delay: DelayState,
    clock: Arc<dyn Clock>,
    stats: Arc<IngestStats>,
    metrics: Option<Arc<HealthMetrics>>,
}

impl Dispatcher {
    pub fn new(
        stores: Stores,
        alerts: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
        stats: Arc<IngestStats>,
        metrics: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            stores,
            alerts,
            delay: DelayState::new(),
            clock,
            stats,
            metrics,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Display name for log lines and alert tasks, falling back to the raw
    /// agent id when it cannot be resolved.
    pub async fn agent_display(&self, agent_id: &str) -> String {
        match self.stores.agents.read_agent_rollup_display(agent_id).await {
            Ok(display) => display,
            Err(e) => {
                tracing::debug!(agent = %agent_id, error = %e, "agent display lookup failed");
                agent_id.to_string()
            }
        }
    }

    pub async fn commit(&self, batch: Batch) -> Result<Ack, IngestError> {
        let kind = batch.kind();

        let result = match batch {
            Batch::Aggregates(b) => self.commit_aggregates(b).await,
            Batch::Trace(b) => self.commit_trace(b).await,
            Batch::Gauges(b) => self.commit_gauges(b).await,
        };

        match &result {
            Ok(_) => {
                self.stats.record_committed(kind);
                if let Some(ref m) = self.metrics {
                    m.batches_committed
                        .with_label_values(&[kind.as_str()])
                        .inc();
                }
            }
            Err(_) => self.stats.record_failed(kind),
        }

        result
    }

    async fn commit_aggregates(&self, batch: AggregateBatch) -> Result<Ack, IngestError> {
        let AggregateBatch {
            agent_id,
            capture_time,
            shared_query_texts,
            groups,
        } = batch;

        if !groups.is_empty() {
            self.stores
                .aggregates
                .store_aggregates(&agent_id, capture_time, &groups, &shared_query_texts)
                .await
                .map_err(|e| self.storage_failure(&agent_id, "aggregates", e))?;
        }

        // Transaction alerts are checked even for empty captures.
        let agent_display = self.agent_display(&agent_id).await;
        self.alerts
            .check(&agent_id, &agent_display, AlertKind::Transaction, capture_time)
            .await;

        let next_delay_millis = self
            .delay
            .next_delay_millis(self.clock.current_time_millis());
        tracing::debug!(
            agent = %agent_display,
            next_delay_millis,
            window_end_millis = self.delay.window_end_millis(),
            "aggregates committed",
        );

        Ok(Ack::Aggregates { next_delay_millis })
    }

    async fn commit_gauges(&self, batch: GaugeBatch) -> Result<Ack, IngestError> {
        let GaugeBatch { agent_id, samples } = batch;

        if !samples.is_empty() {
            self.stores
                .gauge_values
                .store_gauge_values(&agent_id, &samples)
                .await
                .map_err(|e| self.storage_failure(&agent_id, "gauge values", e))?;
        }

        // Samples above are already durable if this fails; the agent resends.
        self.stores
            .heartbeats
            .store_heartbeat(&agent_id)
            .await
            .map_err(|e| self.storage_failure(&agent_id, "heartbeat", e))?;

        let agent_display = self.agent_display(&agent_id).await;

        // An empty batch is checked at capture time 0.
        let max_capture_time = samples
            .iter()
            .map(|s| s.capture_time)
            .max()
            .unwrap_or(0);
        self.alerts
            .check(&agent_id, &agent_display, AlertKind::Gauge, max_capture_time)
            .await;
        self.alerts
            .check(
                &agent_id,
                &agent_display,
                AlertKind::Heartbeat,
                self.clock.current_time_millis(),
            )
            .await;

        Ok(Ack::Empty)
    }

    async fn commit_trace(&self, batch: TraceBatch) -> Result<Ack, IngestError> {
        let TraceBatch {
            agent_id,
            mut trace,
            shared_query_texts,
        } = batch;

        trace.shared_query_text.extend(shared_query_texts);

        self.stores
            .traces
            .store_trace(&agent_id, &trace)
            .await
            .map_err(|e| self.storage_failure(&agent_id, "trace", e))?;

        Ok(Ack::Empty)
    }

    fn storage_failure(
        &self,
        agent_id: &str,
        target: &'static str,
        source: anyhow::Error,
    ) -> IngestError {
        if let Some(ref m) = self.metrics {
            m.storage_failures.with_label_values(&[target]).inc();
        }
        IngestError::StorageFailure {
            agent_id: agent_id.to_string(),
            target,
            source,
        }
    }
}
