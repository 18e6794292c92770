use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::alert::{AlertDispatcher, AlertEvaluator, LoggingEvaluator};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::ingest::{Dispatcher, IngestStats};
use crate::server::{CollectorServiceImpl, GrpcServer};
use crate::store::{MemoryStore, Stores};

/// Central orchestrates all components: health server, alert dispatcher,
/// ingestion dispatcher, and the collector gRPC server.
pub struct Central {
    cfg: Config,
    health: Arc<HealthMetrics>,
    stores: Stores,
    evaluator: Arc<dyn AlertEvaluator>,
    clock: Arc<dyn Clock>,
    alerts: Option<Arc<AlertDispatcher>>,
    grpc: Option<GrpcServer>,
    stats: Arc<IngestStats>,
    cancel: CancellationToken,
}

impl Central {
    /// Creates a Central backed by the in-memory store and the logging
    /// evaluator.
    pub fn new(cfg: Config) -> Result<Self> {
        let store = Arc::new(MemoryStore::with_retention(
            cfg.alerting.smtp.clone(),
            cfg.store.retention,
        ));
        Self::with_collaborators(cfg, Stores::memory(store), Arc::new(LoggingEvaluator))
    }

    /// Creates a Central over caller-provided storage and alert evaluation.
    pub fn with_collaborators(
        cfg: Config,
        stores: Stores,
        evaluator: Arc<dyn AlertEvaluator>,
    ) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            stores,
            evaluator,
            clock: Arc::new(SystemClock),
            alerts: None,
            grpc: None,
            stats: Arc::new(IngestStats::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components and begin accepting agent connections.
    pub async fn start(&mut self) -> Result<()> {
        // 0. Health server first so health checks answer during startup.
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        // 1. Alert worker, before any RPC can enqueue.
        let alerts = Arc::new(AlertDispatcher::new(
            self.stores.configs.clone(),
            self.evaluator.clone(),
            self.cfg.alerting.queue_capacity,
            Some(self.health.clone()),
        ));
        alerts.start();
        info!(
            queue_capacity = self.cfg.alerting.queue_capacity,
            smtp_enabled = self.cfg.alerting.smtp.is_enabled(),
            "alert dispatcher started",
        );

        // 2. Ingestion path and gRPC listener.
        let dispatcher = Arc::new(Dispatcher::new(
            self.stores.clone(),
            alerts.clone(),
            self.clock.clone(),
            self.stats.clone(),
            Some(self.health.clone()),
        ));
        let service = CollectorServiceImpl::new(
            dispatcher,
            self.cfg.server_version.clone(),
            Some(self.health.clone()),
        );
        let grpc = GrpcServer::start(&self.cfg.grpc_addr(), service)
            .await
            .context("starting collector gRPC server")?;

        self.alerts = Some(alerts);
        self.grpc = Some(grpc);

        // 3. Background reporting.
        self.spawn_ingest_stats_reporter();

        Ok(())
    }

    /// Address the gRPC server is listening on, once started.
    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        self.grpc.as_ref().map(GrpcServer::local_addr)
    }

    pub fn health(&self) -> &Arc<HealthMetrics> {
        &self.health
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        // Stop accepting RPCs and wait for in-flight ones.
        if let Some(grpc) = self.grpc.take() {
            if let Err(e) = grpc.close().await {
                error!(error = %e, "error stopping collector gRPC server");
            }
        }

        // Pending alert tasks are discarded.
        if let Some(alerts) = self.alerts.take() {
            alerts.stop().await;
            info!(enqueued = alerts.enqueued(), "alert dispatcher stopped");
        }

        self.health.stop().await?;

        Ok(())
    }

    /// Spawn background ingestion stats reporter.
    fn spawn_ingest_stats_reporter(&self) {
        let cancel = self.cancel.clone();
        let stats = Arc::clone(&self.stats);
        let interval = self.cfg.stats_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let snapshot = stats.snapshot();
                        let committed: u64 = snapshot.iter().map(|c| c.committed).sum();
                        let failed: u64 = snapshot.iter().map(|c| c.failed).sum();

                        if committed == 0 && failed == 0 {
                            continue;
                        }

                        info!(committed, failed, interval = ?interval, "ingest stats");

                        for counts in &snapshot {
                            debug!(
                                kind = counts.kind.as_str(),
                                committed = counts.committed,
                                failed = counts.failed,
                                "  by batch kind",
                            );
                        }
                    }
                }
            }
        });
    }
}
