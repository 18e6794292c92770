use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "central";

/// Prometheus metrics for the collector.
///
/// All metrics use the "central" namespace and are served from `/metrics`.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,

    // === RPC ===
    /// Collector RPCs by method and gRPC status code.
    pub rpc_requests: CounterVec,
    /// Collector RPC duration by method, including storage writes.
    pub rpc_duration: HistogramVec,
    /// Stream frames received by stream and frame kind.
    pub frames_received: CounterVec,
    /// Agents registered through CollectInit.
    pub agents_initialized: Counter,
    /// Agent log events relayed, by level.
    pub remote_log_events: CounterVec,

    // === Ingestion ===
    /// Batches rejected for protocol violations, by stream.
    pub protocol_violations: CounterVec,
    /// Failed writes by store.
    pub storage_failures: CounterVec,
    /// Batches committed by batch kind.
    pub batches_committed: CounterVec,

    // === Alerting ===
    /// Alert tasks accepted onto the queue.
    pub alert_tasks_enqueued: Counter,
    /// Alert tasks dropped by reason (full/closed).
    pub alert_tasks_dropped: CounterVec,
    /// Alert config evaluations by kind and result.
    pub alert_evaluations: CounterVec,
    /// Tasks waiting in the alert queue.
    pub alert_queue_length: Gauge,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let rpc_requests = CounterVec::new(
            opts(
                "rpc_requests_total",
                "Total collector RPCs by method and status.",
            ),
            &["method", "status"],
        )?;
        let rpc_duration = HistogramVec::new(
            HistogramOpts::new(
                "rpc_duration_seconds",
                "Collector RPC duration by method.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["method"],
        )?;
        let frames_received = CounterVec::new(
            opts(
                "frames_received_total",
                "Total stream frames received by stream and frame kind.",
            ),
            &["stream", "kind"],
        )?;
        let agents_initialized = Counter::with_opts(opts(
            "agents_initialized_total",
            "Total agent registrations through CollectInit.",
        ))?;
        let remote_log_events = CounterVec::new(
            opts(
                "remote_log_events_total",
                "Total agent log events relayed by level.",
            ),
            &["level"],
        )?;

        let protocol_violations = CounterVec::new(
            opts(
                "protocol_violations_total",
                "Total batches rejected for protocol violations by stream.",
            ),
            &["stream"],
        )?;
        let storage_failures = CounterVec::new(
            opts("storage_failures_total", "Total failed writes by store."),
            &["store"],
        )?;
        let batches_committed = CounterVec::new(
            opts(
                "batches_committed_total",
                "Total batches committed by batch kind.",
            ),
            &["kind"],
        )?;

        let alert_tasks_enqueued = Counter::with_opts(opts(
            "alert_tasks_enqueued_total",
            "Total alert tasks accepted onto the queue.",
        ))?;
        let alert_tasks_dropped = CounterVec::new(
            opts(
                "alert_tasks_dropped_total",
                "Total alert tasks dropped by reason.",
            ),
            &["reason"],
        )?;
        let alert_evaluations = CounterVec::new(
            opts(
                "alert_evaluations_total",
                "Total alert config evaluations by kind and result.",
            ),
            &["kind", "result"],
        )?;
        let alert_queue_length = Gauge::with_opts(opts(
            "alert_queue_length",
            "Current number of tasks waiting in the alert queue.",
        ))?;

        registry.register(Box::new(rpc_requests.clone()))?;
        registry.register(Box::new(rpc_duration.clone()))?;
        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(agents_initialized.clone()))?;
        registry.register(Box::new(remote_log_events.clone()))?;
        registry.register(Box::new(protocol_violations.clone()))?;
        registry.register(Box::new(storage_failures.clone()))?;
        registry.register(Box::new(batches_committed.clone()))?;
        registry.register(Box::new(alert_tasks_enqueued.clone()))?;
        registry.register(Box::new(alert_tasks_dropped.clone()))?;
        registry.register(Box::new(alert_evaluations.clone()))?;
        registry.register(Box::new(alert_queue_length.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
            rpc_requests,
            rpc_duration,
            frames_received,
            agents_initialized,
            remote_log_events,
            protocol_violations,
            storage_failures,
            batches_committed,
            alert_tasks_enqueued,
            alert_tasks_dropped,
            alert_evaluations,
            alert_queue_length,
        })
    }

    /// Render the registry in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;
        *self.local_addr.lock() = Some(local_addr);

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_use_namespace() {
        let metrics = HealthMetrics::new(":0").unwrap();
        metrics.alert_tasks_enqueued.inc();
        metrics
            .batches_committed
            .with_label_values(&["aggregates"])
            .inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("central_alert_tasks_enqueued_total 1"));
        assert!(text.contains("central_batches_committed_total{kind=\"aggregates\"} 1"));
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_registry() {
        let metrics = HealthMetrics::new(":0").unwrap();
        metrics.agents_initialized.inc();

        let state = Arc::new(AppState {
            registry: metrics.registry.clone(),
        });
        let response = metrics_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("central_agents_initialized_total 1"));

        assert_eq!(healthz_handler().await, "ok");
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let metrics = HealthMetrics::new("127.0.0.1:0").unwrap();
        assert!(metrics.local_addr().is_none());

        metrics.start().await.unwrap();
        let addr = metrics.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // HTTP/1.0 responses are never chunked.
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.0\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(head.contains(" 200 "));
        assert_eq!(body, "ok");

        metrics.stop().await.unwrap();
    }
}
