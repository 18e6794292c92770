//! Collector gRPC service: decodes agent RPCs, drives the ingestion path,
//! and maps its outcome onto gRPC statuses.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

use crate::export::health::HealthMetrics;
use crate::ingest::{legacy, Ack, AggregateSession, Batch, Dispatcher, GaugeBatch, IngestError, TraceSession};
use crate::wire::{
    aggregate_stream_message, trace_stream_message, AggregateResponseMessage,
    AggregateStreamMessage, CollectorService, CollectorServiceServer, EmptyMessage,
    GaugeValueMessage, InitMessage, InitResponse, LogEvent, LogLevel, LogMessage,
    OldAggregateMessage, OldTraceMessage, Throwable, TraceStreamMessage,
};

const AGGREGATE_STREAM: &str = "aggregate";
const TRACE_STREAM: &str = "trace";

/// Implementation of the generated `CollectorService` trait.
pub struct CollectorServiceImpl {
    dispatcher: Arc<Dispatcher>,
    server_version: String,
    metrics: Option<Arc<HealthMetrics>>,
}

impl CollectorServiceImpl {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        server_version: String,
        metrics: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            dispatcher,
            server_version,
            metrics,
        }
    }

    fn observe<T>(&self, method: &str, start: Instant, result: &Result<T, Status>) {
        let Some(ref m) = self.metrics else {
            return;
        };
        let code = match result {
            Ok(_) => tonic::Code::Ok,
            Err(status) => status.code(),
        };
        m.rpc_requests
            .with_label_values(&[method, &format!("{code:?}")])
            .inc();
        m.rpc_duration
            .with_label_values(&[method])
            .observe(start.elapsed().as_secs_f64());
    }

    fn count_frame(&self, stream: &str, kind: &str) {
        if let Some(ref m) = self.metrics {
            m.frames_received.with_label_values(&[stream, kind]).inc();
        }
    }

    /// Log an ingestion failure under the agent's display name and convert
    /// it for the client.
    async fn fail(&self, stream: &str, err: IngestError) -> Status {
        let agent_display = match err.agent_id() {
            Some(agent_id) => self.dispatcher.agent_display(agent_id).await,
            None => "<unknown agent>".to_string(),
        };

        let storage = matches!(err, IngestError::StorageFailure { .. });
        if matches!(err, IngestError::ProtocolViolation { .. }) {
            if let Some(ref m) = self.metrics {
                m.protocol_violations.with_label_values(&[stream]).inc();
            }
        }

        let status = Status::from(err);
        if storage {
            tracing::error!(
                agent = %agent_display,
                stream,
                error = %status.message(),
                "ingestion failed",
            );
        } else {
            tracing::warn!(
                agent = %agent_display,
                stream,
                error = %status.message(),
                "ingestion rejected",
            );
        }

        status
    }

    /// Close-then-commit tail shared by every ingestion RPC.
    async fn commit(&self, stream: &str, batch: Result<Batch, IngestError>) -> Result<Ack, Status> {
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => return Err(self.fail(stream, e).await),
        };

        match self.dispatcher.commit(batch).await {
            Ok(ack) => Ok(ack),
            Err(e) => Err(self.fail(stream, e).await),
        }
    }

    async fn transport_error(&self, stream: &str, agent_id: Option<&str>, status: Status) -> Status {
        let agent_display = match agent_id {
            Some(agent_id) => self.dispatcher.agent_display(agent_id).await,
            None => "<unknown agent>".to_string(),
        };
        log_stream_aborted(&agent_display, stream, &status);
        status
    }

    async fn init(&self, message: InitMessage) -> Result<InitResponse, Status> {
        let agent_id = message.agent_id;
        let rollup = legacy::normalize_rollup_id(&message.agent_rollup_id);
        let environment = message.environment.unwrap_or_default();
        let sent = message.agent_config.unwrap_or_default();

        let stored = match self
            .dispatcher
            .stores()
            .agents
            .store_agent(&agent_id, rollup.as_deref(), &environment, &sent)
            .await
        {
            Ok(stored) => stored,
            Err(source) => {
                let err = IngestError::StorageFailure {
                    agent_id,
                    target: "agent",
                    source,
                };
                return Err(self.fail("init", err).await);
            }
        };

        if let Some(ref m) = self.metrics {
            m.agents_initialized.inc();
        }

        let agent_display = self.dispatcher.agent_display(&agent_id).await;
        tracing::info!(
            agent = %agent_display,
            rollup = rollup.as_deref().unwrap_or(""),
            host = %environment.host_name,
            agent_version = %environment.agent_version,
            "agent connected",
        );

        let agent_config = (stored != sent).then_some(stored);

        Ok(InitResponse {
            central_version: self.server_version.clone(),
            agent_config,
        })
    }

    async fn aggregate_stream(
        &self,
        mut stream: Streaming<AggregateStreamMessage>,
    ) -> Result<AggregateResponseMessage, Status> {
        let mut session = AggregateSession::new();

        loop {
            let message = match stream.message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(status) => {
                    return Err(self
                        .transport_error(AGGREGATE_STREAM, session.agent_id(), status)
                        .await)
                }
            };

            self.count_frame(AGGREGATE_STREAM, aggregate_frame_kind(&message));

            session = match session.apply_message(message) {
                Ok(session) => session,
                Err(e) => return Err(self.fail(AGGREGATE_STREAM, e).await),
            };
        }

        let batch = session.close().map(Batch::Aggregates);
        let ack = self.commit(AGGREGATE_STREAM, batch).await?;
        Ok(aggregate_response(ack))
    }

    async fn trace_stream(
        &self,
        mut stream: Streaming<TraceStreamMessage>,
    ) -> Result<EmptyMessage, Status> {
        let mut session = TraceSession::new();

        loop {
            let message = match stream.message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(status) => {
                    return Err(self
                        .transport_error(TRACE_STREAM, session.agent_id(), status)
                        .await)
                }
            };

            self.count_frame(TRACE_STREAM, trace_frame_kind(&message));

            session = match session.apply_message(message) {
                Ok(session) => session,
                Err(e) => return Err(self.fail(TRACE_STREAM, e).await),
            };
        }

        tracing::debug!(
            agent_id = session.agent_id().unwrap_or(""),
            trace_id = session.trace_id().unwrap_or(""),
            "trace stream completed",
        );

        let batch = session.close().map(Batch::Trace);
        self.commit(TRACE_STREAM, batch).await?;
        Ok(EmptyMessage {})
    }

    async fn relay_log(&self, message: LogMessage) {
        let Some(event) = message.log_event else {
            return;
        };

        let agent_display = self.dispatcher.agent_display(&message.agent_id).await;
        let line = format_log_event(&agent_display, &event);
        let level = event.level();

        match level {
            LogLevel::Error => tracing::error!(target: "agent", "{line}"),
            LogLevel::Warn => tracing::warn!(target: "agent", "{line}"),
            _ => tracing::info!(target: "agent", "{line}"),
        }

        if let Some(ref m) = self.metrics {
            m.remote_log_events
                .with_label_values(&[level.as_str()])
                .inc();
        }
    }
}

#[tonic::async_trait]
impl CollectorService for CollectorServiceImpl {
    async fn collect_init(
        &self,
        request: Request<InitMessage>,
    ) -> Result<Response<InitResponse>, Status> {
        let start = Instant::now();
        let result = self.init(request.into_inner()).await;
        self.observe("CollectInit", start, &result);
        result.map(Response::new)
    }

    async fn collect_aggregate_stream(
        &self,
        request: Request<Streaming<AggregateStreamMessage>>,
    ) -> Result<Response<AggregateResponseMessage>, Status> {
        let start = Instant::now();
        let result = self.aggregate_stream(request.into_inner()).await;
        self.observe("CollectAggregateStream", start, &result);
        result.map(Response::new)
    }

    async fn collect_aggregates(
        &self,
        request: Request<OldAggregateMessage>,
    ) -> Result<Response<AggregateResponseMessage>, Status> {
        let start = Instant::now();
        let batch = Batch::Aggregates(legacy::aggregate_batch(request.into_inner()));
        let result = self
            .commit(AGGREGATE_STREAM, Ok(batch))
            .await
            .map(aggregate_response);
        self.observe("CollectAggregates", start, &result);
        result.map(Response::new)
    }

    async fn collect_gauge_values(
        &self,
        request: Request<GaugeValueMessage>,
    ) -> Result<Response<EmptyMessage>, Status> {
        let start = Instant::now();
        let message = request.into_inner();
        let batch = Batch::Gauges(GaugeBatch {
            agent_id: message.agent_id,
            samples: message.gauge_values,
        });
        let result = self
            .commit("gauge", Ok(batch))
            .await
            .map(|_| EmptyMessage {});
        self.observe("CollectGaugeValues", start, &result);
        result.map(Response::new)
    }

    async fn collect_trace_stream(
        &self,
        request: Request<Streaming<TraceStreamMessage>>,
    ) -> Result<Response<EmptyMessage>, Status> {
        let start = Instant::now();
        let result = self.trace_stream(request.into_inner()).await;
        self.observe("CollectTraceStream", start, &result);
        result.map(Response::new)
    }

    async fn collect_trace(
        &self,
        request: Request<OldTraceMessage>,
    ) -> Result<Response<EmptyMessage>, Status> {
        let start = Instant::now();
        let batch = legacy::trace_batch(request.into_inner()).map(Batch::Trace);
        let result = self
            .commit(TRACE_STREAM, batch)
            .await
            .map(|_| EmptyMessage {});
        self.observe("CollectTrace", start, &result);
        result.map(Response::new)
    }

    async fn log(&self, request: Request<LogMessage>) -> Result<Response<EmptyMessage>, Status> {
        let start = Instant::now();
        self.relay_log(request.into_inner()).await;
        let result = Ok(EmptyMessage {});
        self.observe("Log", start, &result);
        result.map(Response::new)
    }
}

fn log_stream_aborted(agent_display: &str, stream: &str, status: &Status) {
    tracing::error!(
        agent = %agent_display,
        stream,
        error = %status.message(),
        code = ?status.code(),
        "stream aborted by transport",
    );
}

fn aggregate_response(ack: Ack) -> AggregateResponseMessage {
    let next_delay_millis = match ack {
        Ack::Aggregates { next_delay_millis } => next_delay_millis as i32,
        Ack::Empty => 0,
    };
    AggregateResponseMessage { next_delay_millis }
}

fn aggregate_frame_kind(message: &AggregateStreamMessage) -> &'static str {
    use aggregate_stream_message::Message;

    match message.message {
        Some(Message::Header(_)) => "header",
        Some(Message::SharedQueryText(_)) => "shared_query_text",
        Some(Message::OverallAggregate(_)) => "overall_aggregate",
        Some(Message::TransactionAggregate(_)) => "transaction_aggregate",
        None => "empty",
    }
}

fn trace_frame_kind(message: &TraceStreamMessage) -> &'static str {
    use trace_stream_message::Message;

    match message.message {
        Some(Message::Header(_)) => "header",
        Some(Message::SharedQueryText(_)) => "shared_query_text",
        Some(Message::Trace(_)) => "trace",
        None => "empty",
    }
}

/// `display -- LEVEL -- logger -- message`, followed by the stack trace
/// when the event carries one.
pub fn format_log_event(display: &str, event: &LogEvent) -> String {
    let mut line = format!(
        "{display} -- {} -- {} -- {}",
        event.level().as_str(),
        event.logger_name,
        event.message
    );

    let mut cause = event.throwable.as_ref();
    let mut first = true;
    while let Some(t) = cause {
        line.push('\n');
        if !first {
            line.push_str("Caused by: ");
        }
        write_throwable_header(&mut line, t);
        for frame in &t.stack_trace_element {
            let _ = write!(line, "\n\tat {frame}");
        }
        cause = t.cause.as_deref();
        first = false;
    }

    line
}

fn write_throwable_header(line: &mut String, t: &Throwable) {
    line.push_str(&t.class_name);
    if !t.message.is_empty() {
        line.push_str(": ");
        line.push_str(&t.message);
    }
}

/// Running collector gRPC server.
pub struct GrpcServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

impl GrpcServer {
    /// Bind `addr` and start serving in the background.
    pub async fn start(addr: &str, service: CollectorServiceImpl) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("listening on {addr}"))?;
        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();

        let handle = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(CollectorServiceServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    shutdown.cancelled().await;
                })
                .await
        });

        tracing::info!(addr = %local_addr, "collector gRPC server started");

        Ok(Self {
            local_addr,
            cancel,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight RPCs to finish.
    pub async fn close(self) -> Result<()> {
        self.cancel.cancel();

        self.handle
            .await
            .context("gRPC server task panicked")?
            .context("gRPC server error")?;

        tracing::info!("collector gRPC server stopped");

        Ok(())
    }
}
