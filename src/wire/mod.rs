//! Wire messages exchanged with monitored agents.
//!
//! Field tags follow the collector protocol spoken by deployed agents, so
//! they must not be renumbered. The service glue is generated by `build.rs`.

#[allow(clippy::all)]
mod generated {
    include!(concat!(
        env!("OUT_DIR"),
        "/org.glowroot.wire.api.model.CollectorService.rs"
    ));
}

pub use generated::collector_service_client::CollectorServiceClient;
pub use generated::collector_service_server::{CollectorService, CollectorServiceServer};

// --- Init ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitMessage {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(string, tag = "2")]
    pub agent_rollup_id: String,
    #[prost(message, optional, tag = "3")]
    pub environment: Option<Environment>,
    #[prost(message, optional, tag = "4")]
    pub agent_config: Option<AgentConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitResponse {
    #[prost(string, tag = "1")]
    pub central_version: String,
    /// Only present when the stored config differs from the one the agent sent.
    #[prost(message, optional, tag = "2")]
    pub agent_config: Option<AgentConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Environment {
    #[prost(string, tag = "1")]
    pub host_name: String,
    #[prost(string, tag = "2")]
    pub agent_version: String,
    #[prost(string, tag = "3")]
    pub runtime_version: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentConfig {
    #[prost(message, optional, tag = "1")]
    pub transaction_config: Option<TransactionConfig>,
    #[prost(message, repeated, tag = "2")]
    pub gauge_config: Vec<GaugeConfig>,
    #[prost(message, repeated, tag = "3")]
    pub alert_config: Vec<AlertConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionConfig {
    #[prost(int32, tag = "1")]
    pub slow_threshold_millis: i32,
    #[prost(int32, tag = "2")]
    pub profiling_interval_millis: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GaugeConfig {
    #[prost(string, tag = "1")]
    pub mbean_object_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AlertConfig {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(enumeration = "AlertKind", tag = "2")]
    pub kind: i32,
    #[prost(string, tag = "3")]
    pub transaction_type: String,
    #[prost(double, tag = "4")]
    pub transaction_percentile: f64,
    #[prost(int32, tag = "5")]
    pub threshold_millis: i32,
    #[prost(string, tag = "6")]
    pub gauge_name: String,
    #[prost(double, tag = "7")]
    pub gauge_threshold: f64,
    #[prost(int32, tag = "8")]
    pub time_period_seconds: i32,
    #[prost(int64, tag = "9")]
    pub min_transaction_count: i64,
    #[prost(string, repeated, tag = "10")]
    pub email_address: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AlertKind {
    Transaction = 0,
    Gauge = 1,
    Heartbeat = 2,
}

impl AlertKind {
    /// Returns the metric/log label for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Gauge => "gauge",
            Self::Heartbeat => "heartbeat",
        }
    }
}

// --- Aggregates ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AggregateStreamMessage {
    #[prost(oneof = "aggregate_stream_message::Message", tags = "1, 2, 3, 4")]
    pub message: Option<aggregate_stream_message::Message>,
}

pub mod aggregate_stream_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Header(super::AggregateStreamHeader),
        #[prost(message, tag = "2")]
        SharedQueryText(super::SharedQueryText),
        #[prost(message, tag = "3")]
        OverallAggregate(super::OverallAggregate),
        #[prost(message, tag = "4")]
        TransactionAggregate(super::TransactionAggregate),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AggregateStreamHeader {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(int64, tag = "2")]
    pub capture_time: i64,
}

/// Query text referenced by ordinal from aggregates and trace entries.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SharedQueryText {
    #[prost(string, tag = "1")]
    pub full_text: String,
    /// Set instead of `full_text` when the central store already holds the text.
    #[prost(string, tag = "2")]
    pub truncated_text: String,
    #[prost(string, tag = "3")]
    pub full_text_sha1: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OverallAggregate {
    #[prost(string, tag = "1")]
    pub transaction_type: String,
    #[prost(message, optional, tag = "2")]
    pub aggregate: Option<Aggregate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionAggregate {
    #[prost(string, tag = "1")]
    pub transaction_type: String,
    #[prost(string, tag = "2")]
    pub transaction_name: String,
    #[prost(message, optional, tag = "3")]
    pub aggregate: Option<Aggregate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Aggregate {
    #[prost(double, tag = "1")]
    pub total_duration_nanos: f64,
    #[prost(int64, tag = "2")]
    pub transaction_count: i64,
    #[prost(int64, tag = "3")]
    pub error_count: i64,
    #[prost(bool, tag = "4")]
    pub async_transactions: bool,
    #[prost(message, repeated, tag = "5")]
    pub query: Vec<Query>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Query {
    #[prost(string, tag = "1")]
    pub query_type: String,
    /// Ordinal into the session's shared query texts.
    #[prost(int32, tag = "2")]
    pub shared_query_text_index: i32,
    #[prost(double, tag = "3")]
    pub total_duration_nanos: f64,
    #[prost(int64, tag = "4")]
    pub execution_count: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OldAggregatesByType {
    #[prost(string, tag = "1")]
    pub transaction_type: String,
    #[prost(message, optional, tag = "2")]
    pub overall_aggregate: Option<Aggregate>,
    #[prost(message, repeated, tag = "3")]
    pub transaction_aggregate: Vec<OldTransactionAggregate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OldTransactionAggregate {
    #[prost(string, tag = "1")]
    pub transaction_name: String,
    #[prost(message, optional, tag = "2")]
    pub aggregate: Option<Aggregate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OldAggregateMessage {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(int64, tag = "2")]
    pub capture_time: i64,
    #[prost(message, repeated, tag = "3")]
    pub aggregates_by_type: Vec<OldAggregatesByType>,
    #[prost(message, repeated, tag = "4")]
    pub shared_query_text: Vec<SharedQueryText>,
    /// Bare query texts sent by agents that predate `SharedQueryText`.
    #[prost(string, repeated, tag = "5")]
    pub old_shared_query_text: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AggregateResponseMessage {
    #[prost(int32, tag = "1")]
    pub next_delay_millis: i32,
}

// --- Gauges ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GaugeValueMessage {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(message, repeated, tag = "2")]
    pub gauge_values: Vec<GaugeValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GaugeValue {
    #[prost(string, tag = "1")]
    pub gauge_name: String,
    #[prost(int64, tag = "2")]
    pub capture_time: i64,
    #[prost(double, tag = "3")]
    pub value: f64,
    #[prost(int64, tag = "4")]
    pub weight: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmptyMessage {}

// --- Traces ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceStreamMessage {
    #[prost(oneof = "trace_stream_message::Message", tags = "1, 2, 3")]
    pub message: Option<trace_stream_message::Message>,
}

pub mod trace_stream_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Header(super::TraceStreamHeader),
        #[prost(message, tag = "2")]
        SharedQueryText(super::SharedQueryText),
        #[prost(message, tag = "3")]
        Trace(super::Trace),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceStreamHeader {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(string, tag = "2")]
    pub trace_id: String,
    #[prost(bool, tag = "3")]
    pub update: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trace {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(bool, tag = "2")]
    pub update: bool,
    #[prost(message, optional, tag = "3")]
    pub header: Option<TraceHeader>,
    #[prost(message, repeated, tag = "4")]
    pub entry: Vec<TraceEntry>,
    #[prost(message, repeated, tag = "5")]
    pub shared_query_text: Vec<SharedQueryText>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceHeader {
    #[prost(int64, tag = "1")]
    pub start_time: i64,
    #[prost(int64, tag = "2")]
    pub capture_time: i64,
    #[prost(int64, tag = "3")]
    pub duration_nanos: i64,
    #[prost(string, tag = "4")]
    pub transaction_type: String,
    #[prost(string, tag = "5")]
    pub transaction_name: String,
    #[prost(string, tag = "6")]
    pub headline: String,
    #[prost(bool, tag = "7")]
    pub error: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceEntry {
    #[prost(int32, tag = "1")]
    pub depth: i32,
    #[prost(int64, tag = "2")]
    pub start_offset_nanos: i64,
    #[prost(int64, tag = "3")]
    pub duration_nanos: i64,
    #[prost(string, tag = "4")]
    pub message: String,
    /// Ordinal into the trace's shared query texts, or -1.
    #[prost(int32, tag = "5")]
    pub shared_query_text_index: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OldTraceMessage {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(message, optional, tag = "2")]
    pub trace: Option<Trace>,
}

// --- Remote logging ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogMessage {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(message, optional, tag = "2")]
    pub log_event: Option<LogEvent>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEvent {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(enumeration = "LogLevel", tag = "2")]
    pub level: i32,
    #[prost(string, tag = "3")]
    pub logger_name: String,
    #[prost(string, tag = "4")]
    pub message: String,
    #[prost(message, optional, tag = "5")]
    pub throwable: Option<Throwable>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LogLevel {
    None = 0,
    Trace = 1,
    Debug = 2,
    Info = 3,
    Warn = 4,
    Error = 5,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Throwable {
    #[prost(string, tag = "1")]
    pub class_name: String,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, repeated, tag = "3")]
    pub stack_trace_element: Vec<String>,
    #[prost(message, optional, boxed, tag = "4")]
    pub cause: Option<Box<Throwable>>,
}
