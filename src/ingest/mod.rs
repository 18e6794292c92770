//! Ingestion path: stream reassembly, legacy normalization, commit, and the
//! collection-delay hint returned to agents.

pub mod delay;
pub mod dispatcher;
pub mod legacy;
pub mod session;
pub mod stats;

use thiserror::Error;

use crate::wire::{Aggregate, GaugeValue, SharedQueryText, Trace};

pub use delay::DelayState;
pub use dispatcher::Dispatcher;
pub use session::{AggregateSession, TraceSession};
pub use stats::IngestStats;

/// Failures that abort an ingestion RPC.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The agent sent frames that cannot form a valid batch.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        agent_id: Option<String>,
        message: String,
    },

    /// The stream ended before a required frame arrived.
    #[error("stream completed without a {missing} frame")]
    IncompleteStream {
        agent_id: Option<String>,
        missing: &'static str,
    },

    /// A storage collaborator rejected the write.
    #[error("failed to store {target}")]
    StorageFailure {
        agent_id: String,
        target: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl IngestError {
    pub(crate) fn violation(agent_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            agent_id: agent_id.map(str::to_owned),
            message: message.into(),
        }
    }

    pub(crate) fn incomplete(agent_id: Option<&str>, missing: &'static str) -> Self {
        Self::IncompleteStream {
            agent_id: agent_id.map(str::to_owned),
            missing,
        }
    }

    /// Best-known agent id for log attribution.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::ProtocolViolation { agent_id, .. } | Self::IncompleteStream { agent_id, .. } => {
                agent_id.as_deref()
            }
            Self::StorageFailure { agent_id, .. } => Some(agent_id),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::IncompleteStream { .. } => "incomplete_stream",
            Self::StorageFailure { .. } => "storage_failure",
        }
    }
}

impl From<IngestError> for tonic::Status {
    fn from(err: IngestError) -> Self {
        let code = match &err {
            IngestError::ProtocolViolation { .. } => tonic::Code::InvalidArgument,
            IngestError::IncompleteStream { .. } => tonic::Code::FailedPrecondition,
            IngestError::StorageFailure { .. } => tonic::Code::Internal,
        };
        // `{:#}` renders the source chain so agents see the storage cause.
        tonic::Status::new(code, format!("{:#}", anyhow::Error::from(err)))
    }
}

/// A transaction-level aggregate inside a group.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFragment {
    pub transaction_name: String,
    pub aggregate: Aggregate,
}

/// All aggregates reported for one transaction type in one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateGroup {
    pub transaction_type: String,
    pub overall: Aggregate,
    pub transactions: Vec<TransactionFragment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateBatch {
    pub agent_id: String,
    pub capture_time: i64,
    pub shared_query_texts: Vec<SharedQueryText>,
    pub groups: Vec<AggregateGroup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceBatch {
    pub agent_id: String,
    pub trace: Trace,
    /// Texts sent as separate stream frames, appended to the trace's own.
    pub shared_query_texts: Vec<SharedQueryText>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeBatch {
    pub agent_id: String,
    pub samples: Vec<GaugeValue>,
}

/// Immutable unit of work handed to [`Dispatcher::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Aggregates(AggregateBatch),
    Trace(TraceBatch),
    Gauges(GaugeBatch),
}

impl Batch {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Aggregates(b) => &b.agent_id,
            Self::Trace(b) => &b.agent_id,
            Self::Gauges(b) => &b.agent_id,
        }
    }

    pub fn kind(&self) -> BatchKind {
        match self {
            Self::Aggregates(_) => BatchKind::Aggregates,
            Self::Trace(_) => BatchKind::Trace,
            Self::Gauges(_) => BatchKind::Gauges,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BatchKind {
    Aggregates = 0,
    Trace = 1,
    Gauges = 2,
}

pub const MAX_BATCH_KIND: usize = 2;

impl BatchKind {
    pub const ALL: [BatchKind; MAX_BATCH_KIND + 1] =
        [BatchKind::Aggregates, BatchKind::Trace, BatchKind::Gauges];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggregates => "aggregates",
            Self::Trace => "trace",
            Self::Gauges => "gauges",
        }
    }
}

/// Acknowledgement returned once a batch is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Aggregates { next_delay_millis: u32 },
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let status: tonic::Status = IngestError::violation(Some("a1"), "bad frame").into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = IngestError::incomplete(None, "header").into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(status.message().contains("header"));

        let status: tonic::Status = IngestError::StorageFailure {
            agent_id: "a1".to_string(),
            target: "aggregates",
            source: anyhow::anyhow!("disk full"),
        }
        .into();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.message().contains("disk full"));
    }

    #[test]
    fn test_agent_id_attribution() {
        assert_eq!(IngestError::violation(Some("a1"), "x").agent_id(), Some("a1"));
        assert_eq!(IngestError::violation(None, "x").agent_id(), None);
        assert_eq!(IngestError::incomplete(None, "trace").agent_id(), None);
        assert_eq!(
            IngestError::incomplete(Some("a1"), "trace").agent_id(),
            Some("a1")
        );
    }

    #[test]
    fn test_batch_kind_roundtrip() {
        for kind in BatchKind::ALL {
            assert_eq!(BatchKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(BatchKind::from_u8(3), None);
    }
}
