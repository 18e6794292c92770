//! Per-stream reassembly of aggregate and trace frames into batches.
//!
//! A session is a plain value threaded through the stream loop:
//! `session = session.apply(frame)?` for every inbound frame, then
//! `session.close()?` once the client half-closes. Nothing is committed
//! unless `close` succeeds.

use std::collections::HashMap;

use super::{AggregateBatch, AggregateGroup, IngestError, TraceBatch, TransactionFragment};
use crate::wire::{
    aggregate_stream_message, trace_stream_message, Aggregate, AggregateStreamMessage,
    SharedQueryText, Trace, TraceStreamMessage,
};

/// One decoded frame of an aggregate stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFrame {
    Header {
        agent_id: String,
        capture_time: i64,
    },
    SharedQueryText(SharedQueryText),
    OverallAggregate {
        transaction_type: String,
        aggregate: Aggregate,
    },
    TransactionAggregate {
        transaction_type: String,
        transaction_name: String,
        aggregate: Aggregate,
    },
}

impl TryFrom<AggregateStreamMessage> for AggregateFrame {
    type Error = IngestError;

    fn try_from(message: AggregateStreamMessage) -> Result<Self, Self::Error> {
        use aggregate_stream_message::Message;

        match message.message {
            Some(Message::Header(h)) => Ok(Self::Header {
                agent_id: h.agent_id,
                capture_time: h.capture_time,
            }),
            Some(Message::SharedQueryText(t)) => Ok(Self::SharedQueryText(t)),
            Some(Message::OverallAggregate(a)) => Ok(Self::OverallAggregate {
                transaction_type: a.transaction_type,
                aggregate: a.aggregate.unwrap_or_default(),
            }),
            Some(Message::TransactionAggregate(a)) => Ok(Self::TransactionAggregate {
                transaction_type: a.transaction_type,
                transaction_name: a.transaction_name,
                aggregate: a.aggregate.unwrap_or_default(),
            }),
            None => Err(IngestError::violation(
                None,
                "aggregate stream message carries no frame",
            )),
        }
    }
}

/// One decoded frame of a trace stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceFrame {
    Header { agent_id: String, trace_id: String },
    SharedQueryText(SharedQueryText),
    Trace(Trace),
}

impl TryFrom<TraceStreamMessage> for TraceFrame {
    type Error = IngestError;

    fn try_from(message: TraceStreamMessage) -> Result<Self, Self::Error> {
        use trace_stream_message::Message;

        match message.message {
            Some(Message::Header(h)) => Ok(Self::Header {
                agent_id: h.agent_id,
                trace_id: h.trace_id,
            }),
            Some(Message::SharedQueryText(t)) => Ok(Self::SharedQueryText(t)),
            Some(Message::Trace(t)) => Ok(Self::Trace(t)),
            None => Err(IngestError::violation(
                None,
                "trace stream message carries no frame",
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct AggregateHeader {
    agent_id: String,
    capture_time: i64,
}

#[derive(Debug)]
struct GroupBuilder {
    overall: Aggregate,
    transactions: Vec<TransactionFragment>,
}

/// In-progress aggregate stream.
#[derive(Debug, Default)]
pub struct AggregateSession {
    header: Option<AggregateHeader>,
    shared_query_texts: Vec<SharedQueryText>,
    groups: HashMap<String, GroupBuilder>,
}

impl AggregateSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agent id from the header, once one has arrived.
    pub fn agent_id(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.agent_id.as_str())
    }

    /// Decode and apply a raw wire message.
    pub fn apply_message(self, message: AggregateStreamMessage) -> Result<Self, IngestError> {
        match AggregateFrame::try_from(message) {
            Ok(frame) => self.apply(frame),
            Err(_) => Err(IngestError::violation(
                self.agent_id(),
                "aggregate stream message carries no frame",
            )),
        }
    }

    pub fn apply(mut self, frame: AggregateFrame) -> Result<Self, IngestError> {
        match frame {
            AggregateFrame::Header {
                agent_id,
                capture_time,
            } => {
                self.header = Some(AggregateHeader {
                    agent_id,
                    capture_time,
                });
            }
            AggregateFrame::SharedQueryText(text) => self.shared_query_texts.push(text),
            AggregateFrame::OverallAggregate {
                transaction_type,
                aggregate,
            } => {
                // Redeclaring a type starts its group over.
                self.groups.insert(
                    transaction_type,
                    GroupBuilder {
                        overall: aggregate,
                        transactions: Vec::new(),
                    },
                );
            }
            AggregateFrame::TransactionAggregate {
                transaction_type,
                transaction_name,
                aggregate,
            } => match self.groups.get_mut(&transaction_type) {
                Some(group) => group.transactions.push(TransactionFragment {
                    transaction_name,
                    aggregate,
                }),
                None => {
                    return Err(IngestError::violation(
                        self.agent_id(),
                        format!(
                            "transaction aggregate {transaction_name:?} references undeclared \
                             transaction type {transaction_type:?}"
                        ),
                    ));
                }
            },
        }

        Ok(self)
    }

    /// Finish the session. Group order is unspecified.
    pub fn close(self) -> Result<AggregateBatch, IngestError> {
        let header = self
            .header
            .ok_or_else(|| IngestError::incomplete(None, "header"))?;

        let groups = self
            .groups
            .into_iter()
            .map(|(transaction_type, g)| AggregateGroup {
                transaction_type,
                overall: g.overall,
                transactions: g.transactions,
            })
            .collect();

        Ok(AggregateBatch {
            agent_id: header.agent_id,
            capture_time: header.capture_time,
            shared_query_texts: self.shared_query_texts,
            groups,
        })
    }
}

#[derive(Debug, Clone)]
struct TraceHeaderFrame {
    agent_id: String,
    trace_id: String,
}

/// In-progress trace stream.
#[derive(Debug, Default)]
pub struct TraceSession {
    header: Option<TraceHeaderFrame>,
    shared_query_texts: Vec<SharedQueryText>,
    trace: Option<Trace>,
}

impl TraceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.agent_id.as_str())
    }

    /// Trace id announced by the header, if any.
    pub(crate) fn trace_id(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.trace_id.as_str())
    }

    pub fn apply_message(self, message: TraceStreamMessage) -> Result<Self, IngestError> {
        match TraceFrame::try_from(message) {
            Ok(frame) => Ok(self.apply(frame)),
            Err(_) => Err(IngestError::violation(
                self.agent_id(),
                "trace stream message carries no frame",
            )),
        }
    }

    /// Trace frames cannot violate the protocol once decoded; a repeated
    /// header or trace replaces the earlier one.
    pub fn apply(mut self, frame: TraceFrame) -> Self {
        match frame {
            TraceFrame::Header { agent_id, trace_id } => {
                self.header = Some(TraceHeaderFrame { agent_id, trace_id });
            }
            TraceFrame::SharedQueryText(text) => self.shared_query_texts.push(text),
            TraceFrame::Trace(trace) => self.trace = Some(trace),
        }
        self
    }

    pub fn close(self) -> Result<TraceBatch, IngestError> {
        let header = self
            .header
            .ok_or_else(|| IngestError::incomplete(None, "header"))?;
        let trace = self
            .trace
            .ok_or_else(|| IngestError::incomplete(Some(&header.agent_id), "trace"))?;

        Ok(TraceBatch {
            agent_id: header.agent_id,
            trace,
            shared_query_texts: self.shared_query_texts,
        })
    }
}
