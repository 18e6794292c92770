//! Single-shot submissions from agents that predate the streaming RPCs,
//! normalized into the batches the streaming path produces.

use super::{AggregateBatch, AggregateGroup, IngestError, TraceBatch, TransactionFragment};
use crate::wire::{OldAggregateMessage, OldTraceMessage, SharedQueryText};

/// Convert a legacy aggregate submission.
///
/// Agents older still send bare strings in `old_shared_query_text`; when that
/// list is non-empty it wins and each string becomes a full, untruncated text.
pub fn aggregate_batch(message: OldAggregateMessage) -> AggregateBatch {
    let shared_query_texts = if message.old_shared_query_text.is_empty() {
        message.shared_query_text
    } else {
        message
            .old_shared_query_text
            .into_iter()
            .map(|full_text| SharedQueryText {
                full_text,
                ..Default::default()
            })
            .collect()
    };

    let groups = message
        .aggregates_by_type
        .into_iter()
        .map(|by_type| AggregateGroup {
            transaction_type: by_type.transaction_type,
            overall: by_type.overall_aggregate.unwrap_or_default(),
            transactions: by_type
                .transaction_aggregate
                .into_iter()
                .map(|t| TransactionFragment {
                    transaction_name: t.transaction_name,
                    aggregate: t.aggregate.unwrap_or_default(),
                })
                .collect(),
        })
        .collect();

    AggregateBatch {
        agent_id: message.agent_id,
        capture_time: message.capture_time,
        shared_query_texts,
        groups,
    }
}

/// Convert a legacy trace submission. The trace keeps its embedded texts.
pub fn trace_batch(message: OldTraceMessage) -> Result<TraceBatch, IngestError> {
    let trace = message
        .trace
        .ok_or_else(|| IngestError::incomplete(Some(&message.agent_id), "trace"))?;

    Ok(TraceBatch {
        agent_id: message.agent_id,
        trace,
        shared_query_texts: Vec::new(),
    })
}

/// Normalize an agent-rollup id: spaces around `/` are dropped, then the
/// result is trimmed. Blank ids mean the agent has no rollup.
pub fn normalize_rollup_id(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.split('/').collect();
    let last = parts.len() - 1;

    let mut normalized = String::with_capacity(raw.len());
    for (i, part) in parts.into_iter().enumerate() {
        let mut part = part;
        if i > 0 {
            normalized.push('/');
            part = part.trim_start_matches(' ');
        }
        if i < last {
            part = part.trim_end_matches(' ');
        }
        normalized.push_str(part);
    }

    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Rollup ids from the root down to `rollup_id` itself:
/// `"a/b/c"` yields `["a", "a/b", "a/b/c"]`.
pub fn rollup_chain(rollup_id: &str) -> Vec<String> {
    rollup_id
        .match_indices('/')
        .map(|(i, _)| rollup_id[..i].to_string())
        .chain(std::iter::once(rollup_id.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Aggregate, OldAggregatesByType, OldTransactionAggregate, Trace};

    #[test]
    fn test_normalize_table() {
        let cases = [
            ("a / b", Some("a/b")),
            ("a/ b", Some("a/b")),
            ("a /b", Some("a/b")),
            ("  a  /  b  ", Some("a/b")),
            ("a//b", Some("a//b")),
            ("a / / b", Some("a//b")),
            ("a b / c d", Some("a b/c d")),
            ("\ta/b\n", Some("a/b")),
            ("plain", Some("plain")),
            ("/", Some("/")),
            ("", None),
            ("   ", None),
        ];

        for (input, expected) in cases {
            assert_eq!(
                normalize_rollup_id(input).as_deref(),
                expected,
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = ["a / b", " x/ y /z ", "a//b", "one", " / ", "p / q / r"];
        for input in inputs {
            let once = normalize_rollup_id(input);
            let twice = once.as_deref().and_then(normalize_rollup_id);
            assert_eq!(once, twice, "input {input:?}");
        }
    }

    #[test]
    fn test_rollup_chain() {
        assert_eq!(rollup_chain("a"), vec!["a"]);
        assert_eq!(rollup_chain("a/b/c"), vec!["a", "a/b", "a/b/c"]);
    }

    #[test]
    fn test_old_texts_take_precedence() {
        let batch = aggregate_batch(OldAggregateMessage {
            agent_id: "a1".to_string(),
            capture_time: 5,
            aggregates_by_type: vec![],
            shared_query_text: vec![SharedQueryText {
                full_text: "ignored".to_string(),
                ..Default::default()
            }],
            old_shared_query_text: vec!["select 1".to_string(), "select 2".to_string()],
        });

        assert_eq!(batch.shared_query_texts.len(), 2);
        assert_eq!(batch.shared_query_texts[0].full_text, "select 1");
        assert!(batch.shared_query_texts[0].truncated_text.is_empty());
        assert!(batch.shared_query_texts[1].full_text_sha1.is_empty());
    }

    #[test]
    fn test_modern_texts_used_when_no_old_texts() {
        let modern = SharedQueryText {
            truncated_text: "select ...".to_string(),
            full_text_sha1: "abc".to_string(),
            ..Default::default()
        };
        let batch = aggregate_batch(OldAggregateMessage {
            agent_id: "a1".to_string(),
            shared_query_text: vec![modern.clone()],
            ..Default::default()
        });
        assert_eq!(batch.shared_query_texts, vec![modern]);
    }

    #[test]
    fn test_groups_preserve_shape() {
        let batch = aggregate_batch(OldAggregateMessage {
            agent_id: "a1".to_string(),
            capture_time: 60_000,
            aggregates_by_type: vec![OldAggregatesByType {
                transaction_type: "Web".to_string(),
                overall_aggregate: Some(Aggregate {
                    transaction_count: 3,
                    ..Default::default()
                }),
                transaction_aggregate: vec![OldTransactionAggregate {
                    transaction_name: "/login".to_string(),
                    aggregate: None,
                }],
            }],
            ..Default::default()
        });

        assert_eq!(batch.groups.len(), 1);
        assert_eq!(batch.groups[0].overall.transaction_count, 3);
        assert_eq!(batch.groups[0].transactions[0].transaction_name, "/login");
    }

    #[test]
    fn test_trace_batch() {
        let trace = Trace {
            id: "t1".to_string(),
            shared_query_text: vec![SharedQueryText::default()],
            ..Default::default()
        };
        let batch = trace_batch(OldTraceMessage {
            agent_id: "a1".to_string(),
            trace: Some(trace.clone()),
        })
        .unwrap();
        assert_eq!(batch.trace, trace);
        assert!(batch.shared_query_texts.is_empty());

        let err = trace_batch(OldTraceMessage {
            agent_id: "a1".to_string(),
            trace: None,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            IngestError::IncompleteStream {
                missing: "trace",
                ..
            }
        ));
        assert_eq!(err.agent_id(), Some("a1"));
    }
}
