use std::sync::atomic::{AtomicU64, Ordering};

use super::{BatchKind, MAX_BATCH_KIND};

/// Lock-free per-BatchKind commit counters.
///
/// `snapshot()` reads and resets every counter, so the periodic stats task
/// logs per-interval counts.
pub struct IngestStats {
    committed: [AtomicU64; MAX_BATCH_KIND + 1],
    failed: [AtomicU64; MAX_BATCH_KIND + 1],
}

/// Counts for one batch kind since the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCounts {
    pub kind: BatchKind,
    pub committed: u64,
    pub failed: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            committed: std::array::from_fn(|_| AtomicU64::new(0)),
            failed: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn record_committed(&self, kind: BatchKind) {
        if let Some(counter) = self.committed.get(kind as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failed(&self, kind: BatchKind) {
        if let Some(counter) = self.failed.get(kind as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and reset all counters, returning only kinds that saw traffic.
    pub fn snapshot(&self) -> Vec<KindCounts> {
        let mut result = Vec::new();

        for i in 0..=MAX_BATCH_KIND {
            let committed = self.committed[i].swap(0, Ordering::Relaxed);
            let failed = self.failed[i].swap(0, Ordering::Relaxed);
            if committed == 0 && failed == 0 {
                continue;
            }
            if let Some(kind) = BatchKind::from_u8(i as u8) {
                result.push(KindCounts {
                    kind,
                    committed,
                    failed,
                });
            }
        }

        result
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = IngestStats::new();
        stats.record_committed(BatchKind::Aggregates);
        stats.record_committed(BatchKind::Aggregates);
        stats.record_failed(BatchKind::Gauges);

        let snap = stats.snapshot();
        assert_eq!(snap.len(), 2);

        let aggregates = snap.iter().find(|c| c.kind == BatchKind::Aggregates);
        assert_eq!(aggregates.map(|c| (c.committed, c.failed)), Some((2, 0)));

        let gauges = snap.iter().find(|c| c.kind == BatchKind::Gauges);
        assert_eq!(gauges.map(|c| (c.committed, c.failed)), Some((0, 1)));
    }

    #[test]
    fn test_snapshot_resets_counters() {
        let stats = IngestStats::new();
        stats.record_committed(BatchKind::Trace);

        assert_eq!(stats.snapshot().len(), 1);
        assert!(stats.snapshot().is_empty());
    }
}
