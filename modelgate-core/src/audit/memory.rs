//! In-memory audit log.

use parking_lot::RwLock;
use tracing::debug;

use super::{AuditAck, AuditEntry, AuditError, AuditSink};

/// Process-lifetime audit log.
///
/// Appends take the write lock briefly; reports clone under the read lock, so
/// concurrent readers never block one another.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of recorded costs.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.entries.read().iter().map(|e| e.cost).sum()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<AuditAck, AuditError> {
        let mut entries = self.entries.write();
        let sequence = entries.len() as u64;
        debug!(
            request_id = %entry.request_id,
            use_case = %entry.use_case,
            outcome = entry.outcome.tag(),
            sequence,
            "Audit entry recorded"
        );
        entries.push(entry);
        Ok(AuditAck { sequence })
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.entries.read().clone())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(limit);
        Ok(entries[skip..].to_vec())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditOutcome;
    use crate::audit::tests::entry;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_record_assigns_sequence() {
        let log = MemoryAuditLog::new();
        let a = log
            .record(entry(AuditOutcome::Accepted, 0.001, Some(0.9)))
            .await
            .unwrap();
        let b = log
            .record(entry(AuditOutcome::Cancelled, 0.0, None))
            .await
            .unwrap();
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_in_insertion_order() {
        let log = MemoryAuditLog::new();
        let first = entry(AuditOutcome::Accepted, 0.001, None);
        let second = entry(AuditOutcome::Cancelled, 0.0, None);
        log.record(first.clone()).await.unwrap();
        log.record(second.clone()).await.unwrap();

        let entries = log.entries().await.unwrap();
        assert_eq!(entries[0].request_id, first.request_id);
        assert_eq!(entries[1].request_id, second.request_id);
    }

    #[tokio::test]
    async fn test_recent_returns_tail() {
        let log = MemoryAuditLog::new();
        for _ in 0..5 {
            log.record(entry(AuditOutcome::Accepted, 0.001, None))
                .await
                .unwrap();
        }
        let all = log.entries().await.unwrap();
        let recent = log.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, all[3].request_id);
        assert_eq!(recent[1].request_id, all[4].request_id);
        assert_eq!(log.recent(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_summary_and_total_cost() {
        let log = MemoryAuditLog::new();
        log.record(entry(AuditOutcome::Accepted, 0.25, Some(1.0)))
            .await
            .unwrap();
        log.record(entry(AuditOutcome::Accepted, 0.75, Some(0.5)))
            .await
            .unwrap();
        let summary = log.summary().await.unwrap();
        assert_eq!(summary.accepted, 2);
        assert!((summary.total_cost - 1.0).abs() < 1e-12);
        assert!((log.total_cost() - 1.0).abs() < 1e-12);
        assert_eq!(summary.average_confidence, Some(0.75));
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let log = Arc::new(MemoryAuditLog::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                log.record(entry(AuditOutcome::Accepted, 0.0, None))
                    .await
                    .unwrap()
                    .sequence
            }));
        }
        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (0..32).collect::<Vec<u64>>());
        assert_eq!(log.len(), 32);
    }
}
