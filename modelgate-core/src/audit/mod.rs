//! Append-only audit trail.
//!
//! One [`AuditEntry`] is written per processed request, whatever the terminal
//! state. Entries hold tokenized text only; the audit path never talks to the
//! vault, so an original sensitive value cannot reach a sink.
//!
//! [`AuditSink`] is the storage seam. [`MemoryAuditLog`] keeps entries for the
//! process lifetime; a durable sink can implement the same contract.

mod memory;

pub use memory::MemoryAuditLog;

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::Usage;
use crate::gate::ReviewReason;
use crate::gateway::PipelineState;
use crate::router::RoutingReason;
use crate::validator::SchemaViolation;

// ============================================================================
// Entries
// ============================================================================

/// How a request ended, as recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Accepted,
    NeedsReview { reason: ReviewReason },
    /// `kind` is the error's `error_type_name()`.
    Failed { kind: String },
    Cancelled,
}

impl AuditOutcome {
    /// Stable tag for reports and metrics.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::NeedsReview { .. } => "needs_review",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Validation result as recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditValidation {
    Valid,
    Invalid { violations: Vec<SchemaViolation> },
    /// The pipeline stopped before validation.
    NotReached,
}

/// Immutable record of one processed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub request_id: Uuid,
    pub use_case: String,
    /// Input as forwarded to the model.
    pub tokenized_input: String,
    /// Distinct tokens in the input.
    pub pii_tokens: usize,
    /// Model of the last attempt, if routing succeeded.
    pub model_used: Option<String>,
    pub routing_reason: Option<RoutingReason>,
    pub stripped_params: Vec<String>,
    /// Backend calls made (0, 1 or 2).
    pub attempts: u8,
    pub validation: AuditValidation,
    pub outcome: AuditOutcome,
    pub confidence: Option<f64>,
    pub usage: Usage,
    pub cost: f64,
    /// Wall time of the whole pipeline.
    pub latency_ms: u64,
    /// State trace up to and including `Audited`.
    pub states: Vec<PipelineState>,
    pub timestamp: DateTime<Utc>,
}

/// Receipt for a recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditAck {
    /// Zero-based insertion position.
    pub sequence: u64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not persist or read entries.
    #[error("audit storage error: {details}")]
    Storage { details: String },

    #[error("audit export failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Sink
// ============================================================================

/// Append-only storage for audit entries.
///
/// An entry acknowledged by `record` must never be lost or altered.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<AuditAck, AuditError>;

    /// All entries in insertion order.
    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError>;

    /// The last `limit` entries, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self.entries().await?;
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        Ok(entries)
    }

    async fn summary(&self) -> Result<AuditSummary, AuditError> {
        Ok(AuditSummary::from_entries(&self.entries().await?))
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Reporting
// ============================================================================

/// Aggregates over a set of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditSummary {
    pub total: usize,
    pub accepted: usize,
    pub needs_review: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_cost: f64,
    pub average_cost: f64,
    /// Mean over entries that carry a confidence; `None` if none do.
    pub average_confidence: Option<f64>,
    pub average_latency_ms: f64,
}

impl AuditSummary {
    #[must_use]
    pub fn from_entries(entries: &[AuditEntry]) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };
        if entries.is_empty() {
            return summary;
        }

        let mut confidence_sum = 0.0;
        let mut confidence_count = 0usize;
        let mut latency_sum = 0u64;

        for entry in entries {
            match entry.outcome {
                AuditOutcome::Accepted => summary.accepted += 1,
                AuditOutcome::NeedsReview { .. } => summary.needs_review += 1,
                AuditOutcome::Failed { .. } => summary.failed += 1,
                AuditOutcome::Cancelled => summary.cancelled += 1,
            }
            summary.total_cost += entry.cost;
            latency_sum = latency_sum.saturating_add(entry.latency_ms);
            if let Some(c) = entry.confidence {
                confidence_sum += c;
                confidence_count += 1;
            }
        }

        let n = entries.len() as f64;
        summary.average_cost = summary.total_cost / n;
        summary.average_latency_ms = latency_sum as f64 / n;
        summary.average_confidence =
            (confidence_count > 0).then(|| confidence_sum / confidence_count as f64);
        summary
    }
}

/// Write entries as JSON lines. Returns the number written.
pub fn export_jsonl<W: Write>(entries: &[AuditEntry], mut writer: W) -> Result<usize, AuditError> {
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(entries.len())
}
