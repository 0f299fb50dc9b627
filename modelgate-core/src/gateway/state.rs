//! Pipeline state machine.
//!
//! Transitions:
//! - Received → Tokenized → Routed → Invoked → Validated → Gated → Audited
//! - Invoked → Routed (retry after a transient failure, at most once)
//! - Received | Tokenized | Invoked | Validated → Audited (failure exits)
//! - Audited → Done | Failed
//!
//! Every exit goes through `Audited`, so each request writes exactly one
//! audit entry.

use std::fmt;

use serde::Serialize;
use tracing::error;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Tokenized,
    Routed,
    Invoked,
    Validated,
    Gated,
    Audited,
    Done,
    Failed,
}

impl PipelineState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    #[must_use]
    pub fn can_transition_to(&self, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, to),
            (Received, Tokenized)
                | (Tokenized, Routed)
                | (Routed, Invoked)
                | (Invoked, Validated)
                | (Validated, Gated)
                | (Gated, Audited)
                // Retry
                | (Invoked, Routed)
                // Failure exits
                | (Received, Audited)
                | (Tokenized, Audited)
                | (Invoked, Audited)
                | (Validated, Audited)
                // Terminal
                | (Audited, Done)
                | (Audited, Failed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Tokenized => "tokenized",
            Self::Routed => "routed",
            Self::Invoked => "invoked",
            Self::Validated => "validated",
            Self::Gated => "gated",
            Self::Audited => "audited",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Maximum `Invoked → Routed` transitions per request.
pub const MAX_RETRIES: u8 = 1;

/// Checked record of the states one request has passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrace {
    states: Vec<PipelineState>,
    retries: u8,
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTrace {
    /// Starts in `Received`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: vec![PipelineState::Received],
            retries: 0,
        }
    }

    #[must_use]
    pub fn current(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Received)
    }

    #[must_use]
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// `Internal` if the transition is not allowed, or would be a second
    /// retry.
    pub fn advance(&mut self, next: PipelineState) -> Result<(), GatewayError> {
        let from = self.current();
        let is_retry = from == PipelineState::Invoked && next == PipelineState::Routed;
        if !from.can_transition_to(next) || (is_retry && self.retries >= MAX_RETRIES) {
            let err = GatewayError::internal();
            error!(
                from = %from,
                to = %next,
                error = %err,
                "Invalid pipeline transition"
            );
            return Err(err);
        }
        if is_retry {
            self.retries += 1;
        }
        self.states.push(next);
        Ok(())
    }

    #[must_use]
    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    #[must_use]
    pub fn into_states(self) -> Vec<PipelineState> {
        self.states
    }
}
