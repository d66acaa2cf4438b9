// Error taxonomy for the tournament core.
//
// Callers branch on the variant, never on message text. Sandbox faults
// are deliberately NOT part of this enum: they are absorbed at the
// round level (see engine::sandbox::Fault) and never propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any state change: missing tournament, round
    /// count below 1, fewer than two participants.
    #[error("validation: {0}")]
    Validation(String),

    /// Rejected before any state change: operation requires a
    /// tournament status it no longer has (e.g. start on non-pending).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller does not own the strategy it tried to bind.
    #[error("ownership: {0}")]
    Ownership(String),

    /// A persistence collaborator failed. Fatal to an in-progress run;
    /// the orchestrator captures the message and marks the tournament
    /// failed. No retries.
    #[error("persistence: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Orchestration-level invariant breach (e.g. a worker vanished
    /// without reporting a result). Treated like a fatal run error.
    #[error("internal: {0}")]
    Internal(String),
}
