//! Dev-mode, non-fatal error surface.
//!
//! None of these ever unwind the engine itself: the engine stays in a
//! consistent state and never aborts the process. They exist so
//! collaborators and tests can observe conditions that would otherwise be
//! silent dev-mode warnings. A panic raised from an effect or computed body
//! is deliberately *not* a variant here: it is a plain panic that propagates
//! out of `Effect::run` / `Computed::get`, caught only at the batch boundary
//! (see `batch.rs`).

use thiserror::Error;

/// Dev-mode diagnostics the engine can raise. Always non-fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReactiveError {
    /// A write was attempted against a read-only proxy. The write is a
    /// no-op; this only documents why nothing happened.
    #[error("write attempted against a read-only reactive value")]
    ReadOnlyWrite,

    /// `on_effect_cleanup` was called with no effect currently running.
    #[error("on_effect_cleanup called outside of a running effect")]
    MissingActiveEffectCleanup,

    /// `active_sub` was not restored to its prior value after a run
    /// completed. Indicates a collaborator bug (e.g. a scheduler that
    /// swallowed a panic without letting the unwind finish).
    #[error("internal invariant violated: {detail}")]
    InternalInvariantViolation { detail: String },
}
