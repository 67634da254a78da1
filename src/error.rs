//! Error types for the fault-tolerant executor.
//!
//! Defines a unified error type for the transaction store, reservation
//! manager, and admin surface, plus the sum-typed [`StepError`] a [`Step`]
//! raises from `ready`/`call`/`undo`.
//!
//! [`Step`]: crate::step::Step

use std::fmt;
use std::io;

/// Unified error type for transaction-store and admin-surface operations.
#[derive(Debug)]
pub enum FateError {
    /// I/O error from the durable store.
    Io(io::Error),
    /// The durable store failed to encode or decode a record.
    Serialization(String),
    /// A caller requested a `status` transition not permitted by the state
    /// machine in `spec.md` §4.1.
    InvalidTransition { from: String, to: String },
    /// The transaction id is not known to the store.
    NotFound,
    /// `seed` was called twice with conflicting operation kinds.
    ConflictingSeed,
    /// The reservation could not be acquired or is held by another owner.
    Reservation(String),
}

impl fmt::Display for FateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FateError::Io(e) => write!(f, "{}", e),
            FateError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            FateError::InvalidTransition { from, to } => {
                write!(f, "invalid transition from {} to {}", from, to)
            }
            FateError::NotFound => write!(f, "transaction id not known to the store"),
            FateError::ConflictingSeed => {
                write!(f, "seed called with an operation kind that conflicts with the existing seed")
            }
            FateError::Reservation(msg) => write!(f, "reservation error: {}", msg),
        }
    }
}

impl std::error::Error for FateError {}

impl Clone for FateError {
    fn clone(&self) -> Self {
        match self {
            FateError::Io(e) => FateError::Io(io::Error::new(e.kind(), e.to_string())),
            FateError::Serialization(msg) => FateError::Serialization(msg.clone()),
            FateError::InvalidTransition { from, to } => FateError::InvalidTransition {
                from: from.clone(),
                to: to.clone(),
            },
            FateError::NotFound => FateError::NotFound,
            FateError::ConflictingSeed => FateError::ConflictingSeed,
            FateError::Reservation(msg) => FateError::Reservation(msg.clone()),
        }
    }
}

impl From<io::Error> for FateError {
    fn from(e: io::Error) -> Self {
        FateError::Io(e)
    }
}

impl From<bincode::Error> for FateError {
    fn from(e: bincode::Error) -> Self {
        FateError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for FateError {
    fn from(e: serde_json::Error) -> Self {
        FateError::Serialization(e.to_string())
    }
}

/// Result type alias for transaction-store and admin-surface operations.
pub type Result<T> = std::result::Result<T, FateError>;

/// The sum-typed result a [`Step`] raises from `ready`/`call`/`undo`.
///
/// This is the Rust expression of the design note in `spec.md` §9: the
/// original executor uses checked exceptions to distinguish "acceptable"
/// business-logic failures (e.g. "table already exists") from genuinely
/// unexpected ones; here that distinction is a tag the worker branches on
/// (`spec.md` §7).
///
/// [`Step`]: crate::step::Step
#[derive(Debug)]
pub enum StepError {
    /// Expected business-logic failure. Logged at info level; the exception
    /// text is recorded on the transaction and surfaced via the admin
    /// surface's `fetch-exception`.
    Acceptable { detail: String },
    /// Unexpected failure (step bug, external system failure). Logged at
    /// warn level, same status transition as `Acceptable`.
    Unexpected { cause: String },
    /// `push` would exceed the step-stack depth cap. The step that would
    /// have been pushed never ran, so it is never undone (`spec.md` §9 open
    /// question, resolved: skip undo only for steps never durably pushed).
    StackOverflow,
    /// The error was an I/O failure observed while the host process is
    /// shutting down. The worker suppresses the failure transition and
    /// blocks indefinitely so the transaction resumes on the next manager
    /// (`spec.md` §4.6 "Process-shutdown suppression").
    ShuttingDown,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Acceptable { detail } => write!(f, "{}", detail),
            StepError::Unexpected { cause } => write!(f, "{}", cause),
            StepError::StackOverflow => write!(f, "step stack depth exceeded"),
            StepError::ShuttingDown => write!(f, "suppressed: host process is shutting down"),
        }
    }
}

impl std::error::Error for StepError {}

impl StepError {
    /// Build an [`StepError::Acceptable`] from any displayable cause.
    pub fn acceptable(detail: impl fmt::Display) -> Self {
        StepError::Acceptable { detail: detail.to_string() }
    }

    /// Build an [`StepError::Unexpected`] from any displayable cause.
    pub fn unexpected(cause: impl fmt::Display) -> Self {
        StepError::Unexpected { cause: cause.to_string() }
    }

    /// `true` for the two variants that drive a `FAILED_IN_PROGRESS`
    /// transition (`spec.md` §7); `StackOverflow` also drives that
    /// transition but is handled separately because it skips undoing the
    /// overflowing step.
    pub fn is_failure(&self) -> bool {
        matches!(self, StepError::Acceptable { .. } | StepError::Unexpected { .. } | StepError::StackOverflow)
    }
}
