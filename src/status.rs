//! Transaction status and its state-machine transition table (`spec.md`
//! §4.1).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    New,
    Submitted,
    InProgress,
    FailedInProgress,
    Failed,
    Successful,
    /// Not a stored state: returned by reads when the id is not known to
    /// the store (`spec.md` §3 invariant 5).
    Unknown,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::New => "NEW",
            TxStatus::Submitted => "SUBMITTED",
            TxStatus::InProgress => "IN_PROGRESS",
            TxStatus::FailedInProgress => "FAILED_IN_PROGRESS",
            TxStatus::Failed => "FAILED",
            TxStatus::Successful => "SUCCESSFUL",
            TxStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

impl TxStatus {
    /// `true` for `FAILED`, `SUCCESSFUL`, and `UNKNOWN` (`spec.md` §3
    /// invariant 5).
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Failed | TxStatus::Successful | TxStatus::Unknown)
    }

    /// `true` for the statuses the Work Finder offers to workers (`spec.md`
    /// §4.1 `runnable`).
    pub fn is_runnable_candidate(self) -> bool {
        matches!(self, TxStatus::Submitted | TxStatus::InProgress | TxStatus::FailedInProgress)
    }

    /// Validate `self -> new` against the transition table in `spec.md`
    /// §4.1. `set_status` is idempotent when `new == self`.
    pub fn validate_transition(self, new: TxStatus) -> Result<()> {
        if self == new {
            return Ok(());
        }
        let allowed = matches!(
            (self, new),
            (TxStatus::New, TxStatus::Submitted)
                | (TxStatus::New, TxStatus::FailedInProgress)
                | (TxStatus::Submitted, TxStatus::InProgress)
                | (TxStatus::Submitted, TxStatus::FailedInProgress)
                | (TxStatus::InProgress, TxStatus::InProgress)
                | (TxStatus::InProgress, TxStatus::Successful)
                | (TxStatus::InProgress, TxStatus::FailedInProgress)
                | (TxStatus::FailedInProgress, TxStatus::Failed)
        );
        if allowed {
            Ok(())
        } else {
            Err(FateError::InvalidTransition { from: self.to_string(), to: new.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_to_submitted_is_allowed() {
        assert!(TxStatus::New.validate_transition(TxStatus::Submitted).is_ok());
    }

    #[test]
    fn new_to_failed_in_progress_is_allowed_for_cancel() {
        assert!(TxStatus::New.validate_transition(TxStatus::FailedInProgress).is_ok());
    }

    #[test]
    fn submitted_to_in_progress_and_failed_in_progress_are_allowed() {
        assert!(TxStatus::Submitted.validate_transition(TxStatus::InProgress).is_ok());
        assert!(TxStatus::Submitted.validate_transition(TxStatus::FailedInProgress).is_ok());
    }

    #[test]
    fn in_progress_self_loop_is_allowed() {
        assert!(TxStatus::InProgress.validate_transition(TxStatus::InProgress).is_ok());
    }

    #[test]
    fn failed_in_progress_only_goes_to_failed() {
        assert!(TxStatus::FailedInProgress.validate_transition(TxStatus::Failed).is_ok());
        assert!(TxStatus::FailedInProgress.validate_transition(TxStatus::Successful).is_err());
    }

    #[test]
    fn terminal_states_reject_any_transition() {
        assert!(TxStatus::Failed.validate_transition(TxStatus::InProgress).is_err());
        assert!(TxStatus::Successful.validate_transition(TxStatus::InProgress).is_err());
    }

    #[test]
    fn set_status_is_idempotent_when_unchanged() {
        assert!(TxStatus::Successful.validate_transition(TxStatus::Successful).is_ok());
    }

    #[test]
    fn backwards_transitions_are_rejected() {
        assert!(TxStatus::InProgress.validate_transition(TxStatus::Submitted).is_err());
        assert!(TxStatus::InProgress.validate_transition(TxStatus::New).is_err());
    }

    #[test]
    fn terminal_classification() {
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Successful.is_terminal());
        assert!(TxStatus::Unknown.is_terminal());
        assert!(!TxStatus::InProgress.is_terminal());
    }

    #[test]
    fn runnable_candidate_classification() {
        assert!(TxStatus::Submitted.is_runnable_candidate());
        assert!(TxStatus::InProgress.is_runnable_candidate());
        assert!(TxStatus::FailedInProgress.is_runnable_candidate());
        assert!(!TxStatus::New.is_runnable_candidate());
        assert!(!TxStatus::Successful.is_runnable_candidate());
    }
}
