//! The `Tx` data model (`spec.md` §3).

use serde::{Deserialize, Serialize};

use crate::id::OwnerId;
use crate::op::FateOp;

/// Business-level deduplication tag. `spec.md` §3: "a business-level
/// deduplication tag (kind + payload)".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub kind: String,
    pub payload: String,
}

impl Key {
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { kind: kind.into(), payload: payload.into() }
    }
}

/// The small keyed store attached to each transaction (`spec.md` §3
/// `info`): the declared operation kind, the auto-clean flag, the last
/// exception, an optional human-readable return value, and age-off hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Info {
    pub op: Option<FateOp>,
    pub auto_clean: bool,
    pub exception: Option<String>,
    pub return_value: Option<String>,
    /// Unix-epoch milliseconds after which a terminal, non-autoclean
    /// transaction is eligible for operator age-off.
    pub age_off_after_millis: Option<u64>,
}

/// An exclusive lease on a transaction, bound to an owner's liveness
/// (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Reservation {
    pub owner: OwnerId,
    pub acquired_at_millis: u64,
}
