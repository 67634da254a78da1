//! The Step Protocol (`spec.md` §4.6, component C6).
//!
//! Every operation decomposes into a stack of steps. `spec.md` §9's design
//! note prescribes the serialization strategy: "each step is a tagged
//! variant with an explicit, versioned payload serializable to bytes".
//! [`StepPayload`] is that tagged variant, grounded on the teacher's
//! `LogOperation` (`src/engines/granite/log.rs`), a closed, serde-derived
//! enum of operation payloads persisted alongside a sequence number.

mod builtin;

pub use builtin::{AllocateId, Publish, WriteRecord};

use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::error::StepError;
use crate::id::TxId;

/// Maximum step-stack depth (`spec.md` §4.6 "stack depth cap").
pub const MAX_STACK_DEPTH: usize = 64;

/// The contract every operation implements (`spec.md` §4.6).
pub trait Step {
    /// Diagnostic label.
    fn name(&self) -> &'static str;

    /// Side-effect-free precondition check. `0` means proceed immediately;
    /// a positive value asks the FTE to re-offer the transaction after that
    /// many milliseconds. Must be safe to call any number of times.
    fn ready(&self, id: TxId, env: &dyn Env) -> Result<u64, StepError>;

    /// Perform the step's durable work and return the successor step, or
    /// `None` to indicate transaction completion. Must be idempotent with
    /// respect to repeated invocation after a crash.
    fn call(&self, id: TxId, env: &dyn Env) -> Result<Option<StepPayload>, StepError>;

    /// Reverse a successful `call` of the same step. Must tolerate partial
    /// prior completion and repeated invocation.
    fn undo(&self, id: TxId, env: &dyn Env);
}

/// The closed, serializable set of step payloads this crate ships. A real
/// deployment's operations (clone table, split, merge, ...) are out of
/// scope (`spec.md` §1); these three are the worked example the Step
/// protocol needs to be testable end to end (`SPEC_FULL.md` §11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepPayload {
    AllocateId(AllocateId),
    WriteRecord(WriteRecord),
    Publish(Publish),
}

impl Step for StepPayload {
    fn name(&self) -> &'static str {
        match self {
            StepPayload::AllocateId(s) => s.name(),
            StepPayload::WriteRecord(s) => s.name(),
            StepPayload::Publish(s) => s.name(),
        }
    }

    fn ready(&self, id: TxId, env: &dyn Env) -> Result<u64, StepError> {
        match self {
            StepPayload::AllocateId(s) => s.ready(id, env),
            StepPayload::WriteRecord(s) => s.ready(id, env),
            StepPayload::Publish(s) => s.ready(id, env),
        }
    }

    fn call(&self, id: TxId, env: &dyn Env) -> Result<Option<StepPayload>, StepError> {
        match self {
            StepPayload::AllocateId(s) => s.call(id, env),
            StepPayload::WriteRecord(s) => s.call(id, env),
            StepPayload::Publish(s) => s.call(id, env),
        }
    }

    fn undo(&self, id: TxId, env: &dyn Env) {
        match self {
            StepPayload::AllocateId(s) => s.undo(id, env),
            StepPayload::WriteRecord(s) => s.undo(id, env),
            StepPayload::Publish(s) => s.undo(id, env),
        }
    }
}
