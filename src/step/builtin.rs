//! A worked example operation: `AllocateId -> WriteRecord -> [Publish] ->
//! done`. See `SPEC_FULL.md` §11 for why this exists: the Step protocol
//! needs at least one concrete chain to be testable against the scenarios
//! in `spec.md` §8, but business logic for real operations (clone table,
//! split, ...) is explicitly out of scope.

use serde::{Deserialize, Serialize};

use super::{Step, StepPayload};
use crate::env::Env;
use crate::error::StepError;
use crate::id::TxId;

/// Allocates (idempotently) a numeric id for `name` in the table-mapping
/// registry. Always chains to [`WriteRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateId {
    pub name: String,
}

impl AllocateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Deterministic id derived from the name, so `call` allocates the same
    /// id on every replay without needing its own persisted counter.
    fn derived_id(&self) -> u64 {
        let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.name.as_bytes() {
            acc ^= *byte as u64;
            acc = acc.wrapping_mul(0x0000_0100_0000_01B3);
        }
        acc
    }
}

impl Step for AllocateId {
    fn name(&self) -> &'static str {
        "allocate_id"
    }

    fn ready(&self, _id: TxId, env: &dyn Env) -> Result<u64, StepError> {
        Ok(env.poll_defer(&self.name))
    }

    fn call(&self, _id: TxId, env: &dyn Env) -> Result<Option<StepPayload>, StepError> {
        if env.take_should_fail(&self.name) {
            return Err(StepError::unexpected(format!("allocate_id failed for '{}'", self.name)));
        }
        let allocated_id = self.derived_id();
        env.register_name(&self.name, allocated_id).map_err(StepError::acceptable)?;
        env.record_call(&self.name);
        Ok(Some(StepPayload::WriteRecord(WriteRecord {
            name: self.name.clone(),
            allocated_id,
            terminal: false,
        })))
    }

    fn undo(&self, _id: TxId, env: &dyn Env) {
        env.unregister_name(&self.name);
        env.record_undo(&self.name);
    }
}

/// Writes the allocated record. If `terminal`, the transaction completes
/// here (used by the two-step happy-path scenario); otherwise chains to
/// [`Publish`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRecord {
    pub name: String,
    pub allocated_id: u64,
    pub terminal: bool,
}

impl Step for WriteRecord {
    fn name(&self) -> &'static str {
        "write_record"
    }

    fn ready(&self, _id: TxId, env: &dyn Env) -> Result<u64, StepError> {
        Ok(env.poll_defer(&self.name))
    }

    fn call(&self, _id: TxId, env: &dyn Env) -> Result<Option<StepPayload>, StepError> {
        if env.take_should_fail(&self.name) {
            return Err(StepError::unexpected(format!("write_record failed for '{}'", self.name)));
        }
        // Re-assert the registration; tolerates replay after a crash
        // between AllocateId's push and this call.
        env.register_name(&self.name, self.allocated_id).map_err(StepError::acceptable)?;
        env.record_call(&self.name);
        if self.terminal {
            Ok(None)
        } else {
            Ok(Some(StepPayload::Publish(Publish { name: self.name.clone() })))
        }
    }

    fn undo(&self, _id: TxId, env: &dyn Env) {
        env.unregister_name(&self.name);
        env.record_undo(&self.name);
    }
}

/// Terminal step: marks the record published. Never chains further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publish {
    pub name: String,
}

impl Step for Publish {
    fn name(&self) -> &'static str {
        "publish"
    }

    fn ready(&self, _id: TxId, env: &dyn Env) -> Result<u64, StepError> {
        Ok(env.poll_defer(&self.name))
    }

    fn call(&self, _id: TxId, env: &dyn Env) -> Result<Option<StepPayload>, StepError> {
        if env.take_should_fail(&self.name) {
            return Err(StepError::unexpected(format!("publish failed for '{}'", self.name)));
        }
        env.record_call(&self.name);
        Ok(None)
    }

    fn undo(&self, _id: TxId, env: &dyn Env) {
        // Publish has no independent side effect to reverse beyond what
        // WriteRecord already owns; record the undo for completeness
        // assertions only.
        env.record_undo(&self.name);
    }
}
