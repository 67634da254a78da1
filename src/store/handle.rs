//! [`ReservedHandle`]: the capability a reservation grants to mutate a
//! transaction (`spec.md` §4.1 "mutating a `Tx` requires holding its
//! reservation").

use std::time::Duration;

use crate::error::Result;
use crate::id::{OwnerId, TxId};
use crate::status::TxStatus;
use crate::step::{StepPayload, MAX_STACK_DEPTH};
use crate::tx::Info;

use super::TxStore;

/// Proof of an exclusive lease on a transaction, returned by
/// [`TxStore::try_reserve`] and [`TxStore::reserve`]. All mutating methods
/// take `&TxStore` explicitly rather than borrowing it, so a handle can
/// outlive the call that produced it without tying up a lifetime parameter.
///
/// [`TxStore::try_reserve`]: super::TxStore::try_reserve
/// [`TxStore::reserve`]: super::TxStore::reserve
pub struct ReservedHandle {
    id: TxId,
    owner: OwnerId,
}

impl ReservedHandle {
    pub(super) fn new(id: TxId, owner: OwnerId) -> Self {
        Self { id, owner }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn get_status(&self, store: &TxStore) -> TxStatus {
        store.read(self.id).status
    }

    /// Validate and apply a status transition (`spec.md` §4.1's table,
    /// enforced by [`TxStatus::validate_transition`]).
    ///
    /// [`TxStatus::validate_transition`]: crate::status::TxStatus::validate_transition
    pub fn set_status(&self, store: &TxStore, new: TxStatus) -> Result<()> {
        store.mutate_record(self.id, self.owner, |record| {
            record.status.validate_transition(new)?;
            record.status = new;
            Ok(())
        })
    }

    /// The step currently on top of the stack, if any.
    pub fn top(&self, store: &TxStore) -> Result<Option<StepPayload>> {
        store.with_record(self.id, |record| record.stack.last().cloned())
    }

    /// Current stack depth, checked against [`MAX_STACK_DEPTH`] before a
    /// worker pushes a successor step (`spec.md` §4.6 "stack depth cap").
    pub fn depth(&self, store: &TxStore) -> Result<usize> {
        store.with_record(self.id, |record| record.stack.len())
    }

    /// Push a new step. Returns an error rather than pushing past
    /// [`MAX_STACK_DEPTH`]; the caller (the worker) is responsible for
    /// treating that as a [`crate::error::StepError::StackOverflow`] and
    /// skipping undo of the step that was never pushed.
    pub fn push(&self, store: &TxStore, step: StepPayload) -> Result<()> {
        store.mutate_record(self.id, self.owner, |record| {
            if record.stack.len() >= MAX_STACK_DEPTH {
                return Err(crate::error::FateError::Reservation(
                    "step stack depth cap reached".into(),
                ));
            }
            record.stack.push(step);
            Ok(())
        })
    }

    /// Pop the top step, used by a worker walking the undo path
    /// (`spec.md` §4.6 "pop and undo until the stack is empty").
    pub fn pop(&self, store: &TxStore) -> Result<Option<StepPayload>> {
        let mut popped = None;
        store.mutate_record(self.id, self.owner, |record| {
            popped = record.stack.pop();
            Ok(())
        })?;
        Ok(popped)
    }

    /// Set the dedup key (`spec.md` §3 `key`). Used only by
    /// [`TxStore::seed`] right after creation; ordinary steps never touch
    /// it.
    pub fn set_key(&self, store: &TxStore, key: crate::tx::Key) -> Result<()> {
        store.mutate_record(self.id, self.owner, |record| {
            record.key = Some(key);
            Ok(())
        })
    }

    pub fn get_info(&self, store: &TxStore) -> Result<Info> {
        store.with_record(self.id, |record| record.info.clone())
    }

    pub fn set_info(&self, store: &TxStore, info: Info) -> Result<()> {
        store.mutate_record(self.id, self.owner, |record| {
            record.info = info;
            Ok(())
        })
    }

    /// Delete the transaction record entirely (`spec.md` §5 admin
    /// surface's `delete`, used on a completed, auto-clean transaction).
    pub fn delete(&self, store: &TxStore) -> Result<()> {
        store.delete_record(self.id, self.owner)
    }

    /// Release the reservation. `defer` postpones the next `runnable` offer
    /// of this id by that duration (`spec.md` §4.6 "ready returned a
    /// positive defer").
    pub fn unreserve(&self, store: &TxStore, defer: Duration) -> Result<()> {
        store.unreserve(self.id, self.owner, defer)
    }
}
