//! The admin surface (`spec.md` §6 "Admin surface"): list, cancel,
//! wait-for-completion, delete, fetch-return, fetch-exception. Not part of
//! the core scheduling algorithm — an operator-facing veneer over
//! [`TxStore`], grounded on the teacher's pattern of a thin struct wrapping
//! a shared handle rather than free functions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{CANCEL_RETRY_ATTEMPTS, CANCEL_RETRY_BACKOFF};
use crate::error::{FateError, Result};
use crate::id::{OwnerId, TxId};
use crate::status::TxStatus;
use crate::store::TxStore;
use crate::tx::Key;

/// Operator-facing view over a [`TxStore`]. Cheap to clone; all state lives
/// in the shared store.
#[derive(Clone)]
pub struct Admin {
    store: Arc<TxStore>,
}

impl Admin {
    pub fn new(store: Arc<TxStore>) -> Self {
        Self { store }
    }

    pub fn list(&self, key_kind: Option<&str>) -> Vec<(TxId, Option<Key>)> {
        self.store.list(key_kind)
    }

    pub fn status(&self, id: TxId) -> TxStatus {
        self.store.read(id).status
    }

    /// `spec.md` §5 "cancel": succeeds only from `NEW`/`SUBMITTED`,
    /// atomically transitioning to `FAILED_IN_PROGRESS` under reservation.
    /// Retries reservation acquisition up to [`CANCEL_RETRY_ATTEMPTS`] times
    /// with [`CANCEL_RETRY_BACKOFF`] between attempts; `IN_PROGRESS`
    /// transactions cannot be cancelled and the caller must wait.
    pub fn cancel(&self, id: TxId) -> Result<bool> {
        for attempt in 0..CANCEL_RETRY_ATTEMPTS {
            let owner = OwnerId::new();
            match self.store.try_reserve(id, owner)? {
                Some(handle) => {
                    let cancelled = match handle.get_status(&self.store) {
                        TxStatus::New | TxStatus::Submitted => {
                            let mut info = handle.get_info(&self.store)?;
                            info.exception = Some("cancelled by user".to_string());
                            handle.set_info(&self.store, info)?;
                            handle.set_status(&self.store, TxStatus::FailedInProgress)?;
                            true
                        }
                        _ => false,
                    };
                    handle.unreserve(&self.store, Duration::ZERO)?;
                    return Ok(cancelled);
                }
                None => {
                    if attempt + 1 < CANCEL_RETRY_ATTEMPTS {
                        std::thread::sleep(CANCEL_RETRY_BACKOFF);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Block until `id` reaches a terminal status or `timeout` elapses.
    pub fn wait_for_completion(&self, id: TxId, timeout: Duration) -> TxStatus {
        let deadline = Instant::now() + timeout;
        self.store.wait_for_status_change(
            id,
            &[TxStatus::Successful, TxStatus::Failed, TxStatus::Unknown],
            deadline,
        )
    }

    /// Delete a transaction record outright. A single non-blocking
    /// reservation attempt: deleting a transaction a worker currently holds
    /// is refused rather than waited for, since admin delete is an
    /// out-of-band operator action, not part of the scheduling protocol.
    pub fn delete(&self, id: TxId) -> Result<()> {
        let owner = OwnerId::new();
        match self.store.try_reserve(id, owner)? {
            Some(handle) => handle.delete(&self.store),
            None => Err(FateError::Reservation(format!("{} is currently reserved", id))),
        }
    }

    pub fn fetch_return(&self, id: TxId) -> Result<Option<String>> {
        Ok(self.store.info(id)?.return_value)
    }

    pub fn fetch_exception(&self, id: TxId) -> Result<Option<String>> {
        Ok(self.store.info(id)?.exception)
    }
}
