//! A rendezvous hand-off: the producer's `offer` only returns `true` once
//! a consumer has actually accepted the value (`spec.md` §4.3 "the transfer
//! completes only when a worker actually accepts it"). `std::sync::mpsc`'s
//! zero-capacity `sync_channel` is the usual way to express this in Rust,
//! but its `send` has no timeout, and `spec.md` requires a bounded wait so
//! the stop signal stays responsive. Built instead on the teacher's
//! `Condvar` + `Mutex` wait-with-timeout idiom (`engines::granite::wal`'s
//! `FsyncState`), which supports a timed offer on both ends.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::id::TxId;

#[derive(Default)]
struct Slot {
    value: Option<TxId>,
}

/// Single-slot rendezvous channel between one Work Finder and many workers.
pub struct Rendezvous {
    slot: Mutex<Slot>,
    offered: Condvar,
    taken: Condvar,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self { slot: Mutex::new(Slot::default()), offered: Condvar::new(), taken: Condvar::new() }
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `id` for up to `timeout`. Returns `true` if a worker accepted
    /// it within the window, `false` if the offer was withdrawn (the
    /// caller should retry with the same id, per `spec.md` §4.3).
    pub fn offer(&self, id: TxId, timeout: Duration) -> bool {
        let mut slot = self.slot.lock().unwrap();
        debug_assert!(slot.value.is_none(), "work finder is single-producer");
        slot.value = Some(id);
        self.offered.notify_one();

        let deadline = Instant::now() + timeout;
        loop {
            if slot.value.is_none() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                slot.value = None;
                return false;
            }
            let (guard, result) = self.taken.wait_timeout(slot, remaining).unwrap();
            slot = guard;
            if result.timed_out() && slot.value.is_some() {
                slot.value = None;
                return false;
            }
        }
    }

    /// Wait up to `timeout` for an offer. Returns `None` on timeout, in
    /// which case the worker should recheck its stop flag and retry.
    pub fn accept(&self, timeout: Duration) -> Option<TxId> {
        let mut slot = self.slot.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = slot.value.take() {
                self.taken.notify_one();
                return Some(id);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self.offered.wait_timeout(slot, remaining).unwrap();
            slot = guard;
        }
    }

    /// Current idle count sample for the supervisor's saturation heuristic
    /// (`spec.md` §4.5): `1` if no offer is pending and at least one worker
    /// is plausibly parked in `accept`, `0` otherwise. This crate tracks it
    /// more directly via [`crate::pool::WorkerPool::idle_worker_count`];
    /// this helper exists for tests exercising the primitive in isolation.
    pub fn has_pending_offer(&self) -> bool {
        self.slot.lock().unwrap().value.is_some()
    }
}
