//! The Work Finder (`spec.md` §4.3, component C3): a single dedicated
//! thread that discovers runnable transactions and hands them to workers
//! over a [`Rendezvous`]. Grounded on the teacher's dedicated-worker-thread
//! shape (`engines::granite::wal`'s `granite_worker_thread`), adapted from
//! a write-batching loop to a scan-and-offer loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::rendezvous::Rendezvous;
use crate::store::TxStore;

/// Bounded wait per offer attempt (`spec.md` §4.3 "~100 ms per attempt").
const OFFER_TIMEOUT: Duration = Duration::from_millis(100);

pub struct WorkFinder {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WorkFinder {
    pub fn spawn(store: Arc<TxStore>, rendezvous: Arc<Rendezvous>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();

        let handle = std::thread::spawn(move || {
            while !stop_clone.load(Ordering::Relaxed) {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    store.runnable(&stop_clone, |id| {
                        // Keep re-offering the same id until a worker
                        // accepts or the stop signal fires.
                        while !rendezvous.offer(id, OFFER_TIMEOUT) {
                            if stop_clone.load(Ordering::Relaxed) {
                                break;
                            }
                        }
                    });
                }));
                if let Err(panic) = result {
                    warn!("work finder scan panicked, retrying: {:?}", panic_message(&panic));
                }
            }
        });

        Self { stop, handle: Some(handle) }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

impl Drop for WorkFinder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::InstanceType;
    use crate::status::TxStatus;
    use std::time::Instant;

    #[test]
    fn finder_offers_a_submitted_transaction_to_a_waiting_worker() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TxStore::open(dir.path()).unwrap());
        let id = store.create(InstanceType::User).unwrap();
        let owner = crate::id::OwnerId::new();
        {
            let handle = store.try_reserve(id, owner).unwrap().unwrap();
            handle.set_status(&store, TxStatus::Submitted).unwrap();
            handle.unreserve(&store, Duration::ZERO).unwrap();
        }

        let rendezvous = Arc::new(Rendezvous::new());
        let finder = WorkFinder::spawn(store, rendezvous.clone());

        let start = Instant::now();
        let accepted = loop {
            if let Some(accepted) = rendezvous.accept(Duration::from_millis(200)) {
                break Some(accepted);
            }
            if start.elapsed() > Duration::from_secs(2) {
                break None;
            }
        };

        assert_eq!(accepted, Some(id));
        drop(finder);
    }

    #[test]
    fn drop_joins_the_finder_thread() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TxStore::open(dir.path()).unwrap());
        let rendezvous = Arc::new(Rendezvous::new());
        let start = Instant::now();
        let finder = WorkFinder::spawn(store, rendezvous);
        drop(finder);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
