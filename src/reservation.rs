//! Dead-reservation sweep (`spec.md` §4.2, component C2). Grounded on the
//! teacher's background-thread pattern used by the Granite WAL worker:
//! a dedicated `std::thread`, a stop flag checked between sleeps, cadence
//! controlled by a `Duration` read from [`crate::config::FateConfig`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{FateConfig, RESERVATION_SWEEP_INITIAL_DELAY};
use crate::liveness::Liveness;
use crate::store::TxStore;

/// Owns the background thread that clears reservations whose owner is no
/// longer alive (`spec.md` §4.2 `delete_dead_reservations`). Only
/// reservations are cleared; the transaction's `status`/`stack` are left
/// untouched so a subsequent worker resumes exactly where the dead owner
/// left off.
pub struct ReservationSweeper {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ReservationSweeper {
    pub fn spawn(store: Arc<TxStore>, liveness: Arc<dyn Liveness>, config: Arc<FateConfig>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();

        let handle = std::thread::spawn(move || {
            sleep_respecting_stop(RESERVATION_SWEEP_INITIAL_DELAY, &stop_clone);
            while !stop_clone.load(Ordering::Relaxed) {
                let cleared = sweep_once(&store, liveness.as_ref());
                if cleared > 0 {
                    info!("dead-reservation sweep cleared {} reservation(s)", cleared);
                }
                sleep_respecting_stop(config.dead_res_cleanup_delay, &stop_clone);
            }
        });

        Self { stop, handle: Some(handle) }
    }
}

impl Drop for ReservationSweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sweep_once(store: &TxStore, liveness: &dyn Liveness) -> usize {
    let mut cleared = 0;
    for (id, owner) in store.reserved_ids() {
        if liveness.is_alive(owner) {
            continue;
        }
        match store.clear_reservation_if_owned_by(id, owner) {
            Ok(true) => cleared += 1,
            Ok(false) => {}
            Err(e) => warn!("dead-reservation sweep failed to clear {}: {}", id, e),
        }
    }
    cleared
}

fn sleep_respecting_stop(total: Duration, stop: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !stop.load(Ordering::Relaxed) {
        let nap = remaining.min(SLICE);
        std::thread::sleep(nap);
        remaining -= nap;
    }
}
