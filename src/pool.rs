//! The Worker Pool (`spec.md` §4.4, component C4) and the Step execute/undo
//! paths (`spec.md` §4.6). Grounded on the teacher's thread-per-worker WAL
//! pattern for the shape of a long-running `std::thread` loop with a stop
//! flag; the dispatch logic itself is this crate's own, since the teacher
//! has no analogous state machine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

use crate::env::Env;
use crate::error::StepError;
use crate::id::OwnerId;
use crate::rendezvous::Rendezvous;
use crate::status::TxStatus;
use crate::step::Step;
use crate::store::{ReservedHandle, TxStore};
use crate::tx::Info;

/// Worker poll timeout on the rendezvous channel (short, so a flagged
/// worker's stop check stays responsive, `spec.md` §4.4 step 1).
const ACCEPT_TIMEOUT: Duration = Duration::from_millis(200);

struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

/// A bounded pool of identical workers. Only [`crate::supervisor::PoolSupervisor`]
/// spawns or retires workers (`spec.md` §4.5 "the supervisor is the only
/// component that spawns or retires workers").
pub struct WorkerPool {
    store: Arc<TxStore>,
    env: Arc<dyn Env>,
    owner: OwnerId,
    rendezvous: Arc<Rendezvous>,
    workers: Mutex<Vec<Worker>>,
    idle_count: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(store: Arc<TxStore>, env: Arc<dyn Env>, owner: OwnerId, rendezvous: Arc<Rendezvous>) -> Self {
        Self { store, env, owner, rendezvous, workers: Mutex::new(Vec::new()), idle_count: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn running_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Sample of workers currently parked waiting for an offer (`spec.md`
    /// §4.5's idle-history ring input).
    pub fn idle_worker_count(&self) -> usize {
        self.idle_count.load(Ordering::Relaxed)
    }

    /// Spawn `n` additional workers.
    pub fn spawn_additional(&self, n: usize) {
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..n {
            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let store = self.store.clone();
            let env = self.env.clone();
            let owner = self.owner;
            let rendezvous = self.rendezvous.clone();
            let idle_count = self.idle_count.clone();

            let handle = std::thread::spawn(move || {
                worker_loop(stop_clone, store, env, owner, rendezvous, idle_count);
            });
            workers.push(Worker { stop, handle: Some(handle) });
        }
    }

    /// Set the stop flag on up to `n` not-yet-flagged workers (`spec.md`
    /// §4.5 "skip already-flagged ones"), then join and drop any worker
    /// whose thread has already exited.
    pub fn flag_for_shrink(&self, n: usize) {
        let mut workers = self.workers.lock().unwrap();
        let mut flagged = 0;
        for worker in workers.iter() {
            if flagged >= n {
                break;
            }
            if !worker.stop.swap(true, Ordering::Relaxed) {
                flagged += 1;
            }
        }
        self.reap(&mut workers);
    }

    /// Remove workers whose threads have finished (flagged and exited
    /// their current idle cycle).
    fn reap(&self, workers: &mut Vec<Worker>) {
        workers.retain_mut(|w| {
            if w.stop.load(Ordering::Relaxed) {
                if let Some(handle) = w.handle.take() {
                    if handle.is_finished() {
                        let _ = handle.join();
                        return false;
                    }
                    w.handle = Some(handle);
                }
            }
            true
        });
    }

    pub fn shutdown(&self) {
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.iter() {
            worker.stop.store(true, Ordering::Relaxed);
        }
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        workers.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    stop: Arc<AtomicBool>,
    store: Arc<TxStore>,
    env: Arc<dyn Env>,
    owner: OwnerId,
    rendezvous: Arc<Rendezvous>,
    idle_count: Arc<AtomicUsize>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }

        idle_count.fetch_add(1, Ordering::Relaxed);
        let accepted = rendezvous.accept(ACCEPT_TIMEOUT);
        idle_count.fetch_sub(1, Ordering::Relaxed);

        let id = match accepted {
            Some(id) => id,
            None => continue,
        };

        // A worker must not exit mid-transaction (`spec.md` §4.4): once we
        // accept an id, we run it to completion regardless of `stop`.
        let reserved = match store.try_reserve(id, owner) {
            Ok(Some(handle)) => handle,
            Ok(None) => continue,
            Err(e) => {
                warn!("try_reserve failed for {}: {}", id, e);
                continue;
            }
        };

        match drive_transaction(&store, env.as_ref(), &reserved) {
            Outcome::ReleaseNow => {
                if let Err(e) = reserved.unreserve(&store, Duration::ZERO) {
                    warn!("unreserve failed for {}: {}", id, e);
                }
            }
            Outcome::ReleaseDeferred(defer) => {
                if let Err(e) = reserved.unreserve(&store, defer) {
                    warn!("unreserve failed for {}: {}", id, e);
                }
            }
            Outcome::KeepReserved => {
                // Process-shutdown suppression: leave the reservation held.
                // It becomes reclaimable once this owner is next observed
                // dead by the reservation sweep (`spec.md` §4.6).
            }
        }
    }
}

enum Outcome {
    ReleaseNow,
    ReleaseDeferred(Duration),
    KeepReserved,
}

/// Dispatch by status (`spec.md` §4.4 step 4).
fn drive_transaction(store: &TxStore, env: &dyn Env, handle: &ReservedHandle) -> Outcome {
    match handle.get_status(store) {
        TxStatus::FailedInProgress => {
            run_undo_path(store, env, handle);
            Outcome::ReleaseNow
        }
        TxStatus::Submitted | TxStatus::InProgress => run_execute_path(store, env, handle),
        _ => Outcome::ReleaseNow,
    }
}

/// `spec.md` §4.4 step 4 undo path: pop and undo until the stack is empty,
/// then transition to `FAILED` and run cleanup.
fn run_undo_path(store: &TxStore, env: &dyn Env, handle: &ReservedHandle) {
    let id = handle.id();
    loop {
        let top = match handle.top(store) {
            Ok(top) => top,
            Err(e) => {
                warn!("failed to read stack top for {} during undo: {}", id, e);
                break;
            }
        };
        let Some(step) = top else { break };

        let result = catch_unwind(AssertUnwindSafe(|| step.undo(id, env)));
        if let Err(panic) = result {
            warn!("undo of step '{}' for {} panicked: {:?}", step.name(), id, panic_message(&panic));
        }

        if let Err(e) = handle.pop(store) {
            warn!("failed to pop stack for {} during undo: {}", id, e);
            break;
        }
    }

    if let Err(e) = handle.set_status(store, TxStatus::Failed) {
        warn!("failed to transition {} to FAILED: {}", id, e);
        return;
    }
    run_cleanup(store, handle);
}

/// `spec.md` §4.6 execute path.
fn run_execute_path(store: &TxStore, env: &dyn Env, handle: &ReservedHandle) -> Outcome {
    let id = handle.id();

    loop {
        let top = match handle.top(store) {
            Ok(Some(top)) => top,
            Ok(None) => {
                // An empty stack offered on the execute path is not
                // reachable per the data-model invariant that SUBMITTED
                // always carries one step; treat defensively as done.
                finish_success(store, handle);
                return Outcome::ReleaseNow;
            }
            Err(e) => {
                warn!("failed to read stack top for {}: {}", id, e);
                return Outcome::ReleaseNow;
            }
        };

        let defer = match top.ready(id, env) {
            Ok(defer) => defer,
            Err(e) => return handle_step_error(store, env, handle, e),
        };
        if defer > 0 {
            return Outcome::ReleaseDeferred(Duration::from_millis(defer));
        }

        if handle.get_status(store) == TxStatus::Submitted {
            if let Err(e) = handle.set_status(store, TxStatus::InProgress) {
                warn!("failed to transition {} to IN_PROGRESS: {}", id, e);
                return Outcome::ReleaseNow;
            }
        }

        match top.call(id, env) {
            Ok(Some(next)) => match handle.push(store, next) {
                Ok(()) => continue,
                Err(_) => return handle_step_error(store, env, handle, StepError::StackOverflow),
            },
            Ok(None) => {
                finish_success(store, handle);
                return Outcome::ReleaseNow;
            }
            Err(e) => return handle_step_error(store, env, handle, e),
        }
    }
}

fn handle_step_error(store: &TxStore, env: &dyn Env, handle: &ReservedHandle, error: StepError) -> Outcome {
    let id = handle.id();

    // Process-shutdown suppression (`spec.md` §4.6, §7): an I/O error
    // observed while the host is shutting down is not the step's fault.
    // Leave the reservation held rather than burning the transaction into
    // FAILED_IN_PROGRESS; it resumes once some manager is alive again.
    let shutting_down = matches!(error, StepError::ShuttingDown)
        || (matches!(error, StepError::Unexpected { .. }) && env.shutdown_in_progress());
    if shutting_down {
        info!("suppressing failure transition for {}: host process shutting down", id);
        return Outcome::KeepReserved;
    }

    match &error {
        StepError::Acceptable { detail } => info!("transaction {} failed (acceptable): {}", id, detail),
        StepError::Unexpected { cause } => warn!("transaction {} failed (unexpected): {}", id, cause),
        StepError::StackOverflow => warn!("transaction {} failed: step stack depth cap reached", id),
        StepError::ShuttingDown => unreachable!("handled above"),
    }

    if let Err(e) = handle.get_info(store).and_then(|mut info| {
        info.exception = Some(error.to_string());
        handle.set_info(store, info)
    }) {
        warn!("failed to record exception on {}: {}", id, e);
    }

    if let Err(e) = handle.set_status(store, TxStatus::FailedInProgress) {
        warn!("failed to transition {} to FAILED_IN_PROGRESS: {}", id, e);
    }

    Outcome::ReleaseNow
}

fn finish_success(store: &TxStore, handle: &ReservedHandle) {
    let id = handle.id();
    if let Err(e) = handle.set_status(store, TxStatus::Successful) {
        warn!("failed to transition {} to SUCCESSFUL: {}", id, e);
        return;
    }
    run_cleanup(store, handle);
}

/// `spec.md` §4.6 "Cleanup": delete on `auto_clean`, else pop every step,
/// leaving the header record for later inspection via the admin surface.
fn run_cleanup(store: &TxStore, handle: &ReservedHandle) {
    let id = handle.id();
    let info: Info = match handle.get_info(store) {
        Ok(info) => info,
        Err(e) => {
            warn!("failed to read info for {} during cleanup: {}", id, e);
            return;
        }
    };

    if info.auto_clean {
        if let Err(e) = handle.delete(store) {
            warn!("failed to delete {} during cleanup: {}", id, e);
        }
        return;
    }

    loop {
        match handle.pop(store) {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                warn!("failed to pop stack for {} during cleanup: {}", id, e);
                break;
            }
        }
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
