//! The `env` handle passed to every [`Step`](crate::step::Step) call.
//!
//! `spec.md` §6 describes `env` as an opaque handle exposing access to the
//! external state service, the table-mapping registry, and logging/metrics
//! sinks, and §9 calls for it to be an interface so tests can inject a mock
//! that records side effects. [`MockEnv`] is that mock; it also serves as
//! the crate's runnable-standalone default until an embedder wires in a
//! real coordination-service client.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// External collaborators a [`Step`](crate::step::Step) may touch while
/// executing `ready`/`call`/`undo`.
pub trait Env: Send + Sync {
    /// Register `name -> id` in the table-mapping registry. Idempotent:
    /// registering the same `(name, id)` pair twice succeeds; registering a
    /// different `id` under a name already bound to a different id is an
    /// acceptable business-logic conflict, surfaced to the step as an
    /// `Err(String)` the step turns into `StepError::Acceptable`.
    fn register_name(&self, name: &str, id: u64) -> Result<(), String>;

    /// Remove a name from the registry. Safe to call on a name that is not
    /// present (undo must tolerate partial prior completion, `spec.md`
    /// §4.6).
    fn unregister_name(&self, name: &str);

    fn lookup_id(&self, name: &str) -> Option<u64>;

    /// One-shot deferral schedule for a labeled precondition check
    /// (`spec.md` §4.6 `ready`). Returns the configured defer value once,
    /// then `0` on every subsequent call, modeling "not ready yet, then
    /// ready" (S2 in `spec.md` §8).
    fn poll_defer(&self, label: &str) -> u64;

    /// Test/ops hook: force the next `call` for `label` to fail. Returns
    /// `true` (and consumes the flag) if `label` was armed to fail.
    fn take_should_fail(&self, label: &str) -> bool;

    fn arm_failure(&self, label: &str);

    /// Queried by the worker's failure-transition logic (`spec.md` §4.6
    /// "Process-shutdown suppression").
    fn shutdown_in_progress(&self) -> bool;

    /// Record that `call` ran for `label`, for idempotency / call-count
    /// assertions in tests.
    fn record_call(&self, label: &str);

    /// Record that `undo` ran for `label`.
    fn record_undo(&self, label: &str);

    fn call_count(&self, label: &str) -> usize;

    fn undo_count(&self, label: &str) -> usize;
}

/// In-memory [`Env`] used by the crate's own tests and as the default
/// runnable-standalone environment. A real deployment supplies its own
/// [`Env`] backed by its coordination service and table-mapping registry.
#[derive(Default)]
pub struct MockEnv {
    names: Mutex<HashMap<String, u64>>,
    defers: Mutex<HashMap<String, u64>>,
    should_fail: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    undos: Mutex<HashMap<String, usize>>,
    shutdown: AtomicBool,
}

impl MockEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `label`'s next [`Env::poll_defer`] to return `ms`, then `0`
    /// thereafter.
    pub fn schedule_defer(&self, label: &str, ms: u64) {
        self.defers.lock().unwrap().insert(label.to_string(), ms);
    }

    pub fn set_shutting_down(&self, shutting_down: bool) {
        self.shutdown.store(shutting_down, Ordering::SeqCst);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names.lock().unwrap().contains_key(name)
    }
}

impl Env for MockEnv {
    fn register_name(&self, name: &str, id: u64) -> Result<(), String> {
        let mut names = self.names.lock().unwrap();
        match names.get(name) {
            Some(existing) if *existing != id => {
                Err(format!("name '{}' already registered to a different id", name))
            }
            _ => {
                names.insert(name.to_string(), id);
                Ok(())
            }
        }
    }

    fn unregister_name(&self, name: &str) {
        self.names.lock().unwrap().remove(name);
    }

    fn lookup_id(&self, name: &str) -> Option<u64> {
        self.names.lock().unwrap().get(name).copied()
    }

    fn poll_defer(&self, label: &str) -> u64 {
        self.defers.lock().unwrap().remove(label).unwrap_or(0)
    }

    fn take_should_fail(&self, label: &str) -> bool {
        self.should_fail.lock().unwrap().remove(label)
    }

    fn arm_failure(&self, label: &str) {
        self.should_fail.lock().unwrap().insert(label.to_string());
    }

    fn shutdown_in_progress(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn record_call(&self, label: &str) {
        *self.calls.lock().unwrap().entry(label.to_string()).or_insert(0) += 1;
    }

    fn record_undo(&self, label: &str) {
        *self.undos.lock().unwrap().entry(label.to_string()).or_insert(0) += 1;
    }

    fn call_count(&self, label: &str) -> usize {
        self.calls.lock().unwrap().get(label).copied().unwrap_or(0)
    }

    fn undo_count(&self, label: &str) -> usize {
        self.undos.lock().unwrap().get(label).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_name_is_idempotent() {
        let env = MockEnv::new();
        assert!(env.register_name("a", 1).is_ok());
        assert!(env.register_name("a", 1).is_ok());
        assert_eq!(env.lookup_id("a"), Some(1));
    }

    #[test]
    fn register_name_conflict_is_an_error() {
        let env = MockEnv::new();
        env.register_name("a", 1).unwrap();
        assert!(env.register_name("a", 2).is_err());
    }

    #[test]
    fn unregister_on_absent_name_is_safe() {
        let env = MockEnv::new();
        env.unregister_name("missing");
    }

    #[test]
    fn poll_defer_is_one_shot() {
        let env = MockEnv::new();
        env.schedule_defer("x", 200);
        assert_eq!(env.poll_defer("x"), 200);
        assert_eq!(env.poll_defer("x"), 0);
    }

    #[test]
    fn failure_arming_is_one_shot() {
        let env = MockEnv::new();
        env.arm_failure("b");
        assert!(env.take_should_fail("b"));
        assert!(!env.take_should_fail("b"));
    }
}
