//! The liveness predicate the dead-reservation sweep consults
//! (`spec.md` §4.2, component C2): "a reservation is reclaimable once its
//! owner is known dead".

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use crate::id::OwnerId;

/// Tells the reservation sweep whether a given [`OwnerId`] still holds a
/// live process. `spec.md` leaves the liveness mechanism open (it names
/// ZooKeeper ephemeral nodes as the original's choice); this crate has no
/// coordination-service dependency, so it ships an in-process registry
/// instead and leaves room for an embedder to supply their own.
pub trait Liveness: Send + Sync {
    fn is_alive(&self, owner: OwnerId) -> bool;
}

/// Default [`Liveness`] implementation: owners register themselves on
/// construction (`crate::Fte::builder`'s owner) and deregister on
/// [`LivenessRegistry::unregister`] or by the caller's `Drop`. An owner not
/// found in the set is treated as dead, so the registry must be kept in
/// sync with actually-running FTE instances sharing a store.
#[derive(Default)]
pub struct LivenessRegistry {
    live: RwLock<HashSet<OwnerId>>,
    // Extra owners considered permanently alive regardless of registration,
    // used by tests that want to simulate an external liveness source
    // without wiring a full registration/unregistration dance.
    always_alive: Mutex<HashSet<OwnerId>>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, owner: OwnerId) {
        self.live.write().unwrap().insert(owner);
    }

    pub fn unregister(&self, owner: OwnerId) {
        self.live.write().unwrap().remove(&owner);
    }

    #[cfg(test)]
    pub fn mark_always_alive(&self, owner: OwnerId) {
        self.always_alive.lock().unwrap().insert(owner);
    }
}

impl Liveness for LivenessRegistry {
    fn is_alive(&self, owner: OwnerId) -> bool {
        self.live.read().unwrap().contains(&owner) || self.always_alive.lock().unwrap().contains(&owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_owner_is_dead() {
        let registry = LivenessRegistry::new();
        assert!(!registry.is_alive(OwnerId::new()));
    }

    #[test]
    fn registered_owner_is_alive_until_unregistered() {
        let registry = LivenessRegistry::new();
        let owner = OwnerId::new();
        registry.register(owner);
        assert!(registry.is_alive(owner));
        registry.unregister(owner);
        assert!(!registry.is_alive(owner));
    }
}
