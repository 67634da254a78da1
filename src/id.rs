//! Transaction and owner identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Distinguishes transactions driven on behalf of an end-user request from
/// transactions the manager runs against its own metadata (`spec.md` §3,
/// "instance-type tag distinguishing e.g. `USER` vs `META` transactions").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum InstanceType {
    User,
    Meta,
}

/// Opaque, globally unique transaction id: a random 128-bit value tagged
/// with its [`InstanceType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TxId {
    instance: InstanceType,
    value: u128,
}

impl TxId {
    /// Allocate a fresh id. Collisions are astronomically unlikely at 128
    /// bits; the store does not need to check for them.
    pub fn new(instance: InstanceType) -> Self {
        Self { instance, value: rand::random() }
    }

    pub fn instance(&self) -> InstanceType {
        self.instance
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.instance {
            InstanceType::User => "U",
            InstanceType::Meta => "M",
        };
        write!(f, "{}:{:032x}", tag, self.value)
    }
}

/// Identifies one FTE process. Generated once at [`crate::Fte`] construction
/// and registered as a liveness record so the reservation sweep (`spec.md`
/// §4.2) can tell a live owner from a dead one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct OwnerId(u128);

impl OwnerId {
    pub fn new() -> Self {
        Self(rand::random())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
