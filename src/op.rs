//! Declared operation kinds (`spec.md` §6 "Operation kinds").
//!
//! Grounded on `EngineType` (the teacher's closed, serde-tagged enum of
//! pluggable storage engines with descriptive query methods).

use serde::{Deserialize, Serialize};

/// The closed enumeration of administrative operations the FTE can drive.
/// Each variant maps 1:1 to an externally visible wire operation except
/// where noted; internal-only kinds have no wire counterpart and must fail
/// [`FateOp::require_exportable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FateOp {
    CreateTable,
    CloneTable,
    DeleteTable,
    CompactTable,
    CancelCompact,
    RenameTable,
    Split,
    Merge,
    SetTabletAvailability,
    Export,
    Import,
    BulkImport,
    Offline,
    Online,
    NamespaceCreate,
    NamespaceDelete,
    NamespaceRename,
    /// Internal-only: recorded against the compaction coordinator's
    /// reservation view, has no wire counterpart.
    CommitCompaction,
    /// Internal-only: driven by the manager itself, never by a client RPC.
    ShutdownTabletServer,
}

impl FateOp {
    /// `false` for the two internal-only kinds (`spec.md` §6).
    pub fn has_wire_counterpart(self) -> bool {
        !matches!(self, FateOp::CommitCompaction | FateOp::ShutdownTabletServer)
    }

    /// Fail fast if a caller tries to expose an internal-only operation
    /// kind on the wire. Non-goal: this crate does not define the wire
    /// codec itself (`spec.md` §1), only this guard.
    pub fn require_exportable(self) -> Result<(), String> {
        if self.has_wire_counterpart() {
            Ok(())
        } else {
            Err(format!("{:?} has no wire counterpart and cannot be exported", self))
        }
    }
}
