//! The Transaction Store (`spec.md` §4.1, component C1).

mod durable;
mod handle;

pub use handle::ReservedHandle;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{FateError, Result};
use crate::id::{InstanceType, OwnerId, TxId};
use crate::step::StepPayload;
use crate::status::TxStatus;
use crate::tx::{Info, Key, Reservation};

use durable::{LogEntry, LogWorkerHandle};

/// The durable, on-disk representation of a transaction (`spec.md` §3
/// `Tx`). This is the unit the log persists and replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: TxId,
    pub status: TxStatus,
    pub stack: Vec<StepPayload>,
    pub key: Option<Key>,
    pub info: Info,
    pub reservation: Option<Reservation>,
}

impl TxRecord {
    fn new(id: TxId) -> Self {
        Self {
            id,
            status: TxStatus::New,
            stack: Vec::new(),
            key: None,
            info: Info::default(),
            reservation: None,
        }
    }
}

/// A read-only snapshot of a transaction's observable state (`spec.md`
/// §4.1 "view exposes status, top_step").
#[derive(Debug, Clone)]
pub struct ReadView {
    pub status: TxStatus,
    pub top_step: Option<StepPayload>,
}

struct NotBefore {
    deadlines: Mutex<HashMap<TxId, Instant>>,
}

impl NotBefore {
    fn new() -> Self {
        Self { deadlines: Mutex::new(HashMap::new()) }
    }

    fn defer(&self, id: TxId, for_duration: Duration) {
        self.deadlines.lock().unwrap().insert(id, Instant::now() + for_duration);
    }

    fn is_elapsed(&self, id: TxId) -> bool {
        match self.deadlines.lock().unwrap().get(&id) {
            Some(deadline) => Instant::now() >= *deadline,
            None => true,
        }
    }

    fn clear(&self, id: TxId) {
        self.deadlines.lock().unwrap().remove(&id);
    }
}

/// The Transaction Store: durable, crash-safe storage of all `Tx` records,
/// with reservation-gated mutation (`spec.md` §4.1).
pub struct TxStore {
    log: LogWorkerHandle,
    records: RwLock<HashMap<TxId, TxRecord>>,
    not_before: NotBefore,
    change_mutex: Mutex<()>,
    change_condvar: Condvar,
}

impl TxStore {
    /// Open (or create) a store rooted at `data_dir`, replaying its log.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let (log, entries) = LogWorkerHandle::open(data_dir)?;

        let mut records = HashMap::new();
        for entry in entries {
            match entry {
                LogEntry::Put(record) => {
                    records.insert(record.id, record);
                }
                LogEntry::Tombstone(id) => {
                    records.remove(&id);
                }
            }
        }

        Ok(Self {
            log,
            records: RwLock::new(records),
            not_before: NotBefore::new(),
            change_mutex: Mutex::new(()),
            change_condvar: Condvar::new(),
        })
    }

    /// Allocate an id and persist a new `Tx{status=NEW, stack=[]}`
    /// (`spec.md` §4.1 `create`).
    pub fn create(&self, instance: InstanceType) -> Result<TxId> {
        let id = TxId::new(instance);
        let record = TxRecord::new(id);
        self.log.append_durable(LogEntry::Put(record.clone()))?;
        self.records.write().unwrap().insert(id, record);
        Ok(id)
    }

    /// Idempotent seeding (`spec.md` §8 invariant 4): if a transaction
    /// already carries `key`, return its id if its declared operation
    /// matches `op`, else [`FateError::ConflictingSeed`]; otherwise create
    /// a fresh `NEW` transaction, declare `op`, push `initial_step`, and
    /// transition it to `SUBMITTED`.
    pub fn seed(
        &self,
        instance: InstanceType,
        key: Key,
        op: crate::op::FateOp,
        initial_step: StepPayload,
    ) -> Result<TxId> {
        if let Some(existing) = self.find_by_key(&key) {
            let existing_op = self.with_record(existing, |r| r.info.op)?;
            return if existing_op == Some(op) {
                Ok(existing)
            } else {
                Err(FateError::ConflictingSeed)
            };
        }

        let id = self.create(instance)?;
        let seed_owner = OwnerId::new();
        let handle = self
            .try_reserve(id, seed_owner)?
            .expect("a transaction this store just created cannot already be reserved");
        handle.set_key(self, key)?;
        let mut info = handle.get_info(self)?;
        info.op = Some(op);
        handle.set_info(self, info)?;
        handle.push(self, initial_step)?;
        handle.set_status(self, TxStatus::Submitted)?;
        handle.unreserve(self, Duration::ZERO)?;
        Ok(id)
    }

    fn find_by_key(&self, key: &Key) -> Option<TxId> {
        self.records
            .read()
            .unwrap()
            .values()
            .find(|r| r.key.as_ref() == Some(key))
            .map(|r| r.id)
    }

    /// List known ids, optionally filtered to a `Key::kind`. Finite,
    /// unordered, snapshot-consistent per item (`spec.md` §4.1 `list`).
    pub fn list(&self, key_kind: Option<&str>) -> Vec<(TxId, Option<Key>)> {
        self.records
            .read()
            .unwrap()
            .values()
            .filter(|r| match (key_kind, &r.key) {
                (Some(kind), Some(key)) => key.kind == kind,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|r| (r.id, r.key.clone()))
            .collect()
    }

    /// Read-only observation of a transaction's current state.
    pub fn read(&self, id: TxId) -> ReadView {
        match self.records.read().unwrap().get(&id) {
            Some(r) => ReadView { status: r.status, top_step: r.stack.last().cloned() },
            None => ReadView { status: TxStatus::Unknown, top_step: None },
        }
    }

    /// Read-only observation of `info` (`spec.md` §3 invariant 2 allows
    /// non-holders to read without a reservation). Used by the admin
    /// surface's `fetch-return`/`fetch-exception`.
    pub fn info(&self, id: TxId) -> Result<Info> {
        self.with_record(id, |record| record.info.clone())
    }

    /// Block until `id`'s status is one of `targets` or `deadline` elapses.
    /// Returns the status observed (which may not be in `targets` if the
    /// deadline elapsed first).
    pub fn wait_for_status_change(&self, id: TxId, targets: &[TxStatus], deadline: Instant) -> TxStatus {
        loop {
            let current = self.read(id).status;
            if targets.contains(&current) || current.is_terminal() {
                return current;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return current;
            }
            let guard = self.change_mutex.lock().unwrap();
            let _ = self.change_condvar.wait_timeout(guard, remaining.min(Duration::from_millis(50)));
        }
    }

    /// Non-blocking reservation attempt. Returns `Ok(None)` if already held
    /// by a different owner or the id is unknown.
    pub fn try_reserve(&self, id: TxId, owner: OwnerId) -> Result<Option<ReservedHandle>> {
        let mut records = self.records.write().unwrap();
        let record = records.get_mut(&id).ok_or(FateError::NotFound)?;
        match record.reservation {
            Some(r) if r.owner != owner => Ok(None),
            Some(r) if r.owner == owner => Ok(Some(ReservedHandle::new(id, owner))),
            _ => {
                let reservation = Reservation { owner, acquired_at_millis: now_millis() };
                record.reservation = Some(reservation);
                let snapshot = record.clone();
                drop(records);
                self.log.append_durable(LogEntry::Put(snapshot))?;
                self.not_before.clear(id);
                Ok(Some(ReservedHandle::new(id, owner)))
            }
        }
    }

    /// Blocking reservation acquisition. `spec.md` §5: never used on a
    /// worker's hot path, only by callers willing to wait (e.g. an operator
    /// tool).
    pub fn reserve(&self, id: TxId, owner: OwnerId, poll: Duration) -> Result<ReservedHandle> {
        loop {
            if let Some(handle) = self.try_reserve(id, owner)? {
                return Ok(handle);
            }
            std::thread::sleep(poll);
        }
    }

    /// Release a reservation, optionally deferring the next offer.
    pub(crate) fn unreserve(&self, id: TxId, owner: OwnerId, defer: Duration) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(&id) {
            if matches!(record.reservation, Some(r) if r.owner == owner) {
                record.reservation = None;
                let snapshot = record.clone();
                drop(records);
                self.log.append_durable(LogEntry::Put(snapshot))?;
                if !defer.is_zero() {
                    self.not_before.defer(id, defer);
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Unconditionally clear a reservation, used by the dead-reservation
    /// sweep (`spec.md` §4.2) which has no owner handle of its own.
    pub(crate) fn clear_reservation_if_owned_by(&self, id: TxId, owner: OwnerId) -> Result<bool> {
        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(&id) {
            if matches!(record.reservation, Some(r) if r.owner == owner) {
                record.reservation = None;
                let snapshot = record.clone();
                drop(records);
                self.log.append_durable(LogEntry::Put(snapshot))?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All ids with a currently-held reservation, paired with the holding
    /// owner. Used by the dead-reservation sweep.
    pub(crate) fn reserved_ids(&self) -> Vec<(TxId, OwnerId)> {
        self.records
            .read()
            .unwrap()
            .values()
            .filter_map(|r| r.reservation.map(|res| (r.id, res.owner)))
            .collect()
    }

    /// Runnable transaction ids (`spec.md` §4.1 `runnable`): status in
    /// `{SUBMITTED, IN_PROGRESS, FAILED_IN_PROGRESS}` and unreserved (or a
    /// past deferral). Calls `sink` synchronously per id; `sink` returning
    /// controls back-pressure the way `spec.md` §4.3 describes (the caller
    /// blocks inside `sink` until a worker accepts).
    pub fn runnable(&self, stop: &AtomicBool, mut sink: impl FnMut(TxId)) {
        while !stop.load(Ordering::Relaxed) {
            let candidates: Vec<TxId> = {
                self.records
                    .read()
                    .unwrap()
                    .values()
                    .filter(|r| r.status.is_runnable_candidate())
                    .filter(|r| r.reservation.is_none())
                    .filter(|r| self.not_before.is_elapsed(r.id))
                    .map(|r| r.id)
                    .collect()
            };

            if candidates.is_empty() {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }

            for id in candidates {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                sink(id);
            }
        }
    }

    /// Get the currently-held handle ops to operate against a reserved
    /// transaction. Exposed for `ReservedHandle`'s methods via `pub(crate)`
    /// helpers below.
    pub(crate) fn with_record<T>(&self, id: TxId, f: impl FnOnce(&TxRecord) -> T) -> Result<T> {
        let records = self.records.read().unwrap();
        let record = records.get(&id).ok_or(FateError::NotFound)?;
        Ok(f(record))
    }

    pub(crate) fn mutate_record(&self, id: TxId, owner: OwnerId, f: impl FnOnce(&mut TxRecord) -> Result<()>) -> Result<()> {
        let snapshot = {
            let mut records = self.records.write().unwrap();
            let record = records.get_mut(&id).ok_or(FateError::NotFound)?;
            match record.reservation {
                Some(r) if r.owner == owner => {}
                _ => return Err(FateError::Reservation(format!("{} is not reserved by this owner", id))),
            }
            f(record)?;
            record.clone()
        };
        self.log.append_durable(LogEntry::Put(snapshot))?;
        let _guard = self.change_mutex.lock().unwrap();
        self.change_condvar.notify_all();
        Ok(())
    }

    pub(crate) fn delete_record(&self, id: TxId, owner: OwnerId) -> Result<()> {
        {
            let mut records = self.records.write().unwrap();
            match records.get(&id) {
                Some(r) if matches!(r.reservation, Some(res) if res.owner == owner) => {}
                Some(_) => return Err(FateError::Reservation(format!("{} is not reserved by this owner", id))),
                None => return Err(FateError::NotFound),
            }
            records.remove(&id);
        }
        self.log.append_durable(LogEntry::Tombstone(id))?;
        let _guard = self.change_mutex.lock().unwrap();
        self.change_condvar.notify_all();
        Ok(())
    }

    /// Pretty-printed JSON snapshot of every record, for operator
    /// inspection. Grounded on the teacher's checkpoint-file pattern
    /// (`engines::granite::manager`'s `serde_json::to_string_pretty` of its
    /// checkpoint data): the durable log itself stays bincode for
    /// throughput, JSON is only for human eyes.
    pub fn debug_snapshot_json(&self) -> Result<String> {
        let records: Vec<TxRecord> = self.records.read().unwrap().values().cloned().collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Compact the log to a single snapshot per live record (`spec.md`
    /// §4.1 design note: analogous to the teacher's WAL checkpoint).
    pub fn compact(&self) -> Result<()> {
        let records: Vec<TxRecord> = self.records.read().unwrap().values().cloned().collect();
        self.log.compact(records)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{AllocateId, StepPayload};

    fn open_temp() -> (tempfile::TempDir, TxStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TxStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_starts_as_new_with_empty_stack() {
        let (_dir, store) = open_temp();
        let id = store.create(InstanceType::User).unwrap();
        let view = store.read(id);
        assert_eq!(view.status, TxStatus::New);
        assert!(view.top_step.is_none());
    }

    #[test]
    fn unknown_id_reads_as_unknown() {
        let (_dir, store) = open_temp();
        let bogus = TxId::new(InstanceType::User);
        assert_eq!(store.read(bogus).status, TxStatus::Unknown);
    }

    #[test]
    fn reservation_is_exclusive() {
        let (_dir, store) = open_temp();
        let id = store.create(InstanceType::User).unwrap();
        let owner_a = OwnerId::new();
        let owner_b = OwnerId::new();
        let _handle = store.try_reserve(id, owner_a).unwrap().expect("first reserve succeeds");
        assert!(store.try_reserve(id, owner_b).unwrap().is_none());
    }

    #[test]
    fn reacquiring_ones_own_reservation_succeeds() {
        let (_dir, store) = open_temp();
        let id = store.create(InstanceType::User).unwrap();
        let owner = OwnerId::new();
        store.try_reserve(id, owner).unwrap().unwrap();
        assert!(store.try_reserve(id, owner).unwrap().is_some());
    }

    #[test]
    fn unreserve_then_reserve_by_other_owner_succeeds() {
        let (_dir, store) = open_temp();
        let id = store.create(InstanceType::User).unwrap();
        let owner_a = OwnerId::new();
        let owner_b = OwnerId::new();
        let handle = store.try_reserve(id, owner_a).unwrap().unwrap();
        handle.unreserve(&store, Duration::ZERO).unwrap();
        assert!(store.try_reserve(id, owner_b).unwrap().is_some());
    }

    #[test]
    fn runnable_skips_new_and_reserved_transactions() {
        let (_dir, store) = open_temp();
        let new_id = store.create(InstanceType::User).unwrap();
        let submitted_id = store.create(InstanceType::User).unwrap();
        let owner = OwnerId::new();
        {
            let handle = store.try_reserve(submitted_id, owner).unwrap().unwrap();
            handle.set_status(&store, TxStatus::Submitted).unwrap();
            handle.push(&store, StepPayload::AllocateId(AllocateId::new("x"))).unwrap();
            handle.unreserve(&store, Duration::ZERO).unwrap();
        }

        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        let mut count = 0;
        store.runnable(&stop, |id| {
            seen.push(id);
            count += 1;
            if count >= 1 {
                stop.store(true, Ordering::Relaxed);
            }
        });

        assert!(seen.contains(&submitted_id));
        assert!(!seen.contains(&new_id));
    }

    #[test]
    fn deferred_transaction_is_not_offered_before_its_defer_elapses() {
        let (_dir, store) = open_temp();
        let id = store.create(InstanceType::User).unwrap();
        let owner = OwnerId::new();
        {
            let handle = store.try_reserve(id, owner).unwrap().unwrap();
            handle.set_status(&store, TxStatus::Submitted).unwrap();
            handle.unreserve(&store, Duration::from_millis(200)).unwrap();
        }

        let stop = AtomicBool::new(false);
        let mut seen = false;
        let start = Instant::now();
        store.not_before.deadlines.lock().unwrap(); // sanity: field exists
        while start.elapsed() < Duration::from_millis(50) {
            let candidates = store.list(None);
            if candidates.iter().any(|(cid, _)| *cid == id) {
                // presence in list doesn't mean runnable; check via runnable()
            }
            break;
        }
        store.runnable(&stop, |rid| {
            if rid == id {
                seen = true;
            }
            stop.store(true, Ordering::Relaxed);
        });
        assert!(!seen, "deferred transaction should not be offered immediately");
    }

    #[test]
    fn seed_is_idempotent_for_identical_arguments() {
        use crate::op::FateOp;
        use crate::step::AllocateId;

        let (_dir, store) = open_temp();
        let key = Key::new("table", "widgets");
        let first = store
            .seed(InstanceType::User, key.clone(), FateOp::CreateTable, StepPayload::AllocateId(AllocateId::new("widgets")))
            .unwrap();
        let second = store
            .seed(InstanceType::User, key, FateOp::CreateTable, StepPayload::AllocateId(AllocateId::new("widgets")))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.read(first).status, TxStatus::Submitted);
    }

    #[test]
    fn seed_with_a_conflicting_op_is_rejected() {
        use crate::op::FateOp;
        use crate::step::AllocateId;

        let (_dir, store) = open_temp();
        let key = Key::new("table", "widgets");
        store
            .seed(InstanceType::User, key.clone(), FateOp::CreateTable, StepPayload::AllocateId(AllocateId::new("widgets")))
            .unwrap();
        let result = store.seed(InstanceType::User, key, FateOp::DeleteTable, StepPayload::AllocateId(AllocateId::new("widgets")));

        assert!(matches!(result, Err(FateError::ConflictingSeed)));
    }

    #[test]
    fn debug_snapshot_json_round_trips_every_record() {
        let (_dir, store) = open_temp();
        let a = store.create(InstanceType::User).unwrap();
        let b = store.create(InstanceType::Meta).unwrap();
        let snapshot = store.debug_snapshot_json().unwrap();
        let parsed: Vec<TxRecord> = serde_json::from_str(&snapshot).unwrap();
        let ids: Vec<TxId> = parsed.iter().map(|r| r.id).collect();
        assert!(ids.contains(&a));
        assert!(ids.contains(&b));
    }

    #[test]
    fn compact_preserves_state_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = TxStore::open(dir.path()).unwrap();
            let id = store.create(InstanceType::User).unwrap();
            let owner = OwnerId::new();
            let handle = store.try_reserve(id, owner).unwrap().unwrap();
            handle.set_status(&store, TxStatus::Submitted).unwrap();
            handle.unreserve(&store, Duration::ZERO).unwrap();
            store.compact().unwrap();
            id
        };

        let reopened = TxStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read(id).status, TxStatus::Submitted);
    }
}
