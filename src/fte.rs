//! The top-level `Fte` instance (`spec.md` §9 "a constructed FTE instance
//! owning its pool, store handle, and cancellation signal — no process-wide
//! mutable state"). Wires together every component in `SPEC_FULL.md` §0.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::admin::Admin;
use crate::config::{FateConfig, DEFAULT_THREADPOOL_SIZE};
use crate::env::{Env, MockEnv};
use crate::error::Result;
use crate::id::{InstanceType, OwnerId, TxId};
use crate::liveness::{Liveness, LivenessRegistry};
use crate::op::FateOp;
use crate::pool::WorkerPool;
use crate::rendezvous::Rendezvous;
use crate::reservation::ReservationSweeper;
use crate::step::StepPayload;
use crate::store::TxStore;
use crate::supervisor::PoolSupervisor;
use crate::tx::Key;
use crate::work_finder::WorkFinder;

/// Builds an [`Fte`]. The only required setting is `data_dir`; everything
/// else defaults to a runnable, in-process configuration suitable for
/// tests and single-process embedders.
pub struct FteBuilder {
    data_dir: PathBuf,
    env: Option<Arc<dyn Env>>,
    liveness: Option<Arc<LivenessRegistry>>,
    threadpool_size: usize,
}

impl FteBuilder {
    fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            env: None,
            liveness: None,
            threadpool_size: DEFAULT_THREADPOOL_SIZE,
        }
    }

    /// Supply a real [`Env`] (coordination-service client, table-mapping
    /// registry). Defaults to [`MockEnv`] if unset.
    pub fn env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = Some(env);
        self
    }

    /// Share a [`LivenessRegistry`] across multiple `Fte` instances backed
    /// by the same store, so each can see the others as alive. Defaults to
    /// a private registry (every other owner is immediately reclaimable).
    pub fn liveness(mut self, liveness: Arc<LivenessRegistry>) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn threadpool_size(mut self, size: usize) -> Self {
        self.threadpool_size = size;
        self
    }

    pub fn build(self) -> Result<Fte> {
        let store = Arc::new(TxStore::open(&self.data_dir)?);
        let env = self.env.unwrap_or_else(|| Arc::new(MockEnv::new()));
        let liveness = self.liveness.unwrap_or_else(|| Arc::new(LivenessRegistry::new()));
        let owner = OwnerId::new();
        liveness.register(owner);

        let config = Arc::new(FateConfig::new(self.threadpool_size));
        let rendezvous = Arc::new(Rendezvous::new());

        let pool = Arc::new(WorkerPool::new(store.clone(), env.clone(), owner, rendezvous.clone()));
        let supervisor = PoolSupervisor::spawn(pool.clone(), config.clone());
        let work_finder = WorkFinder::spawn(store.clone(), rendezvous);
        let sweeper = ReservationSweeper::spawn(store.clone(), liveness.clone() as Arc<dyn Liveness>, config.clone());

        Ok(Fte {
            store: store.clone(),
            admin: Admin::new(store),
            owner,
            config,
            liveness,
            _sweeper: sweeper,
            pool,
            _supervisor: supervisor,
            _work_finder: work_finder,
        })
    }
}

/// A fully wired fault-tolerant executor: transaction store, reservation
/// sweep, worker pool, pool supervisor, and work finder, each its own
/// thread (`spec.md` §5). Dropping an `Fte` stops every background thread
/// in reverse spawn order and joins them before returning.
pub struct Fte {
    store: Arc<TxStore>,
    admin: Admin,
    owner: OwnerId,
    config: Arc<FateConfig>,
    liveness: Arc<LivenessRegistry>,
    _sweeper: ReservationSweeper,
    pool: Arc<WorkerPool>,
    _supervisor: PoolSupervisor,
    _work_finder: WorkFinder,
}

impl Fte {
    pub fn builder(data_dir: impl AsRef<Path>) -> FteBuilder {
        FteBuilder::new(data_dir)
    }

    pub fn store(&self) -> &Arc<TxStore> {
        &self.store
    }

    pub fn admin(&self) -> &Admin {
        &self.admin
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn config(&self) -> &Arc<FateConfig> {
        &self.config
    }

    pub fn running_worker_count(&self) -> usize {
        self.pool.running_count()
    }

    /// Idempotently seed a transaction (`spec.md` §8 invariant 4); see
    /// [`TxStore::seed`].
    pub fn seed(&self, instance: InstanceType, key: Key, op: FateOp, initial_step: StepPayload) -> Result<TxId> {
        self.store.seed(instance, key, op, initial_step)
    }
}

impl Drop for Fte {
    fn drop(&mut self) {
        self.liveness.unregister(self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_a_running_pool_at_the_configured_size() {
        let dir = tempfile::tempdir().unwrap();
        let fte = Fte::builder(dir.path()).threadpool_size(2).build().unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while fte.running_worker_count() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(fte.running_worker_count(), 2);
    }

    #[test]
    fn seeded_transaction_runs_to_completion_end_to_end() {
        use crate::status::TxStatus;
        use crate::step::AllocateId;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let fte = Fte::builder(dir.path()).threadpool_size(2).build().unwrap();

        let id = fte
            .seed(
                InstanceType::User,
                Key::new("table", "end-to-end"),
                FateOp::CreateTable,
                StepPayload::AllocateId(AllocateId::new("end-to-end")),
            )
            .unwrap();

        let status = fte.admin().wait_for_completion(id, Duration::from_secs(5));
        assert_eq!(status, TxStatus::Successful);
    }
}
