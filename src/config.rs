//! Live configuration (`spec.md` §6 "Configuration keys", `SPEC_FULL.md`
//! §10 Configuration). Grounded on the teacher's `engines::sandstone`
//! handling of its pragma-style runtime knobs: a small struct of atomics
//! and durations an embedder can mutate from any thread while workers read
//! it lock-free.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// `fate.threadpool.size` default. `spec.md` leaves the default
/// unspecified; a small, conservative pool.
pub const DEFAULT_THREADPOOL_SIZE: usize = 4;

/// `DEAD_RES_CLEANUP_DELAY` (`spec.md` §4.2).
pub const DEAD_RES_CLEANUP_DELAY: Duration = Duration::from_secs(180);

/// `INITIAL_DELAY` before the first dead-reservation sweep (`spec.md` §4.2).
pub const RESERVATION_SWEEP_INITIAL_DELAY: Duration = Duration::from_secs(3);

/// `POOL_WATCHER_DELAY` (`spec.md` §4.5).
pub const POOL_WATCHER_DELAY: Duration = Duration::from_secs(30);

/// Default `fate.idle.check.interval` (`spec.md` §6): the window backing
/// the idle-history ring's length (`2 * idle_window_minutes` samples).
pub const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Cancel's reservation-retry policy (`spec.md` §5 "retries ... up to 5
/// times with 500 ms backoff").
pub const CANCEL_RETRY_ATTEMPTS: u32 = 5;
pub const CANCEL_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Live, hot-reloadable configuration shared by every FTE component.
/// `threadpool_size` is an `AtomicUsize` so [`crate::supervisor`] and an
/// embedder's config-reload hook can touch it from different threads
/// without a lock; the duration-valued knobs are set once at
/// [`crate::Fte`] construction and are not hot-reloaded (`spec.md` does
/// not ask for it).
pub struct FateConfig {
    threadpool_size: AtomicUsize,
    pub idle_check_interval: Duration,
    pub dead_res_cleanup_delay: Duration,
    pub pool_watcher_delay: Duration,
}

impl FateConfig {
    pub fn new(threadpool_size: usize) -> Self {
        Self {
            threadpool_size: AtomicUsize::new(threadpool_size),
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
            dead_res_cleanup_delay: DEAD_RES_CLEANUP_DELAY,
            pool_watcher_delay: POOL_WATCHER_DELAY,
        }
    }

    pub fn threadpool_size(&self) -> usize {
        self.threadpool_size.load(Ordering::Relaxed)
    }

    /// Hot-reload `fate.threadpool.size`; the supervisor picks this up on
    /// its next cadence tick.
    pub fn set_threadpool_size(&self, size: usize) {
        self.threadpool_size.store(size, Ordering::Relaxed);
    }

    /// `0` disables the idle-saturation heuristic (`spec.md` §6).
    pub fn idle_check_enabled(&self) -> bool {
        !self.idle_check_interval.is_zero()
    }
}

impl Default for FateConfig {
    fn default() -> Self {
        Self::new(DEFAULT_THREADPOOL_SIZE)
    }
}
