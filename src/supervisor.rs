//! The Pool Supervisor (`spec.md` §4.5, component C5): the only component
//! that spawns or retires workers. Grounded on the teacher's dedicated
//! background-thread shape, cadence-driven like [`crate::reservation::ReservationSweeper`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

use crate::config::FateConfig;
use crate::pool::WorkerPool;

/// Bounded ring of recent idle samples (`spec.md` §4.5: length
/// `2 * idle_window_minutes`). Each sample is `true` when at least one
/// worker was idle at sampling time.
struct IdleHistory {
    samples: VecDeque<bool>,
    capacity: usize,
}

impl IdleHistory {
    fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    fn push(&mut self, idle_count: usize) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(idle_count > 0);
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    /// `true` once the ring is at least half full and ≥95% of samples
    /// recorded zero idle workers (`spec.md` §4.5 saturation warning).
    fn is_saturated(&self) -> bool {
        if self.samples.len() < self.capacity / 2 {
            return false;
        }
        let zero_count = self.samples.iter().filter(|idle| !**idle).count();
        (zero_count as f64) / (self.samples.len() as f64) >= 0.95
    }
}

pub struct PoolSupervisor {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PoolSupervisor {
    pub fn spawn(pool: Arc<WorkerPool>, config: Arc<FateConfig>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();

        let idle_window_minutes = (config.idle_check_interval.as_secs_f64() / 60.0).max(1.0) as usize;
        let history = Arc::new(Mutex::new(IdleHistory::new(2 * idle_window_minutes)));

        let handle = std::thread::spawn(move || {
            while !stop_clone.load(Ordering::Relaxed) {
                tick(&pool, &config, &history);
                sleep_respecting_stop(config.pool_watcher_delay, &stop_clone);
            }
        });

        Self { stop, handle: Some(handle) }
    }
}

impl Drop for PoolSupervisor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn tick(pool: &WorkerPool, config: &FateConfig, history: &Mutex<IdleHistory>) {
    let target = config.threadpool_size();
    let running = pool.running_count();

    match target.cmp(&running) {
        std::cmp::Ordering::Greater => {
            let deficit = target - running;
            info!("pool supervisor spawning {} worker(s) (target {}, running {})", deficit, target, running);
            pool.spawn_additional(deficit);
            history.lock().unwrap().clear();
        }
        std::cmp::Ordering::Less => {
            let surplus = running - target;
            info!("pool supervisor flagging {} worker(s) for shrink (target {}, running {})", surplus, target, running);
            pool.flag_for_shrink(surplus);
        }
        std::cmp::Ordering::Equal => {
            if !config.idle_check_enabled() {
                return;
            }
            let mut history = history.lock().unwrap();
            history.push(pool.idle_worker_count());
            if history.is_saturated() {
                warn!(
                    "worker pool appears saturated (≥95% of recent samples had zero idle workers); \
                     consider raising fate.threadpool.size above {}",
                    target
                );
                history.clear();
            }
        }
    }
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
