//! Injectable timers.
//!
//! Everything in the crate that waits (per-attempt deadlines, retry delays,
//! reconnect backoff, disconnect grace) goes through [`Scheduler`] so the state
//! machines can be driven without a wall clock. [`TokioScheduler`] is the
//! runtime implementation; [`ManualScheduler`] fires timers only when a test
//! advances its virtual clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`, unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Cancellation handle for a scheduled task. Dropping it does not cancel.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<tokio::task::AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<tokio::task::AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    pub fn cancel(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

/// Spawns one sleeping task per timer on the current tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task();
            }
        });
        TimerHandle::new(cancelled, Some(handle.abort_handle()))
    }
}

struct PendingTimer {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    seq: u64,
    pending: Vec<PendingTimer>,
}

/// Virtual-time scheduler. Timers fire in due order (ties in scheduling order)
/// when [`ManualScheduler::advance`] moves the clock past them.
#[derive(Default)]
pub struct ManualScheduler {
    clock: Mutex<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Number of timers that are scheduled and not cancelled.
    pub fn pending(&self) -> usize {
        self.clock
            .lock()
            .pending
            .iter()
            .filter(|timer| !timer.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Delay from now until the earliest live timer.
    pub fn next_due_in(&self) -> Option<Duration> {
        let clock = self.clock.lock();
        clock
            .pending
            .iter()
            .filter(|timer| !timer.cancelled.load(Ordering::SeqCst))
            .map(|timer| timer.due.saturating_sub(clock.now))
            .min()
    }

    /// Move the clock forward by `by`, firing every live timer that comes due.
    /// Returns how many timers fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.lock().now + by;
        let mut fired = 0;
        loop {
            let next = {
                let mut clock = self.clock.lock();
                clock
                    .pending
                    .retain(|timer| !timer.cancelled.load(Ordering::SeqCst));
                let position = clock
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.seq))
                    .map(|(index, _)| index);
                match position {
                    Some(index) => {
                        let timer = clock.pending.swap_remove(index);
                        clock.now = timer.due;
                        Some(timer)
                    }
                    None => {
                        clock.now = target;
                        None
                    }
                }
            };
            match next {
                Some(timer) => {
                    (timer.task)();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut clock = self.clock.lock();
        clock.seq += 1;
        let timer = PendingTimer {
            due: clock.now + delay,
            seq: clock.seq,
            cancelled: Arc::clone(&cancelled),
            task,
        };
        clock.pending.push(timer);
        TimerHandle::new(cancelled, None)
    }
}
