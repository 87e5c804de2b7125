//! The executive kernel and its single critical section.
//!
//! [`Kernel`] owns every shared table behind one `parking_lot::Mutex`. The
//! subsystems call into each other synchronously (a firing timer posts an
//! event, a queue post raises its bound event), so one coarse lock at the
//! boundary of the whole core replaces any per-subsystem locking.
//!
//! Blocking operations park on a per-waiter [`Condvar`] gate: one per task
//! slot and one per queue slot. `Condvar::wait` publishes the wait and
//! releases the critical section atomically.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::{ConfigError, KernelConfig};
use crate::heap::{TimerAction, TimerHeap, TimerObjectId};
use crate::queue::{QueueId, QueueTable};
use crate::task::{TaskId, TaskTable};
use crate::timer::{TimerId, TimerTable};

/// Raw timeout value meaning "do not block".
pub const NO_BLOCK: u32 = 0;
/// Raw timeout value meaning "block until woken".
pub const INDEFINITE: u32 = u32::MAX;

/// Timeout argument of the blocking waits.
///
/// Only [`Timeout::NoBlock`] and [`Timeout::Indefinite`] are honoured. Event
/// waits reject [`Timeout::Ticks`]; queue waits treat it as indefinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    NoBlock,
    Indefinite,
    Ticks(u32),
}

impl Timeout {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            NO_BLOCK => Self::NoBlock,
            INDEFINITE => Self::Indefinite,
            ticks => Self::Ticks(ticks),
        }
    }
}

impl From<u32> for Timeout {
    fn from(raw: u32) -> Self {
        Self::from_raw(raw)
    }
}

/// Every table the critical section protects.
pub(crate) struct KernelState {
    pub(crate) tasks: TaskTable,
    pub(crate) queues: QueueTable,
    pub(crate) timers: TimerTable,
    pub(crate) heap: TimerHeap,
}

impl KernelState {
    /// Sleep timer object embedded in a task slot.
    pub(crate) fn sleep_object(&self, task: TaskId) -> TimerObjectId {
        TimerObjectId(task.0)
    }

    /// Timer object embedded in an application timer.
    pub(crate) fn timer_object(&self, timer: TimerId) -> TimerObjectId {
        TimerObjectId(self.tasks.capacity() + timer.0)
    }
}

/// Real-time executive core.
pub struct Kernel {
    config: KernelConfig,
    state: Mutex<KernelState>,
    task_gates: Vec<Condvar>,
    queue_gates: Vec<Condvar>,
}

impl Kernel {
    /// Builds a kernel with every table sized from `config`.
    pub fn new(config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: KernelConfig) -> Self {
        let objects = config.max_tasks + config.max_app_timers;
        let state = KernelState {
            tasks: TaskTable::new(config.max_tasks),
            queues: QueueTable::new(config.max_queues, config.max_messages),
            timers: TimerTable::new(config.max_app_timers),
            heap: TimerHeap::new(objects, config.max_timer_objects, config.max_tick),
        };
        debug!(
            "kernel '{}' up: {} tasks, {} queues, {} messages, {} timer objects",
            config.name,
            config.max_tasks,
            config.max_queues,
            config.max_messages,
            config.max_timer_objects
        );
        Self {
            task_gates: (0..config.max_tasks).map(|_| Condvar::new()).collect(),
            queue_gates: (0..config.max_queues).map(|_| Condvar::new()).collect(),
            state: Mutex::new(state),
            config,
        }
    }

    /// Returns the kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Delivers `delta` elapsed ticks and runs every timer action that became due.
    ///
    /// The critical section is released while each action runs; actions may
    /// re-arm timers or call any other kernel operation. Failures inside an
    /// action are logged and never stop the drain.
    pub fn advance(&self, delta: u64) {
        let mut state = self.lock();
        state.heap.advance_clock(delta);
        while let Some((_, action)) = state.heap.pop_due() {
            MutexGuard::unlocked(&mut state, || self.dispatch(action));
        }
        state.heap.rebase_if_needed();
    }

    /// Monotonic count of ticks delivered through [`Kernel::advance`].
    pub fn ticks(&self) -> u64 {
        self.lock().heap.ticks()
    }

    /// Number of timer objects currently scheduled.
    pub fn pending_timer_objects(&self) -> usize {
        self.lock().heap.len()
    }

    fn dispatch(&self, action: TimerAction) {
        match action {
            TimerAction::WakeTask(task) => self.wake_sleeper(task),
            TimerAction::FireTimer(timer) => {
                if let Err(err) = self.fire_timer(timer) {
                    warn!("timer {} action failed: {err}", timer.0);
                }
            }
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock()
    }

    pub(crate) fn task_gate(&self, task: TaskId) -> &Condvar {
        &self.task_gates[task.0]
    }

    pub(crate) fn queue_gate(&self, queue: QueueId) -> &Condvar {
        &self.queue_gates[queue.0]
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::from_valid(KernelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_timeouts_decode() {
        assert_eq!(Timeout::from(NO_BLOCK), Timeout::NoBlock);
        assert_eq!(Timeout::from(INDEFINITE), Timeout::Indefinite);
        assert_eq!(Timeout::from(25), Timeout::Ticks(25));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = KernelConfig::builder().max_queues(0).build();
        assert!(Kernel::new(config).is_err());
    }

    #[test]
    fn advance_counts_ticks() {
        let kernel = Kernel::default();
        kernel.advance(3);
        kernel.advance(0);
        kernel.advance(4);
        assert_eq!(kernel.ticks(), 7);
    }

    #[test]
    fn huge_advance_does_not_overflow() {
        let kernel = Kernel::default();
        kernel.advance(1);
        kernel.advance(u64::MAX);
        assert_eq!(kernel.ticks(), u64::MAX);
        assert_eq!(kernel.core_snapshot().clock, 0);
    }
}
