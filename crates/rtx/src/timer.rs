//! Application timers.
//!
//! An application timer owns one timer object in the heap. On expiry it
//! either posts an event to a task or posts a message to a queue, and re-arms
//! itself when it has a reload period.

use log::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{RtxError, RtxResult};
use crate::event::EventBits;
use crate::heap::TimerAction;
use crate::kernel::{Kernel, INDEFINITE};
use crate::queue::{Message, PostMode, QueueId};
use crate::task::TaskId;

/// Index of an application timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub usize);

/// Lifecycle state of an application timer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimerState {
    #[default]
    Free,
    /// Allocated, not running.
    Idle,
    /// Scheduled in the timer heap.
    Active,
    /// A one-shot that has expired.
    Fired,
}

/// What an application timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTarget {
    Event { task: TaskId, events: EventBits },
    Message { queue: QueueId, message: Message },
}

#[derive(Debug, Default)]
pub(crate) struct AppTimer {
    pub(crate) state: TimerState,
    pub(crate) reload: Option<u64>,
    pub(crate) target: Option<TimerTarget>,
}

#[derive(Debug)]
pub(crate) struct TimerTable {
    timers: Vec<AppTimer>,
}

impl TimerTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            timers: (0..capacity).map(|_| AppTimer::default()).collect(),
        }
    }

    fn get_mut(&mut self, id: TimerId) -> RtxResult<&mut AppTimer> {
        match self.timers.get_mut(id.0) {
            Some(timer) if timer.state != TimerState::Free => Ok(timer),
            _ => Err(RtxError::InvalidTimerId(id.0)),
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        self.timers
            .iter()
            .filter(|timer| timer.state != TimerState::Free)
            .count()
    }
}

/// Reload period that keeps a timer periodic; zero and indefinite mean one-shot.
fn periodic(reload: Option<u64>) -> Option<u64> {
    reload.filter(|&period| period != 0 && period != u64::from(INDEFINITE))
}

impl Kernel {
    /// Allocates an idle application timer that will act on `target`.
    pub fn timer_create(&self, target: TimerTarget) -> RtxResult<TimerId> {
        let mut state = self.lock();
        let (index, timer) = state
            .timers
            .timers
            .iter_mut()
            .enumerate()
            .find(|(_, timer)| timer.state == TimerState::Free)
            .ok_or(RtxError::NoFreeTimer)?;
        *timer = AppTimer {
            state: TimerState::Idle,
            reload: None,
            target: Some(target),
        };
        debug!("timer {index} created for {target:?}");
        Ok(TimerId(index))
    }

    /// Arms a timer to fire `delay` ticks from now.
    ///
    /// With a `reload` period other than zero or [`INDEFINITE`] the timer
    /// re-arms itself on every expiry. Starting an active timer restarts it.
    pub fn timer_start(&self, id: TimerId, delay: u64, reload: Option<u64>) -> RtxResult<()> {
        let mut state = self.lock();
        let timer = state.timers.get_mut(id)?;
        timer.reload = periodic(reload);
        timer.state = TimerState::Active;
        let object = state.timer_object(id);
        state.heap.start(object, delay, TimerAction::FireTimer(id));
        trace!("timer {} started, delay {delay}, reload {reload:?}", id.0);
        Ok(())
    }

    /// Stops a timer, leaving it allocated and idle.
    ///
    /// Reports [`RtxError::TimerExpired`] for a fired one-shot and
    /// [`RtxError::TimerIdle`] for a timer that was never running; the timer
    /// ends up idle either way.
    pub fn timer_abort(&self, id: TimerId) -> RtxResult<()> {
        let mut state = self.lock();
        let timer = state.timers.get_mut(id)?;
        let previous = std::mem::replace(&mut timer.state, TimerState::Idle);
        match previous {
            TimerState::Active => {
                let object = state.timer_object(id);
                state.heap.delete(object);
                Ok(())
            }
            TimerState::Fired => Err(RtxError::TimerExpired),
            _ => Err(RtxError::TimerIdle),
        }
    }

    /// Stops and releases a timer.
    pub fn timer_delete(&self, id: TimerId) -> RtxResult<()> {
        let mut state = self.lock();
        let timer = state.timers.get_mut(id)?;
        *timer = AppTimer::default();
        let object = state.timer_object(id);
        state.heap.delete(object);
        debug!("timer {} deleted", id.0);
        Ok(())
    }

    /// Current lifecycle state of a timer slot.
    pub fn timer_state(&self, id: TimerId) -> RtxResult<TimerState> {
        let state = self.lock();
        state
            .timers
            .timers
            .get(id.0)
            .map(|timer| timer.state)
            .ok_or(RtxError::InvalidTimerId(id.0))
    }

    /// Firing handler, run by the drain loop outside the critical section.
    ///
    /// A timer aborted or restarted after it was popped is left alone.
    pub(crate) fn fire_timer(&self, id: TimerId) -> RtxResult<()> {
        let mut state = self.lock();
        let object = state.timer_object(id);
        if state.heap.is_scheduled(object) {
            return Ok(());
        }
        let Ok(timer) = state.timers.get_mut(id) else {
            return Ok(());
        };
        if timer.state != TimerState::Active {
            return Ok(());
        }
        let target = timer.target;
        let reload = timer.reload;
        if reload.is_none() {
            timer.state = TimerState::Fired;
        }
        if let Some(period) = reload {
            state.heap.start(object, period, TimerAction::FireTimer(id));
        }
        trace!("timer {} fired", id.0);

        match target {
            Some(TimerTarget::Event { task, events }) => self.raise_events(&mut state, task, events),
            Some(TimerTarget::Message { queue, message }) => {
                self.deliver_message(&mut state, queue, message, PostMode::Fifo)
            }
            None => Ok(()),
        }
    }
}
