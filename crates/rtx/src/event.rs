//! Per-task event flags.
//!
//! Each task owns a word of posted event bits. A waiter names a mask and an
//! AND/OR condition; posting re-evaluates the stored condition and wakes the
//! waiter once it holds. Satisfied bits are consumed by the waiter, not by the
//! poster.

use log::{debug, info, trace};

use crate::error::{RtxError, RtxResult};
use crate::kernel::{Kernel, KernelState, Timeout};
use crate::task::TaskId;

/// Word of event flags.
pub type EventBits = u32;

/// How an event mask is matched against the posted bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitCondition {
    /// Every bit of the mask must be posted.
    #[default]
    And,
    /// Any bit of the mask is enough.
    Or,
}

impl WaitCondition {
    pub fn is_met(self, posted: EventBits, mask: EventBits) -> bool {
        match self {
            Self::And => posted & mask == mask,
            Self::Or => posted & mask != 0,
        }
    }

    /// Bits handed to a satisfied waiter (and removed from the posted word).
    pub fn consumed(self, posted: EventBits, mask: EventBits) -> EventBits {
        match self {
            Self::And => mask,
            Self::Or => posted & mask,
        }
    }
}

impl KernelState {
    /// Posts `bits` to `task` inside the critical section.
    ///
    /// Returns `true` when the post satisfied a blocked waiter, which the
    /// caller must then wake through the task gate.
    pub(crate) fn post_events(&mut self, task: TaskId, bits: EventBits) -> RtxResult<bool> {
        self.tasks.check(task)?;
        let handle = &mut self.tasks[task];
        handle.events_posted |= bits;
        handle.event_count = handle.event_count.wrapping_add(1);
        trace!(
            "task {} posted {:#010x}, now {:#010x}",
            task.0,
            bits,
            handle.events_posted
        );
        if handle.waiting && handle.condition.is_met(handle.events_posted, handle.events_mask) {
            handle.waiting = false;
            return Ok(true);
        }
        Ok(false)
    }
}

impl Kernel {
    /// Posts `bits` inside the critical section held by `state` and wakes a
    /// satisfied waiter.
    pub(crate) fn raise_events(
        &self,
        state: &mut KernelState,
        task: TaskId,
        bits: EventBits,
    ) -> RtxResult<()> {
        if state.post_events(task, bits)? {
            self.task_gate(task).notify_all();
        }
        Ok(())
    }

    /// Sets `bits` in the event word of `task`, waking it if its wait is satisfied.
    pub fn event_post(&self, task: TaskId, bits: EventBits) -> RtxResult<()> {
        let mut state = self.lock();
        self.raise_events(&mut state, task, bits)
    }

    /// Driver-facing post, identical to [`Kernel::event_post`].
    ///
    /// Peripheral drivers signal their worker task through this entry point
    /// when a hardware condition occurs.
    pub fn post_from_driver(&self, task: TaskId, bits: EventBits) -> RtxResult<()> {
        trace!("driver post to task {}", task.0);
        self.event_post(task, bits)
    }

    /// Waits until the event word of `task` satisfies `mask` under `condition`.
    ///
    /// Returns the consumed bits: the whole mask for [`WaitCondition::And`],
    /// the matching subset for [`WaitCondition::Or`]. Only
    /// [`Timeout::NoBlock`] and [`Timeout::Indefinite`] are supported; a tick
    /// timeout fails with [`RtxError::ConfigurationError`].
    pub fn event_wait(
        &self,
        task: TaskId,
        mask: EventBits,
        condition: WaitCondition,
        timeout: impl Into<Timeout>,
    ) -> RtxResult<EventBits> {
        let timeout = timeout.into();
        let mut state = self.lock();
        state.tasks.check(task)?;

        let handle = &mut state.tasks[task];
        if !condition.is_met(handle.events_posted, mask) {
            match timeout {
                Timeout::NoBlock => return Err(RtxError::NoEventYet),
                Timeout::Ticks(_) => {
                    return Err(RtxError::ConfigurationError("timed event waits are not supported"))
                }
                Timeout::Indefinite => {}
            }

            handle.events_mask = mask;
            handle.condition = condition;
            handle.waiting = true;
            debug!("task {} waits for {:#010x} ({:?})", task.0, mask, condition);

            let gate = self.task_gate(task);
            loop {
                let handle = &mut state.tasks[task];
                if !handle.waiting {
                    handle.interrupted = false;
                    break;
                }
                if handle.interrupted {
                    handle.interrupted = false;
                    handle.waiting = false;
                    info!("task {} event wait interrupted", task.0);
                    return Err(RtxError::UnexpectedInterruption);
                }
                gate.wait(&mut state);
            }
        }

        let handle = &mut state.tasks[task];
        let consumed = condition.consumed(handle.events_posted, mask);
        handle.events_posted &= !consumed;
        Ok(consumed)
    }

    /// Clears `bits` from the event word of `task`.
    pub fn event_clear(&self, task: TaskId, bits: EventBits) -> RtxResult<()> {
        let mut state = self.lock();
        state.tasks.check(task)?;
        state.tasks[task].events_posted &= !bits;
        Ok(())
    }

    /// Returns the currently posted event bits of `task`.
    pub fn event_inquiry(&self, task: TaskId) -> RtxResult<EventBits> {
        let state = self.lock();
        state.tasks.check(task)?;
        Ok(state.tasks[task].events_posted)
    }
}
