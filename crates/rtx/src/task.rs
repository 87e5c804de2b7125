//! Task-handle registry and task sleep.
//!
//! A task handle is a named slot in a fixed table. Index 0 is reserved and
//! never handed out, so a zero id can never name a live task. Each slot embeds
//! the task's event state and a sleep timer object.

use std::ops::{Index, IndexMut};

use log::{debug, info, warn};

use crate::error::{RtxError, RtxResult};
use crate::event::{EventBits, WaitCondition};
use crate::heap::TimerAction;
use crate::kernel::{Kernel, KernelState};

/// Longest accepted object name, in bytes.
pub const MAX_NAME_LEN: usize = 15;

/// Index of a task handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

/// Informational attributes recorded with a task handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskAttributes {
    pub priority: u8,
    /// Operating-system process id of the worker, shown in diagnostics.
    pub pid: u32,
}

/// Checks an object name for length; shared by tasks and queues.
pub(crate) fn validate_name(name: &str) -> RtxResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        Err(RtxError::InvalidName)
    } else {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskHandle {
    pub(crate) busy: bool,
    pub(crate) name: String,
    pub(crate) attributes: TaskAttributes,
    pub(crate) events_posted: EventBits,
    pub(crate) events_mask: EventBits,
    pub(crate) condition: WaitCondition,
    /// Set while blocked in an event wait, cleared by the satisfying post.
    pub(crate) waiting: bool,
    /// Set while blocked in a task sleep.
    pub(crate) sleeping: bool,
    /// Latched by an interrupt, consumed by the blocked operation.
    pub(crate) interrupted: bool,
    /// Number of event posts received.
    pub(crate) event_count: u32,
}

impl TaskHandle {
    fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.waiting || self.sleeping
    }
}

/// Fixed table of task handles.
#[derive(Debug)]
pub(crate) struct TaskTable {
    handles: Vec<TaskHandle>,
}

impl TaskTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            handles: (0..capacity).map(|_| TaskHandle::default()).collect(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.handles.len()
    }

    /// Returns the id of the busy handle named `name`.
    pub(crate) fn by_name(&self, name: &str) -> Option<TaskId> {
        self.handles
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, handle)| handle.busy && handle.name == name)
            .map(|(index, _)| TaskId(index))
    }

    /// Fails unless `id` names a busy handle.
    pub(crate) fn check(&self, id: TaskId) -> RtxResult<()> {
        match self.handles.get(id.0) {
            Some(handle) if id.0 != 0 && handle.busy => Ok(()),
            _ => Err(RtxError::InvalidTaskId(id.0)),
        }
    }

    fn allocate(&mut self, name: &str, attributes: TaskAttributes) -> RtxResult<TaskId> {
        validate_name(name)?;
        if self.by_name(name).is_some() {
            return Err(RtxError::NameAlreadyAssigned);
        }
        let (index, handle) = self
            .handles
            .iter_mut()
            .enumerate()
            .skip(1)
            .find(|(_, handle)| !handle.busy)
            .ok_or(RtxError::NoFreeTaskHandle)?;
        handle.reset();
        handle.busy = true;
        handle.name = name.to_owned();
        handle.attributes = attributes;
        Ok(TaskId(index))
    }

    pub(crate) fn busy(&self) -> impl Iterator<Item = (TaskId, &TaskHandle)> {
        self.handles
            .iter()
            .enumerate()
            .filter(|(_, handle)| handle.busy)
            .map(|(index, handle)| (TaskId(index), handle))
    }
}

impl Index<TaskId> for TaskTable {
    type Output = TaskHandle;

    fn index(&self, id: TaskId) -> &TaskHandle {
        &self.handles[id.0]
    }
}

impl IndexMut<TaskId> for TaskTable {
    fn index_mut(&mut self, id: TaskId) -> &mut TaskHandle {
        &mut self.handles[id.0]
    }
}

impl Kernel {
    /// Allocates a task handle with default attributes.
    pub fn task_allocate(&self, name: &str) -> RtxResult<TaskId> {
        self.task_allocate_with(name, TaskAttributes::default())
    }

    /// Allocates a task handle named `name`.
    ///
    /// Fails with [`RtxError::InvalidName`] for an empty or over-long name,
    /// [`RtxError::NameAlreadyAssigned`] when a busy handle already carries the
    /// name and [`RtxError::NoFreeTaskHandle`] when the table is full.
    pub fn task_allocate_with(&self, name: &str, attributes: TaskAttributes) -> RtxResult<TaskId> {
        let mut state = self.lock();
        let id = state.tasks.allocate(name, attributes)?;
        debug!("task {} '{}' allocated", id.0, name);
        Ok(id)
    }

    /// Releases a task handle.
    ///
    /// A thread still blocked on the handle is not released; freeing a task
    /// with an outstanding wait is the caller's error.
    pub fn task_free(&self, id: TaskId) -> RtxResult<()> {
        let mut state = self.lock();
        state.tasks.check(id)?;
        let sleep = state.sleep_object(id);
        state.heap.delete(sleep);
        let handle = &mut state.tasks[id];
        if handle.is_blocked() {
            warn!("task {} '{}' freed while blocked", id.0, handle.name);
        }
        handle.busy = false;
        debug!("task {} freed", id.0);
        Ok(())
    }

    /// Looks up a busy task handle by name.
    pub fn task_identify(&self, name: &str) -> RtxResult<TaskId> {
        self.lock().tasks.by_name(name).ok_or(RtxError::InvalidName)
    }

    /// Blocks the calling thread for `ticks` ticks on behalf of task `id`.
    ///
    /// The sleep ends when the task's sleep timer object expires. A delay of 0
    /// is rounded up to one tick. When the timer heap is full the object is
    /// never scheduled and only [`Kernel::task_interrupt`] ends the sleep.
    pub fn task_sleep(&self, id: TaskId, ticks: u64) -> RtxResult<()> {
        let mut state = self.lock();
        state.tasks.check(id)?;

        let sleep = state.sleep_object(id);
        state.heap.start(sleep, ticks, TimerAction::WakeTask(id));
        state.tasks[id].sleeping = true;

        let gate = self.task_gate(id);
        loop {
            if !state.heap.is_pending(sleep) {
                break;
            }
            if state.tasks[id].interrupted {
                state.heap.delete(sleep);
                let handle = &mut state.tasks[id];
                handle.interrupted = false;
                handle.sleeping = false;
                return Err(RtxError::UnexpectedInterruption);
            }
            gate.wait(&mut state);
        }
        let handle = &mut state.tasks[id];
        handle.sleeping = false;
        handle.interrupted = false;
        Ok(())
    }

    /// Forces a blocked task out of its event wait or sleep.
    ///
    /// The blocked call returns [`RtxError::UnexpectedInterruption`]. Returns
    /// whether the task was blocked; interrupting a running task is a no-op.
    pub fn task_interrupt(&self, id: TaskId) -> RtxResult<bool> {
        let mut state = self.lock();
        self.raise_interrupt(&mut state, id)
    }

    /// Latches an interrupt for `id` inside the critical section held by `state`.
    pub(crate) fn raise_interrupt(&self, state: &mut KernelState, id: TaskId) -> RtxResult<bool> {
        state.tasks.check(id)?;
        let handle = &mut state.tasks[id];
        if !handle.is_blocked() {
            return Ok(false);
        }
        handle.interrupted = true;
        info!("task {} '{}' interrupted", id.0, handle.name);
        self.task_gate(id).notify_all();
        Ok(true)
    }

    /// Attributes recorded for task `id`.
    pub fn task_attributes(&self, id: TaskId) -> RtxResult<TaskAttributes> {
        let state = self.lock();
        state.tasks.check(id)?;
        Ok(state.tasks[id].attributes)
    }

    pub(crate) fn wake_sleeper(&self, id: TaskId) {
        let _state = self.lock();
        self.task_gate(id).notify_all();
    }
}
