//! Timer-object heap scheduler.
//!
//! Pending wake-ups live in a fixed-capacity, 1-indexed binary min-heap keyed
//! by absolute wake tick. Slot 0 is never part of the heap. Every timer object
//! remembers its heap slot (`0` when unscheduled) and every heap mutation keeps
//! that back-reference in step with the object's position, so removal of an
//! arbitrary object is `O(log n)`.
//!
//! The heap only stores *what* should happen when an object expires, as a
//! [`TimerAction`]. Running the action is the kernel's job: it pops due
//! objects one at a time and releases the critical section while each action
//! runs, because actions re-enter the event and queue subsystems.

use log::{trace, warn};

use crate::task::TaskId;
use crate::timer::TimerId;

/// Index of a timer object in the heap's object arena.
///
/// The kernel lays the arena out as one sleep object per task slot followed by
/// one object per application timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerObjectId(pub usize);

/// Completion action attached to a scheduled timer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// End the sleep of the given task.
    WakeTask(TaskId),
    /// Run the firing handler of the given application timer.
    FireTimer(TimerId),
}

#[derive(Debug, Default, Clone, Copy)]
struct TimerObject {
    /// Heap slot, 0 when not scheduled.
    index: usize,
    wake: u64,
    action: Option<TimerAction>,
    /// Set by `start`, cleared when the object expires or is deleted.
    pending: bool,
}

/// Binary min-heap of timer objects driven by [`TimerHeap::advance_clock`].
#[derive(Debug)]
pub struct TimerHeap {
    objects: Vec<TimerObject>,
    heap: Vec<TimerObjectId>,
    in_use: usize,
    clock: u64,
    ticks: u64,
    max_tick: u64,
}

impl TimerHeap {
    /// Creates a heap able to schedule `capacity` of `objects` timer objects at once.
    pub fn new(objects: usize, capacity: usize, max_tick: u64) -> Self {
        Self {
            objects: vec![TimerObject::default(); objects],
            heap: vec![TimerObjectId(0); capacity + 1],
            in_use: 0,
            clock: 0,
            ticks: 0,
            max_tick,
        }
    }

    /// Schedules `id` to expire `delta` ticks from now.
    ///
    /// `delta` is clamped into `[1, max_tick - 1]`. An object that is already
    /// scheduled is moved rather than inserted twice. When the heap is full the
    /// object is left unscheduled (but still pending) and `false` is returned.
    pub fn start(&mut self, id: TimerObjectId, delta: u64, action: TimerAction) -> bool {
        self.delete(id);

        let delta = delta.clamp(1, self.max_tick - 1);
        let wake = self.clock.saturating_add(delta);
        {
            let obj = &mut self.objects[id.0];
            obj.wake = wake;
            obj.action = Some(action);
            obj.pending = true;
        }

        if self.in_use >= self.capacity() {
            warn!(
                "timer heap full ({} objects), {:?} for {:?} not scheduled",
                self.in_use, id, action
            );
            return false;
        }

        self.in_use += 1;
        let slot = self.in_use;
        self.place(slot, id);
        self.sift_up(slot);
        trace!("timer object {:?} armed, wake at {} (clock {})", id, wake, self.clock);
        true
    }

    /// Removes `id` from the heap; no-op when it is not scheduled.
    pub fn delete(&mut self, id: TimerObjectId) {
        let obj = &mut self.objects[id.0];
        obj.pending = false;
        let slot = obj.index;
        if slot == 0 {
            return;
        }
        obj.index = 0;

        let last = self.heap[self.in_use];
        self.in_use -= 1;
        if slot <= self.in_use {
            self.place(slot, last);
            let slot = self.sift_down(slot);
            self.sift_up(slot);
        }
    }

    /// Adds `delta` ticks to both the heap clock and the monotonic tick counter.
    ///
    /// Both saturate; the clock is rebased after the drain that follows.
    pub fn advance_clock(&mut self, delta: u64) {
        self.ticks = self.ticks.saturating_add(delta);
        self.clock = self.clock.saturating_add(delta);
    }

    /// Pops the earliest object if its wake tick has been reached.
    pub fn pop_due(&mut self) -> Option<(TimerObjectId, TimerAction)> {
        if self.in_use == 0 {
            return None;
        }
        let root = self.heap[1];
        if self.objects[root.0].wake > self.clock {
            return None;
        }

        let last = self.heap[self.in_use];
        self.in_use -= 1;
        if self.in_use > 0 {
            self.place(1, last);
            self.sift_down(1);
        }

        let obj = &mut self.objects[root.0];
        obj.index = 0;
        obj.pending = false;
        trace!("timer object {:?} expired at clock {}", root, self.clock);
        obj.action.map(|action| (root, action))
    }

    /// Rebases every pending wake tick once the clock reaches `max_tick`.
    ///
    /// Only called after draining, so every remaining wake tick is above the
    /// clock and the subtraction cannot underflow.
    pub fn rebase_if_needed(&mut self) {
        if self.clock < self.max_tick {
            return;
        }
        let clock = self.clock;
        for slot in 1..=self.in_use {
            let id = self.heap[slot];
            self.objects[id.0].wake -= clock;
        }
        self.clock = 0;
        trace!("timer clock rebased by {clock}");
    }

    pub fn is_scheduled(&self, id: TimerObjectId) -> bool {
        self.objects[id.0].index != 0
    }

    pub fn is_pending(&self, id: TimerObjectId) -> bool {
        self.objects[id.0].pending
    }

    /// Absolute wake tick of a scheduled object, relative to the current clock base.
    #[cfg(test)]
    fn wake_tick(&self, id: TimerObjectId) -> Option<u64> {
        let obj = &self.objects[id.0];
        (obj.index != 0).then_some(obj.wake)
    }

    pub fn len(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.heap.len() - 1
    }

    /// Current (rebased) heap clock.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Monotonic tick counter, never rebased.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Returns true when every slot satisfies the min-heap property and every
    /// object's back-reference matches its position.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        (1..=self.in_use).all(|k| {
            let id = self.heap[k];
            let obj = &self.objects[id.0];
            let ordered = k == 1 || obj.wake >= self.objects[self.heap[k / 2].0].wake;
            ordered && obj.index == k
        })
    }

    fn wake_at(&self, slot: usize) -> u64 {
        self.objects[self.heap[slot].0].wake
    }

    fn place(&mut self, slot: usize, id: TimerObjectId) {
        self.heap[slot] = id;
        self.objects[id.0].index = slot;
    }

    fn sift_up(&mut self, mut slot: usize) -> usize {
        let id = self.heap[slot];
        let wake = self.objects[id.0].wake;
        while slot > 1 && wake < self.wake_at(slot / 2) {
            let parent = self.heap[slot / 2];
            self.place(slot, parent);
            slot /= 2;
        }
        self.place(slot, id);
        slot
    }

    fn sift_down(&mut self, mut slot: usize) -> usize {
        let id = self.heap[slot];
        let wake = self.objects[id.0].wake;
        while slot <= self.in_use / 2 {
            let mut child = slot * 2;
            if child < self.in_use && self.wake_at(child + 1) < self.wake_at(child) {
                child += 1;
            }
            if wake <= self.wake_at(child) {
                break;
            }
            let promoted = self.heap[child];
            self.place(slot, promoted);
            slot = child;
        }
        self.place(slot, id);
        slot
    }
}
