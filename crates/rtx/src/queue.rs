//! Bounded message queues over a shared container pool.
//!
//! Messages are carried in containers drawn from one pool shared by all
//! queues. Each queue keeps its containers in a doubly linked list threaded
//! through the pool by index; free containers sit on the pool's own list. A
//! queue may be bound to a task, in which case every post also raises an event
//! on that task.

use log::{debug, info, warn};
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::error::{RtxError, RtxResult};
use crate::event::EventBits;
use crate::kernel::{Kernel, KernelState, Timeout};
use crate::task::{validate_name, TaskId};

/// Index of a queue control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub usize);

/// Opaque message payload, typically a pointer-sized value owned by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Message(pub u64);

/// Where a posted message is inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PostMode {
    /// Append at the tail.
    #[default]
    Fifo,
    /// Insert at the head, ahead of everything queued.
    Jam,
}

/// Waiter ordering recorded at creation. Only one waiter is ever served, so
/// the mode has no effect on delivery.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    #[default]
    Fifo,
    Priority,
}

/// Task event raised on every post to a bound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBinding {
    pub task: TaskId,
    pub events: EventBits,
}

/// Creation parameters of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub depth: usize,
    pub binding: Option<QueueBinding>,
    pub sync: SyncMode,
}

impl QueueOptions {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            binding: None,
            sync: SyncMode::default(),
        }
    }

    /// Binds the queue to `task`, posting `events` to it on every message.
    pub fn bind(mut self, task: TaskId, events: EventBits) -> Self {
        self.binding = Some(QueueBinding { task, events });
        self
    }

    pub fn sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Container {
    message: Message,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Head and tail of a list threaded through the container pool.
#[derive(Debug, Default, Clone, Copy)]
struct ContainerList {
    head: Option<usize>,
    tail: Option<usize>,
}

impl ContainerList {
    fn push_back(&mut self, nodes: &mut [Container], index: usize) {
        nodes[index].prev = self.tail;
        nodes[index].next = None;
        match self.tail {
            Some(tail) => nodes[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn push_front(&mut self, nodes: &mut [Container], index: usize) {
        nodes[index].prev = None;
        nodes[index].next = self.head;
        match self.head {
            Some(head) => nodes[head].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }

    fn pop_front(&mut self, nodes: &mut [Container]) -> Option<usize> {
        let index = self.head?;
        self.head = nodes[index].next;
        match self.head {
            Some(head) => nodes[head].prev = None,
            None => self.tail = None,
        }
        nodes[index].next = None;
        Some(index)
    }
}

#[derive(Debug)]
struct MessagePool {
    nodes: Vec<Container>,
    free: ContainerList,
    available: usize,
}

impl MessagePool {
    fn new(capacity: usize) -> Self {
        let mut pool = Self {
            nodes: vec![Container::default(); capacity],
            free: ContainerList::default(),
            available: capacity,
        };
        for index in 0..capacity {
            pool.free.push_back(&mut pool.nodes, index);
        }
        pool
    }

    fn take(&mut self, message: Message) -> Option<usize> {
        let index = self.free.pop_front(&mut self.nodes)?;
        self.available -= 1;
        self.nodes[index].message = message;
        Some(index)
    }

    fn give(&mut self, index: usize) {
        self.nodes[index].message = Message::default();
        self.free.push_back(&mut self.nodes, index);
        self.available += 1;
    }
}

#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    pub(crate) busy: bool,
    pub(crate) name: String,
    pub(crate) depth: usize,
    pub(crate) count: usize,
    pub(crate) binding: Option<QueueBinding>,
    pub(crate) sync: SyncMode,
    pub(crate) waiting: bool,
    interrupted: bool,
    /// Bumped on delete so a waiter parked on the slot can tell it went away.
    generation: u64,
    list: ContainerList,
}

/// Queue control blocks plus the container pool they share.
#[derive(Debug)]
pub(crate) struct QueueTable {
    queues: Vec<MessageQueue>,
    pool: MessagePool,
}

impl QueueTable {
    pub(crate) fn new(capacity: usize, messages: usize) -> Self {
        Self {
            queues: (0..capacity).map(|_| MessageQueue::default()).collect(),
            pool: MessagePool::new(messages),
        }
    }

    /// Containers not currently holding a message.
    pub(crate) fn free_containers(&self) -> usize {
        self.pool.available
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<QueueId> {
        self.queues
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, queue)| queue.busy && queue.name == name)
            .map(|(index, _)| QueueId(index))
    }

    pub(crate) fn get(&self, id: QueueId) -> RtxResult<&MessageQueue> {
        match self.queues.get(id.0) {
            Some(queue) if id.0 != 0 && queue.busy => Ok(queue),
            _ => Err(RtxError::InvalidQueueId(id.0)),
        }
    }

    fn get_mut(&mut self, id: QueueId) -> RtxResult<&mut MessageQueue> {
        match self.queues.get_mut(id.0) {
            Some(queue) if id.0 != 0 && queue.busy => Ok(queue),
            _ => Err(RtxError::InvalidQueueId(id.0)),
        }
    }

    pub(crate) fn busy(&self) -> impl Iterator<Item = (QueueId, &MessageQueue)> {
        self.queues
            .iter()
            .enumerate()
            .filter(|(_, queue)| queue.busy)
            .map(|(index, queue)| (QueueId(index), queue))
    }

    fn create(&mut self, name: &str, options: QueueOptions) -> RtxResult<QueueId> {
        validate_name(name)?;
        if self.by_name(name).is_some() {
            return Err(RtxError::NameAlreadyAssigned);
        }
        let (index, queue) = self
            .queues
            .iter_mut()
            .enumerate()
            .skip(1)
            .find(|(_, queue)| !queue.busy)
            .ok_or(RtxError::NoFreeQueue)?;
        let generation = queue.generation;
        *queue = MessageQueue {
            busy: true,
            name: name.to_owned(),
            depth: options.depth,
            binding: options.binding,
            sync: options.sync,
            generation,
            ..MessageQueue::default()
        };
        Ok(QueueId(index))
    }

    /// Returns every container of `id` to the pool and frees the slot.
    ///
    /// Returns whether a waiter was parked on the queue.
    fn delete(&mut self, id: QueueId) -> bool {
        let queue = &mut self.queues[id.0];
        while let Some(index) = queue.list.pop_front(&mut self.pool.nodes) {
            self.pool.give(index);
        }
        let had_waiter = queue.waiting;
        queue.busy = false;
        queue.count = 0;
        queue.waiting = false;
        queue.interrupted = false;
        queue.binding = None;
        queue.generation = queue.generation.wrapping_add(1);
        had_waiter
    }

    fn push(&mut self, id: QueueId, message: Message, mode: PostMode) -> RtxResult<()> {
        let queue = self.get(id)?;
        if queue.count >= queue.depth {
            return Err(RtxError::QueueFull);
        }
        let index = self.pool.take(message).ok_or(RtxError::NoFreeMessage)?;
        let queue = &mut self.queues[id.0];
        match mode {
            PostMode::Fifo => queue.list.push_back(&mut self.pool.nodes, index),
            PostMode::Jam => queue.list.push_front(&mut self.pool.nodes, index),
        }
        queue.count += 1;
        Ok(())
    }

    pub(crate) fn pop(&mut self, id: QueueId) -> Option<Message> {
        let queue = &mut self.queues[id.0];
        let index = queue.list.pop_front(&mut self.pool.nodes)?;
        queue.count -= 1;
        let message = self.pool.nodes[index].message;
        self.pool.give(index);
        Some(message)
    }
}

impl Kernel {
    /// Posts `message` to `id` inside the critical section held by `state`.
    ///
    /// The queue waiter is woken as soon as the message is queued, so a
    /// failure of the bound event post leaves the message delivered.
    pub(crate) fn deliver_message(
        &self,
        state: &mut KernelState,
        id: QueueId,
        message: Message,
        mode: PostMode,
    ) -> RtxResult<()> {
        state.queues.push(id, message, mode)?;
        let queue = state.queues.get_mut(id)?;
        if std::mem::take(&mut queue.waiting) {
            self.queue_gate(id).notify_all();
        }
        let binding = queue.binding;
        match binding {
            Some(QueueBinding { task, events }) => self.raise_events(state, task, events),
            None => Ok(()),
        }
    }
}

impl Kernel {
    /// Creates a named queue holding at most `options.depth` messages.
    ///
    /// A bound task is not checked here; it may be allocated after the queue,
    /// and a stale binding surfaces as [`RtxError::InvalidTaskId`] on post.
    pub fn queue_create(&self, name: &str, options: QueueOptions) -> RtxResult<QueueId> {
        let mut state = self.lock();
        let id = state.queues.create(name, options)?;
        debug!("queue {} '{}' created, depth {}", id.0, name, options.depth);
        Ok(id)
    }

    /// Deletes a queue, discarding any messages it still holds.
    ///
    /// A waiter blocked on the queue returns [`RtxError::QueueDeleted`].
    pub fn queue_delete(&self, id: QueueId) -> RtxResult<()> {
        let mut state = self.lock();
        let dropped = state.queues.get(id)?.count;
        if dropped > 0 {
            warn!("queue {} deleted with {} messages", id.0, dropped);
        }
        if state.queues.delete(id) {
            self.queue_gate(id).notify_all();
        }
        debug!("queue {} deleted", id.0);
        Ok(())
    }

    /// Deletes every busy queue.
    pub fn queue_delete_all(&self) {
        let mut state = self.lock();
        let busy: Vec<QueueId> = state.queues.busy().map(|(id, _)| id).collect();
        for id in busy {
            if state.queues.delete(id) {
                self.queue_gate(id).notify_all();
            }
        }
        debug!("all queues deleted");
    }

    /// Posts `message` to a queue.
    ///
    /// Fails with [`RtxError::QueueFull`] at depth and
    /// [`RtxError::NoFreeMessage`] when the shared pool is exhausted. A bound
    /// queue raises its event on the bound task and a failure of that post is
    /// returned, although the message stays queued.
    pub fn queue_post(&self, id: QueueId, message: Message, mode: PostMode) -> RtxResult<()> {
        let mut state = self.lock();
        self.deliver_message(&mut state, id, message, mode)
    }

    /// Removes the head message of a queue.
    ///
    /// With [`Timeout::NoBlock`] an empty queue fails with
    /// [`RtxError::QueueEmpty`]; any other timeout blocks until a post. A
    /// waiter woken to find the queue still empty gets
    /// [`RtxError::ConfigurationError`].
    pub fn queue_wait(&self, id: QueueId, timeout: impl Into<Timeout>) -> RtxResult<Message> {
        let timeout = timeout.into();
        let mut state = self.lock();
        state.queues.get(id)?;
        if let Some(message) = state.queues.pop(id) {
            return Ok(message);
        }
        if timeout == Timeout::NoBlock {
            return Err(RtxError::QueueEmpty);
        }

        let queue = state.queues.get_mut(id)?;
        queue.waiting = true;
        let generation = queue.generation;
        let gate = self.queue_gate(id);
        loop {
            let queue = &mut state.queues.queues[id.0];
            if queue.generation != generation {
                info!("queue {} deleted under its waiter", id.0);
                return Err(RtxError::QueueDeleted);
            }
            if !queue.waiting {
                queue.interrupted = false;
                break;
            }
            if queue.interrupted {
                queue.interrupted = false;
                queue.waiting = false;
                info!("queue {} wait interrupted", id.0);
                return Err(RtxError::UnexpectedInterruption);
            }
            gate.wait(&mut state);
        }

        state
            .queues
            .pop(id)
            .ok_or(RtxError::ConfigurationError("queue waiter woken with no message"))
    }

    /// Looks up a busy queue by name.
    pub fn queue_identify(&self, name: &str) -> RtxResult<QueueId> {
        self.lock().queues.by_name(name).ok_or(RtxError::InvalidName)
    }

    /// Number of messages currently held by a queue.
    pub fn queue_inquiry(&self, id: QueueId) -> RtxResult<usize> {
        Ok(self.lock().queues.get(id)?.count)
    }

    /// Forces the waiter of a queue out of its wait.
    ///
    /// Returns whether a waiter was parked on the queue.
    pub fn queue_interrupt_waiter(&self, id: QueueId) -> RtxResult<bool> {
        let mut state = self.lock();
        self.raise_queue_interrupt(&mut state, id)
    }

    /// Latches an interrupt for the waiter of `id` inside the critical section.
    pub(crate) fn raise_queue_interrupt(
        &self,
        state: &mut KernelState,
        id: QueueId,
    ) -> RtxResult<bool> {
        let queue = state.queues.get_mut(id)?;
        if !queue.waiting {
            return Ok(false);
        }
        queue.interrupted = true;
        self.queue_gate(id).notify_all();
        Ok(true)
    }

    /// Containers left in the shared message pool.
    pub fn free_message_containers(&self) -> usize {
        self.lock().queues.free_containers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> QueueTable {
        QueueTable::new(4, 4)
    }

    #[test]
    fn fifo_and_jam_ordering() {
        let mut queues = table();
        let id = queues.create("q", QueueOptions::new(4)).unwrap();
        queues.push(id, Message(1), PostMode::Fifo).unwrap();
        queues.push(id, Message(2), PostMode::Fifo).unwrap();
        queues.push(id, Message(3), PostMode::Jam).unwrap();

        let drained: Vec<u64> = std::iter::from_fn(|| queues.pop(id)).map(|m| m.0).collect();
        assert_eq!(drained, vec![3, 1, 2]);
        assert_eq!(queues.free_containers(), 4);
    }

    #[test]
    fn depth_and_pool_limits() {
        let mut queues = table();
        let a = queues.create("a", QueueOptions::new(1)).unwrap();
        let b = queues.create("b", QueueOptions::new(8)).unwrap();

        queues.push(a, Message(1), PostMode::Fifo).unwrap();
        assert_eq!(queues.push(a, Message(2), PostMode::Fifo), Err(RtxError::QueueFull));

        for n in 0..3 {
            queues.push(b, Message(n), PostMode::Fifo).unwrap();
        }
        assert_eq!(queues.push(b, Message(9), PostMode::Fifo), Err(RtxError::NoFreeMessage));
        assert_eq!(queues.get(b).unwrap().count, 3);
    }

    #[test]
    fn delete_returns_containers() {
        let mut queues = table();
        let id = queues.create("q", QueueOptions::new(4)).unwrap();
        queues.push(id, Message(1), PostMode::Fifo).unwrap();
        queues.push(id, Message(2), PostMode::Jam).unwrap();
        assert_eq!(queues.free_containers(), 2);

        queues.delete(id);
        assert_eq!(queues.free_containers(), 4);
        assert_eq!(queues.get(id).err(), Some(RtxError::InvalidQueueId(id.0)));

        let again = queues.create("q", QueueOptions::new(2)).unwrap();
        assert_eq!(again, id);
        assert_eq!(queues.pop(again), None);
    }

    #[test]
    fn slot_zero_is_reserved() {
        let mut queues = QueueTable::new(2, 1);
        assert_eq!(queues.create("only", QueueOptions::new(1)), Ok(QueueId(1)));
        assert_eq!(
            queues.create("second", QueueOptions::new(1)),
            Err(RtxError::NoFreeQueue)
        );
    }
}
