//! Read-only snapshots for monitoring tools.
//!
//! Snapshots are taken inside the critical section and rendered afterwards.
//! `Display` produces the classic text dumps: a header line followed by one
//! line per busy task or busy queue.

use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::event::EventBits;
use crate::kernel::Kernel;
use crate::queue::SyncMode;

/// One busy task handle.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: usize,
    pub pid: u32,
    pub priority: u8,
    pub name: String,
    pub waiting: bool,
    pub events_posted: EventBits,
    pub event_count: u32,
}

/// Kernel-wide counters plus every busy task.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSnapshot {
    pub name: String,
    pub ticks: u64,
    pub clock: u64,
    pub timer_objects_in_use: usize,
    pub app_timers_in_use: usize,
    pub tasks: Vec<TaskSummary>,
}

/// One busy queue.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSummary {
    pub id: usize,
    /// Bound task id, 0 when unbound.
    pub task: usize,
    pub depth: usize,
    pub count: usize,
    pub name: String,
    pub sync: SyncMode,
    pub waiting: bool,
}

/// Every busy queue plus the shared pool level.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub name: String,
    pub free_containers: usize,
    pub queues: Vec<QueueSummary>,
}

impl fmt::Display for CoreSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} core {:9} {:08x} {} {}",
            self.name, self.ticks, self.clock, self.timer_objects_in_use, self.app_timers_in_use
        )?;
        for task in &self.tasks {
            writeln!(
                f,
                "{:2} {:5} {:3} {:<16} {} {:08X} {:9}",
                task.id,
                task.pid,
                task.priority,
                task.name,
                u8::from(task.waiting),
                task.events_posted,
                task.event_count
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for QueueSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} queues {}", self.name, self.free_containers)?;
        for queue in &self.queues {
            writeln!(
                f,
                "{:2} {:3} {:3} {:3} {}",
                queue.id, queue.task, queue.depth, queue.count, queue.name
            )?;
        }
        Ok(())
    }
}

impl Kernel {
    /// Captures the tick counters and every busy task.
    pub fn core_snapshot(&self) -> CoreSnapshot {
        let state = self.lock();
        CoreSnapshot {
            name: self.config().name.clone(),
            ticks: state.heap.ticks(),
            clock: state.heap.clock(),
            timer_objects_in_use: state.heap.len(),
            app_timers_in_use: state.timers.in_use(),
            tasks: state
                .tasks
                .busy()
                .map(|(id, handle)| TaskSummary {
                    id: id.0,
                    pid: handle.attributes.pid,
                    priority: handle.attributes.priority,
                    name: handle.name.clone(),
                    waiting: handle.waiting,
                    events_posted: handle.events_posted,
                    event_count: handle.event_count,
                })
                .collect(),
        }
    }

    /// Captures every busy queue.
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            name: self.config().name.clone(),
            free_containers: state.queues.free_containers(),
            queues: state
                .queues
                .busy()
                .map(|(id, queue)| QueueSummary {
                    id: id.0,
                    task: queue.binding.map_or(0, |binding| binding.task.0),
                    depth: queue.depth,
                    count: queue.count,
                    name: queue.name.clone(),
                    sync: queue.sync,
                    waiting: queue.waiting,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_line_layout() {
        let snapshot = CoreSnapshot {
            name: "RTX".into(),
            ticks: 12,
            clock: 12,
            timer_objects_in_use: 1,
            app_timers_in_use: 0,
            tasks: vec![TaskSummary {
                id: 3,
                pid: 812,
                priority: 5,
                name: "modem".into(),
                waiting: true,
                events_posted: 0x11,
                event_count: 4,
            }],
        };
        let text = snapshot.to_string();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("RTX core        12 0000000c 1 0"));
        assert_eq!(
            lines.next(),
            Some(" 3   812   5 modem            1 00000011         4")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn queue_line_layout() {
        let snapshot = QueueSnapshot {
            name: "RTX".into(),
            free_containers: 14,
            queues: vec![QueueSummary {
                id: 2,
                task: 1,
                depth: 8,
                count: 2,
                name: "rx".into(),
                sync: SyncMode::Fifo,
                waiting: false,
            }],
        };
        assert_eq!(snapshot.to_string(), "RTX queues 14\n 2   1   8   2 rx\n");
    }
}
