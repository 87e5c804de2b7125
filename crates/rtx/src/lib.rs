//! # rtx
//!
//! Core of a small real-time executive emulation layer. A supervisory process
//! manages concurrent units of work ("tasks") through the classic embedded
//! RTOS vocabulary: task handles, event flags, bounded message queues and
//! timers. Hardware drivers use it to wake a worker task when a peripheral
//! condition occurs.
//!
//! ## Module Overview
//! - [`heap`]   – Binary min-heap of timer objects ordered by wake tick.
//! - [`task`]   – Named task-handle registry and task sleep.
//! - [`event`]  – Per-task event flags with AND/OR wait conditions.
//! - [`queue`]  – Bounded FIFO queues over a shared container pool.
//! - [`timer`]  – Application timers that post events or messages.
//! - [`kernel`] – The single critical section tying the subsystems together.
//! - [`tick`]   – Host tick source driving [`Kernel::advance`].
//! - [`diag`]   – Read-only snapshots for monitoring tools.
//!
//! Every operation is a method on [`Kernel`]. All shared tables sit behind
//! one coarse lock; the subsystems call into each other synchronously
//! (timer fire → event post, queue post → event post), so there is no lock
//! ordering to get wrong.

pub mod config;
pub mod diag;
pub mod error;
pub mod event;
pub mod heap;
pub mod kernel;
pub mod queue;
pub mod task;
pub mod tick;
pub mod timer;

pub use config::{ConfigError, KernelConfig, KernelConfigBuilder};
pub use diag::{CoreSnapshot, QueueSnapshot, QueueSummary, TaskSummary};
pub use error::{RtxError, RtxResult};
pub use event::{EventBits, WaitCondition};
pub use heap::{TimerAction, TimerObjectId};
pub use kernel::{Kernel, Timeout, INDEFINITE, NO_BLOCK};
pub use queue::{Message, PostMode, QueueBinding, QueueId, QueueOptions, SyncMode};
pub use task::{TaskAttributes, TaskId, MAX_NAME_LEN};
pub use tick::Ticker;
pub use timer::{TimerId, TimerState, TimerTarget};

#[cfg(test)]
mod tests;
