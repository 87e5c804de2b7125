//! Error taxonomy shared by every subsystem.

use thiserror::Error;

/// Errors returned synchronously by kernel operations.
///
/// Resource exhaustion (`NoFree*`) is always recoverable: the caller may retry
/// once something has been freed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtxError {
    #[error("no object matches the given name")]
    InvalidName,
    #[error("the given name is already assigned")]
    NameAlreadyAssigned,
    #[error("task id {0} is invalid")]
    InvalidTaskId(usize),
    #[error("queue id {0} is invalid")]
    InvalidQueueId(usize),
    #[error("timer id {0} is invalid")]
    InvalidTimerId(usize),
    #[error("no free task handle")]
    NoFreeTaskHandle,
    #[error("no free queue control block")]
    NoFreeQueue,
    #[error("no free application timer")]
    NoFreeTimer,
    #[error("message container pool exhausted")]
    NoFreeMessage,
    #[error("target queue is full")]
    QueueFull,
    #[error("requested queue is empty")]
    QueueEmpty,
    #[error("queue was deleted while a waiter was blocked on it")]
    QueueDeleted,
    #[error("requested event condition not met")]
    NoEventYet,
    #[error("timer expired")]
    TimerExpired,
    #[error("attempt to abort an idle timer")]
    TimerIdle,
    #[error("configuration error: {0}")]
    ConfigurationError(&'static str),
    #[error("blocking wait interrupted unexpectedly")]
    UnexpectedInterruption,
}

pub type RtxResult<T> = Result<T, RtxError>;
