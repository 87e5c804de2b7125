use std::sync::Arc;
use std::thread;

use super::{shared_kernel, wait_until};
use crate::config::KernelConfig;
use crate::error::RtxError;
use crate::event::WaitCondition;
use crate::kernel::{Kernel, Timeout, INDEFINITE, NO_BLOCK};
use crate::queue::{Message, PostMode, QueueId, QueueOptions};

fn is_queue_waiting(kernel: &Kernel, queue: QueueId) -> bool {
    kernel
        .queue_snapshot()
        .queues
        .iter()
        .any(|summary| summary.id == queue.0 && summary.waiting)
}

#[test]
fn bound_queue_scenario() {
    let kernel = Kernel::default();
    let task = kernel.task_allocate("T").unwrap();
    let queue = kernel
        .queue_create("Q", QueueOptions::new(2).bind(task, 0x1))
        .unwrap();

    kernel.queue_post(queue, Message(0xA), PostMode::Fifo).unwrap();
    kernel.queue_post(queue, Message(0xB), PostMode::Fifo).unwrap();
    assert_eq!(
        kernel.queue_post(queue, Message(0xC), PostMode::Fifo),
        Err(RtxError::QueueFull)
    );
    assert_eq!(kernel.event_inquiry(task), Ok(0x1));
    assert_eq!(kernel.queue_inquiry(queue), Ok(2));

    assert_eq!(kernel.queue_wait(queue, INDEFINITE), Ok(Message(0xA)));
    assert_eq!(kernel.queue_wait(queue, INDEFINITE), Ok(Message(0xB)));
    assert_eq!(kernel.queue_inquiry(queue), Ok(0));
    assert_eq!(kernel.queue_wait(queue, NO_BLOCK), Err(RtxError::QueueEmpty));
}

#[test]
fn jam_posts_jump_the_line() {
    let kernel = Kernel::default();
    let queue = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();
    kernel.queue_post(queue, Message(1), PostMode::Fifo).unwrap();
    kernel.queue_post(queue, Message(2), PostMode::Fifo).unwrap();
    kernel.queue_post(queue, Message(99), PostMode::Jam).unwrap();

    let order: Vec<u64> = (0..3)
        .map(|_| kernel.queue_wait(queue, NO_BLOCK).unwrap().0)
        .collect();
    assert_eq!(order, vec![99, 1, 2]);
}

#[test]
fn names_and_identify() {
    let kernel = Kernel::default();
    let queue = kernel.queue_create("rx", QueueOptions::new(1)).unwrap();
    assert_eq!(kernel.queue_identify("rx"), Ok(queue));
    assert_eq!(kernel.queue_identify("tx"), Err(RtxError::InvalidName));
    assert_eq!(
        kernel.queue_create("rx", QueueOptions::new(1)),
        Err(RtxError::NameAlreadyAssigned)
    );
    assert_eq!(
        kernel.queue_create("", QueueOptions::new(1)),
        Err(RtxError::InvalidName)
    );
}

#[test]
fn queue_may_be_bound_before_its_task_exists() {
    let kernel = Kernel::default();
    let future = crate::task::TaskId(1);
    let queue = kernel
        .queue_create("Q", QueueOptions::new(2).bind(future, 0x1))
        .unwrap();
    assert_eq!(
        kernel.queue_post(queue, Message(1), PostMode::Fifo),
        Err(RtxError::InvalidTaskId(1))
    );

    let task = kernel.task_allocate("T").unwrap();
    assert_eq!(task, future);
    kernel.queue_post(queue, Message(2), PostMode::Fifo).unwrap();
    assert_eq!(kernel.event_inquiry(task), Ok(0x1));
    assert_eq!(kernel.queue_inquiry(queue), Ok(2));
}

#[test]
fn bound_task_freed_after_create_still_delivers() {
    let kernel = Kernel::default();
    let task = kernel.task_allocate("T").unwrap();
    let queue = kernel
        .queue_create("Q", QueueOptions::new(2).bind(task, 0x4))
        .unwrap();
    kernel.task_free(task).unwrap();

    assert_eq!(
        kernel.queue_post(queue, Message(7), PostMode::Fifo),
        Err(RtxError::InvalidTaskId(task.0))
    );
    assert_eq!(kernel.queue_inquiry(queue), Ok(1), "message stays queued");
}

#[test]
fn pool_exhaustion_is_recoverable() {
    let config = KernelConfig::builder().max_messages(2).build();
    let kernel = Kernel::new(config).unwrap();
    let a = kernel.queue_create("a", QueueOptions::new(8)).unwrap();
    let b = kernel.queue_create("b", QueueOptions::new(8)).unwrap();

    kernel.queue_post(a, Message(1), PostMode::Fifo).unwrap();
    kernel.queue_post(a, Message(2), PostMode::Fifo).unwrap();
    assert_eq!(
        kernel.queue_post(b, Message(3), PostMode::Fifo),
        Err(RtxError::NoFreeMessage)
    );
    assert_eq!(kernel.free_message_containers(), 0);

    kernel.queue_wait(a, NO_BLOCK).unwrap();
    kernel.queue_post(b, Message(3), PostMode::Fifo).unwrap();
    assert_eq!(kernel.queue_wait(b, NO_BLOCK), Ok(Message(3)));
}

#[test]
fn delete_all_and_recreate_starts_empty() {
    let kernel = Kernel::default();
    let q = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();
    kernel.queue_post(q, Message(1), PostMode::Fifo).unwrap();
    kernel.queue_create("R", QueueOptions::new(4)).unwrap();

    let free = kernel.free_message_containers();
    kernel.queue_delete_all();
    assert_eq!(kernel.free_message_containers(), free + 1);
    assert!(kernel.queue_snapshot().queues.is_empty());
    assert_eq!(kernel.queue_inquiry(q), Err(RtxError::InvalidQueueId(q.0)));

    let again = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();
    assert_eq!(again, q);
    assert_eq!(kernel.queue_inquiry(again), Ok(0));
}

#[test]
fn blocked_waiter_receives_post() {
    let kernel = shared_kernel();
    let queue = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();

    let waiter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.queue_wait(queue, INDEFINITE))
    };
    wait_until(|| is_queue_waiting(&kernel, queue));

    kernel.queue_post(queue, Message(42), PostMode::Fifo).unwrap();
    assert_eq!(waiter.join().unwrap(), Ok(Message(42)));
    assert_eq!(kernel.queue_inquiry(queue), Ok(0));
}

#[test]
fn bound_post_wakes_event_waiter() {
    let kernel = shared_kernel();
    let task = kernel.task_allocate("T").unwrap();
    let queue = kernel
        .queue_create("Q", QueueOptions::new(4).bind(task, 0x8))
        .unwrap();

    let worker = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || {
            let bits = kernel.event_wait(task, 0x8, WaitCondition::Or, INDEFINITE)?;
            let message = kernel.queue_wait(queue, NO_BLOCK)?;
            Ok::<_, RtxError>((bits, message))
        })
    };
    wait_until(|| super::is_event_waiting(&kernel, task));

    kernel.queue_post(queue, Message(5), PostMode::Fifo).unwrap();
    assert_eq!(worker.join().unwrap(), Ok((0x8, Message(5))));
}

#[test]
fn delete_releases_blocked_waiter() {
    let kernel = shared_kernel();
    let queue = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();

    let waiter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.queue_wait(queue, INDEFINITE))
    };
    wait_until(|| is_queue_waiting(&kernel, queue));

    kernel.queue_delete(queue).unwrap();
    assert_eq!(waiter.join().unwrap(), Err(RtxError::QueueDeleted));
}

#[test]
fn interrupted_waiter_returns_error() {
    let kernel = shared_kernel();
    let queue = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();
    assert_eq!(kernel.queue_interrupt_waiter(queue), Ok(false));

    let waiter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.queue_wait(queue, INDEFINITE))
    };
    wait_until(|| is_queue_waiting(&kernel, queue));

    assert_eq!(kernel.queue_interrupt_waiter(queue), Ok(true));
    assert_eq!(waiter.join().unwrap(), Err(RtxError::UnexpectedInterruption));
    assert!(!is_queue_waiting(&kernel, queue));
}

#[test]
fn tick_timeout_blocks_until_post() {
    let kernel = shared_kernel();
    let queue = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();

    let waiter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.queue_wait(queue, Timeout::Ticks(5)))
    };
    wait_until(|| is_queue_waiting(&kernel, queue));

    kernel.advance(50);
    assert!(is_queue_waiting(&kernel, queue), "tick timeouts never expire");

    kernel.queue_post(queue, Message(3), PostMode::Fifo).unwrap();
    assert_eq!(waiter.join().unwrap(), Ok(Message(3)));
}

#[test]
fn waiter_woken_to_empty_queue_reports_configuration_error() {
    let kernel = shared_kernel();
    let queue = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();

    let waiter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.queue_wait(queue, INDEFINITE))
    };
    wait_until(|| is_queue_waiting(&kernel, queue));

    {
        let mut state = kernel.lock();
        kernel
            .deliver_message(&mut state, queue, Message(8), PostMode::Fifo)
            .unwrap();
        assert_eq!(state.queues.pop(queue), Some(Message(8)));
    }
    assert!(matches!(
        waiter.join().unwrap(),
        Err(RtxError::ConfigurationError(_))
    ));
    assert!(!is_queue_waiting(&kernel, queue));
}

#[test]
fn post_racing_an_interrupt_still_delivers() {
    let kernel = shared_kernel();
    let queue = kernel.queue_create("Q", QueueOptions::new(4)).unwrap();

    let waiter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.queue_wait(queue, INDEFINITE))
    };
    wait_until(|| is_queue_waiting(&kernel, queue));

    {
        let mut state = kernel.lock();
        assert_eq!(kernel.raise_queue_interrupt(&mut state, queue), Ok(true));
        kernel
            .deliver_message(&mut state, queue, Message(6), PostMode::Fifo)
            .unwrap();
    }
    assert_eq!(waiter.join().unwrap(), Ok(Message(6)));
    assert_eq!(kernel.queue_inquiry(queue), Ok(0));
}
