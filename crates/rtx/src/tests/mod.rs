use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::kernel::Kernel;
use crate::task::TaskId;

mod queues;

fn shared_kernel() -> Arc<Kernel> {
    Arc::new(Kernel::default())
}

/// Polls `condition` until it holds, panicking after two seconds.
fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

fn is_event_waiting(kernel: &Kernel, task: TaskId) -> bool {
    kernel
        .core_snapshot()
        .tasks
        .iter()
        .any(|summary| summary.id == task.0 && summary.waiting)
}
