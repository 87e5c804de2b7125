//! Heartbeat demo on the host ticker
//!
//! A worker task blocks on its event word. A periodic application timer raises
//! a heartbeat bit every second, and a second timer posts sample messages to a
//! queue bound to the worker. Ctrl-C posts a shutdown bit from the signal
//! handler, the way a driver would from interrupt context.

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use log::{error, trace};
use rtx::{
    Kernel, KernelConfig, Message, QueueOptions, RtxError, Ticker, TimerTarget, WaitCondition,
    INDEFINITE, NO_BLOCK,
};

const HEARTBEAT: u32 = 0x01;
const SAMPLE_READY: u32 = 0x02;
const SHUTDOWN: u32 = 0x80;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("heartbeat demo failed: {err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = KernelConfig::builder()
        .name("HEARTBEAT")
        .max_tasks(8)
        .max_queues(4)
        .max_messages(64)
        .max_timer_objects(16)
        .max_app_timers(4)
        .ticks_per_sec(100)
        .build();
    let rate = u64::from(config.ticks_per_sec);
    let kernel = Arc::new(Kernel::new(config)?);

    let worker = kernel.task_allocate("worker")?;
    let samples = kernel.queue_create("samples", QueueOptions::new(16).bind(worker, SAMPLE_READY))?;

    let heartbeat = kernel.timer_create(TimerTarget::Event {
        task: worker,
        events: HEARTBEAT,
    })?;
    kernel.timer_start(heartbeat, rate, Some(rate))?;

    let sampler = kernel.timer_create(TimerTarget::Message {
        queue: samples,
        message: Message(0x5A),
    })?;
    kernel.timer_start(sampler, rate / 4, Some(rate / 4))?;

    {
        let kernel = Arc::clone(&kernel);
        ctrlc::set_handler(move || {
            if let Err(err) = kernel.post_from_driver(worker, SHUTDOWN) {
                error!("shutdown post failed: {err}");
            }
        })?;
    }

    let ticker = Ticker::start(Arc::clone(&kernel))?;
    println!("heartbeat demo running at {rate} Hz, Ctrl-C to stop");

    let worker_thread = {
        let kernel = Arc::clone(&kernel);
        thread::Builder::new()
            .name("worker".into())
            .spawn(move || worker_loop(&kernel, worker, samples))?
    };

    let result = worker_thread
        .join()
        .map_err(|_| "worker thread panicked")?;
    drop(ticker);

    print!("{}", kernel.core_snapshot());
    print!("{}", kernel.queue_snapshot());
    kernel.queue_delete_all();
    Ok(result?)
}

fn worker_loop(kernel: &Kernel, worker: rtx::TaskId, samples: rtx::QueueId) -> Result<(), RtxError> {
    let mut beats = 0u32;
    let mut received = 0u32;
    loop {
        let bits = kernel.event_wait(
            worker,
            HEARTBEAT | SAMPLE_READY | SHUTDOWN,
            WaitCondition::Or,
            INDEFINITE,
        )?;

        if bits & SAMPLE_READY != 0 {
            while let Ok(Message(sample)) = kernel.queue_wait(samples, NO_BLOCK) {
                received += 1;
                trace!("sample {sample:#x}");
            }
        }
        if bits & HEARTBEAT != 0 {
            beats += 1;
            println!("beat {beats:3}  tick {:6}  samples {received}", kernel.ticks());
        }
        if bits & SHUTDOWN != 0 {
            println!("shutdown after {beats} beats");
            return Ok(());
        }
    }
}
