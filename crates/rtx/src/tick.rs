//! Host tick source.
//!
//! A dedicated thread sleeps until absolute tick deadlines (never relative
//! durations) and delivers the ticks elapsed since the previous delivery to
//! [`Kernel::advance`]. A late wakeup therefore delivers several ticks at
//! once instead of losing them.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::info;

use crate::kernel::Kernel;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Tick period for a rate in Hz.
pub fn tick_period(ticks_per_sec: u32) -> Duration {
    Duration::from_nanos(NSEC_PER_SEC / u64::from(ticks_per_sec.max(1)))
}

/// Periodic driver of [`Kernel::advance`]. Stops on drop.
pub struct Ticker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawns the ticker thread at the kernel's configured tick rate.
    pub fn start(kernel: Arc<Kernel>) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let rate = kernel.config().ticks_per_sec;
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("rtx-ticker".into())
            .spawn(move || ticker_thread(&kernel, rate, &flag))?;
        info!("ticker started at {rate} Hz");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stops the ticker and waits for its thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ticker_thread(kernel: &Kernel, rate: u32, running: &AtomicBool) {
    let period = tick_period(rate);
    let start = Instant::now();
    let mut next_tick = start;
    let mut delivered: u64 = 0;

    while running.load(Ordering::Relaxed) {
        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }

        let due = elapsed_ticks(start.elapsed(), rate);
        if due > delivered {
            kernel.advance(due - delivered);
            delivered = due;
        }
    }
}

/// Whole ticks contained in `elapsed` at `rate` Hz.
fn elapsed_ticks(elapsed: Duration, rate: u32) -> u64 {
    let ticks = elapsed.as_nanos() * u128::from(rate) / u128::from(NSEC_PER_SEC);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}
