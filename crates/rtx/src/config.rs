//! Kernel sizing and timing configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for [`KernelConfig::ticks_per_sec`].
pub const MAX_TICKS_PER_SEC: u32 = 10_000;

/// Upper bound for [`KernelConfig::max_tick`], so `clock + max_tick` cannot overflow.
pub const MAX_TICK_LIMIT: u64 = u64::MAX / 2;

/// Configuration for the executive.
///
/// Every table is allocated once, at [`Kernel::new`](crate::Kernel::new), with
/// the sizes given here. Task and queue index 0 is reserved, so `max_tasks`
/// and `max_queues` must be at least 2 to leave one usable slot.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub name: String,
    pub max_tasks: usize,
    pub max_queues: usize,
    pub max_messages: usize,
    pub max_timer_objects: usize,
    pub max_app_timers: usize,
    /// Clock value at which pending wake ticks are rebased to zero.
    pub max_tick: u64,
    pub ticks_per_sec: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "RTX".to_owned(),
            max_tasks: 128,
            max_queues: 1024,
            max_messages: 16384,
            max_timer_objects: 1023,
            max_app_timers: 650,
            max_tick: 0x7FFF_FFFF,
            ticks_per_sec: 200,
        }
    }
}

/// Errors detected while validating a [`KernelConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        field: &'static str,
        min: u64,
        value: u64,
    },
    #[error("ticks_per_sec must be within 1..=10000, got {0}")]
    TickRate(u32),
    #[error("max_tick must not exceed u64::MAX / 2, got {0}")]
    TickLimit(u64),
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Checks that every table can hold at least one usable entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_min("max_tasks", self.max_tasks as u64, 2)?;
        check_min("max_queues", self.max_queues as u64, 2)?;
        check_min("max_messages", self.max_messages as u64, 1)?;
        check_min("max_timer_objects", self.max_timer_objects as u64, 1)?;
        check_min("max_app_timers", self.max_app_timers as u64, 1)?;
        check_min("max_tick", self.max_tick, 2)?;
        if self.max_tick > MAX_TICK_LIMIT {
            return Err(ConfigError::TickLimit(self.max_tick));
        }
        if self.ticks_per_sec == 0 || self.ticks_per_sec > MAX_TICKS_PER_SEC {
            return Err(ConfigError::TickRate(self.ticks_per_sec));
        }
        Ok(())
    }
}

fn check_min(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        Err(ConfigError::TooSmall { field, min, value })
    } else {
        Ok(())
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name shown in diagnostic dumps.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the size of the task table, including reserved slot 0.
    pub fn max_tasks(mut self, max: usize) -> Self {
        self.config.max_tasks = max;
        self
    }

    /// Sets the size of the queue table, including reserved slot 0.
    pub fn max_queues(mut self, max: usize) -> Self {
        self.config.max_queues = max;
        self
    }

    /// Sets the number of message containers shared by all queues.
    pub fn max_messages(mut self, max: usize) -> Self {
        self.config.max_messages = max;
        self
    }

    /// Sets the capacity of the timer-object heap.
    pub fn max_timer_objects(mut self, max: usize) -> Self {
        self.config.max_timer_objects = max;
        self
    }

    /// Sets the number of application timers.
    pub fn max_app_timers(mut self, max: usize) -> Self {
        self.config.max_app_timers = max;
        self
    }

    /// Sets the clock value that triggers a wake-tick rebase.
    pub fn max_tick(mut self, max: u64) -> Self {
        self.config.max_tick = max;
        self
    }

    /// Sets the tick rate used by the host [`Ticker`](crate::Ticker).
    pub fn ticks_per_sec(mut self, rate: u32) -> Self {
        self.config.ticks_per_sec = rate;
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}
