// src/runtime/mod.rs
//! Task scheduling
//!
//! - **Scheduler**: the dispatch contract (chunk-bound jobs, fixed-rate
//!   tasks, per-villager retry tasks) and cancellable task handles
//! - **Region Scheduler**: tokio implementation with one worker lane per
//!   chunk hash bucket
//!
//! Periods are configured in server ticks; [`ticks_to_duration`] converts
//! them for the scheduler.

pub mod region_scheduler;
pub mod scheduler;

// Re-export commonly used types
pub use region_scheduler::{RegionScheduler, SchedulerStats};
pub use scheduler::{Job, RepeatingJob, RetryJob, RetryOutcome, TaskHandle, TaskScheduler};

use std::time::Duration;

/// Length of one server tick
pub const MILLIS_PER_TICK: u64 = 50;

/// Wall-clock length of `ticks` server ticks
pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_millis(ticks.saturating_mul(MILLIS_PER_TICK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(20), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(600), Duration::from_secs(30));
        assert_eq!(ticks_to_duration(0), Duration::ZERO);
    }
}
