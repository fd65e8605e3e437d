// src/runtime/scheduler.rs
//! Scheduling contract used by the optimizer
//!
//! Three kinds of work are dispatched:
//!
//! - one-shot jobs bound to a chunk (run on the context owning that chunk)
//! - a global fixed-rate job (the periodic chunk sweep)
//! - a per-villager retry job that repeats until it reports [`RetryOutcome::Done`]
//!
//! Repeating work hands back a [`TaskHandle`] that cancels it.

use crate::host::{AgentRef, PartitionKey};
use crate::utils::errors::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One-shot unit of work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Body of a fixed-rate task
pub type RepeatingJob = Arc<dyn Fn() + Send + Sync + 'static>;

/// Body of a retry task; called once per interval until it returns `Done`
pub type RetryJob = Box<dyn FnMut() -> RetryOutcome + Send + 'static>;

/// Result of one retry attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Not applied yet, try again next interval
    Retry,
    /// Applied, stop repeating
    Done,
}

/// Cancellable handle to a scheduled task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    token: CancellationToken,
}

impl TaskHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once cancelled, shut down, or (for retry tasks) finished
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the task stops for any reason
    pub async fn finished(&self) {
        self.token.cancelled().await
    }
}

/// Work dispatch provided by the host
pub trait TaskScheduler: Send + Sync {
    /// Runs `job` on the context that owns `partition`
    fn run_at_partition(&self, partition: &PartitionKey, job: Job) -> Result<()>;

    /// Runs `job` every `period` after `initial_delay`
    fn run_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        job: RepeatingJob,
    ) -> Result<TaskHandle>;

    /// Runs `job` on the villager's owning context immediately and then every
    /// `period` until it returns [`RetryOutcome::Done`], the handle is
    /// cancelled, or the villager is removed
    fn run_at_agent_timer(
        &self,
        agent: &AgentRef,
        period: Duration,
        job: RetryJob,
    ) -> Result<TaskHandle>;

    /// Cancels every outstanding task and rejects new work
    fn shutdown(&self);
}
