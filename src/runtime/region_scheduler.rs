// src/runtime/region_scheduler.rs
//! Chunk-affine scheduler on top of tokio
//!
//! Every chunk hashes to one worker lane. A lane is a lock-free queue drained
//! by a single task, so all work for a chunk runs sequentially and never
//! concurrently with other work for the same chunk. Different lanes run in
//! parallel.
//!
//! # Architecture
//!
//! ```text
//! run_at_partition(chunk) ──hash──► Lane 0   Lane 1   Lane 2   ...
//!                                   [Jobs]   [Jobs]   [Jobs]
//!                                     ▼        ▼        ▼
//!                                   worker   worker   worker
//!
//! run_at_fixed_rate ─► interval task ─► job()
//! run_at_agent_timer ─► interval task ─► lane(agent chunk) ─► outcome
//! ```
//!
//! All tasks hang off a root [`CancellationToken`]; [`RegionScheduler::shutdown`]
//! cancels it.

use crate::host::{AgentHandle, AgentRef, PartitionKey};
use crate::runtime::scheduler::{
    Job, RepeatingJob, RetryJob, RetryOutcome, TaskHandle, TaskScheduler,
};
use crate::utils::errors::{OptimizerError, Result};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// A single worker lane
struct Lane {
    queue: SegQueue<Job>,
    notify: Notify,
}

impl Lane {
    fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            notify: Notify::new(),
        }
    }

    fn push(&self, job: Job) {
        self.queue.push(job);
        self.notify.notify_one();
    }
}

/// Tokio implementation of [`TaskScheduler`]
pub struct RegionScheduler {
    lanes: Arc<Vec<Arc<Lane>>>,
    root: CancellationToken,
    runtime: Handle,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RegionScheduler {
    /// Create a scheduler with `lanes` workers (0 = available parallelism)
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(lanes: usize) -> Self {
        let lanes = if lanes == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            lanes
        };

        let runtime = Handle::current();
        let root = CancellationToken::new();
        let lanes: Arc<Vec<Arc<Lane>>> = Arc::new((0..lanes).map(|_| Arc::new(Lane::new())).collect());

        let workers = lanes
            .iter()
            .enumerate()
            .map(|(index, lane)| runtime.spawn(run_lane(index, Arc::clone(lane), root.clone())))
            .collect();

        debug!("Region scheduler initialized with {} lanes", lanes.len());

        Self {
            lanes,
            root,
            runtime,
            workers: Mutex::new(workers),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Lane that owns `partition`
    pub fn lane_of(&self, partition: &PartitionKey) -> usize {
        lane_index(partition, self.lanes.len())
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let queued: Vec<usize> = self.lanes.iter().map(|l| l.queue.len()).collect();
        SchedulerStats {
            num_lanes: self.lanes.len(),
            total_queued: queued.iter().sum(),
            queued_per_lane: queued,
        }
    }

    fn ensure_period(period: Duration) -> Result<()> {
        if period.is_zero() {
            Err(OptimizerError::InvalidConfig(
                "task period must be greater than 0".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.root.is_cancelled() {
            Err(OptimizerError::SchedulerShutdown)
        } else {
            Ok(())
        }
    }
}

impl TaskScheduler for RegionScheduler {
    fn run_at_partition(&self, partition: &PartitionKey, job: Job) -> Result<()> {
        self.ensure_running()?;
        let index = self.lane_of(partition);
        trace!("Dispatching job for {} to lane {}", partition, index);
        self.lanes[index].push(job);
        Ok(())
    }

    fn run_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        job: RepeatingJob,
    ) -> Result<TaskHandle> {
        self.ensure_running()?;
        Self::ensure_period(period)?;
        let token = self.root.child_token();
        let task_token = token.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => job(),
                }
            }
            trace!("Fixed-rate task stopped");
        });

        Ok(TaskHandle::new(token))
    }

    fn run_at_agent_timer(
        &self,
        agent: &AgentRef,
        period: Duration,
        job: RetryJob,
    ) -> Result<TaskHandle> {
        self.ensure_running()?;
        Self::ensure_period(period)?;
        let token = self.root.child_token();
        let task_token = token.clone();
        let lanes = Arc::clone(&self.lanes);
        let agent = Arc::clone(agent);
        let job = Arc::new(Mutex::new(job));

        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if !agent.is_valid() {
                    debug!("Villager {} removed, dropping retry task", agent.id());
                    task_token.cancel();
                    break;
                }

                let (tx, rx) = oneshot::channel();
                let attempt_job = Arc::clone(&job);
                let attempt_token = task_token.clone();
                let lane = &lanes[lane_index(&agent.partition(), lanes.len())];

                lane.push(Box::new(move || {
                    if attempt_token.is_cancelled() {
                        return;
                    }
                    let outcome = {
                        let mut guard = attempt_job.lock();
                        (guard.as_mut())()
                    };
                    let _ = tx.send(outcome);
                }));

                let outcome = tokio::select! {
                    _ = task_token.cancelled() => break,
                    outcome = rx => outcome,
                };

                match outcome {
                    Ok(RetryOutcome::Done) => {
                        task_token.cancel();
                        break;
                    }
                    Ok(RetryOutcome::Retry) => continue,
                    Err(_) => {
                        // Attempt panicked or its lane stopped
                        task_token.cancel();
                        break;
                    }
                }
            }
        });

        Ok(TaskHandle::new(token))
    }

    fn shutdown(&self) {
        if self.root.is_cancelled() {
            return;
        }
        debug!("Shutting down region scheduler");
        self.root.cancel();
        self.workers.lock().clear();
    }
}

impl Drop for RegionScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn lane_index(partition: &PartitionKey, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    partition.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

async fn run_lane(index: usize, lane: Arc<Lane>, root: CancellationToken) {
    loop {
        while let Some(job) = lane.queue.pop() {
            if root.is_cancelled() {
                return;
            }
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Job on lane {} panicked", index);
            }
        }

        tokio::select! {
            _ = root.cancelled() => break,
            _ = lane.notify.notified() => {}
        }
    }
    trace!("Lane {} stopped", index);
}

/// Scheduler statistics
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub num_lanes: usize,
    pub queued_per_lane: Vec<usize>,
    pub total_queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryWorld;
    use crate::host::{Location, Occupation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_scheduler_creation() {
        let scheduler = RegionScheduler::new(4);
        let stats = scheduler.stats();
        assert_eq!(stats.num_lanes, 4);
        assert_eq!(stats.total_queued, 0);
    }

    #[tokio::test]
    async fn test_partition_affinity_is_stable() {
        let scheduler = RegionScheduler::new(8);
        let chunk = PartitionKey::new("world", 3, -7);
        assert_eq!(scheduler.lane_of(&chunk), scheduler.lane_of(&chunk.clone()));
        assert!(scheduler.lane_of(&chunk) < 8);
    }

    #[tokio::test]
    async fn test_partition_jobs_run_in_order() {
        let scheduler = RegionScheduler::new(4);
        let chunk = PartitionKey::new("world", 0, 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            scheduler
                .run_at_partition(&chunk, Box::new(move || seen.lock().push(i)))
                .unwrap();
        }
        scheduler
            .run_at_partition(&chunk, Box::new(move || {
                let _ = tx.send(());
            }))
            .unwrap();

        rx.await.unwrap();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_lane() {
        let scheduler = RegionScheduler::new(1);
        let chunk = PartitionKey::new("world", 0, 0);
        let (tx, rx) = oneshot::channel();

        scheduler
            .run_at_partition(&chunk, Box::new(|| panic!("boom")))
            .unwrap();
        scheduler
            .run_at_partition(&chunk, Box::new(move || {
                let _ = tx.send(());
            }))
            .unwrap();

        rx.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_until_cancelled() {
        let scheduler = RegionScheduler::new(2);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let handle = scheduler
            .run_at_fixed_rate(
                Duration::from_millis(100),
                Duration::from_millis(100),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(360)).await;
        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 runs, got {}", seen);

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_cancel = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timer_retries_until_done() {
        let scheduler = RegionScheduler::new(2);
        let world = MemoryWorld::new();
        let agent: AgentRef = world.insert(Location::new("world", 0.0, 64.0, 0.0), Occupation::Farmer);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let handle = scheduler
            .run_at_agent_timer(
                &agent,
                Duration::from_secs(1),
                Box::new(move || {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        RetryOutcome::Retry
                    } else {
                        RetryOutcome::Done
                    }
                }),
            )
            .unwrap();

        handle.finished().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timer_stops_for_removed_agent() {
        let scheduler = RegionScheduler::new(1);
        let world = MemoryWorld::new();
        let villager = world.insert(Location::new("world", 0.0, 64.0, 0.0), Occupation::Farmer);
        let agent: AgentRef = villager.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let handle = scheduler
            .run_at_agent_timer(
                &agent,
                Duration::from_secs(1),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    RetryOutcome::Retry
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        villager.remove();
        handle.finished().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let scheduler = RegionScheduler::new(1);
        let world = MemoryWorld::new();
        let agent: AgentRef = world.insert(Location::new("world", 0.0, 64.0, 0.0), Occupation::Farmer);

        let fixed = scheduler.run_at_fixed_rate(Duration::ZERO, Duration::ZERO, Arc::new(|| {}));
        assert!(matches!(fixed, Err(OptimizerError::InvalidConfig(_))));

        let retry = scheduler.run_at_agent_timer(&agent, Duration::ZERO, Box::new(|| RetryOutcome::Done));
        assert!(matches!(retry, Err(OptimizerError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timer_finishes_after_panic() {
        let scheduler = RegionScheduler::new(1);
        let world = MemoryWorld::new();
        let agent: AgentRef = world.insert(Location::new("world", 0.0, 64.0, 0.0), Occupation::Farmer);

        let handle = scheduler
            .run_at_agent_timer(&agent, Duration::from_secs(1), Box::new(|| panic!("attempt failed")))
            .unwrap();

        handle.finished().await;
        assert!(handle.is_cancelled());

        // Lane survives the panic
        let (tx, rx) = oneshot::channel();
        scheduler
            .run_at_partition(&agent.partition(), Box::new(move || {
                let _ = tx.send(());
            }))
            .unwrap();
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_work() {
        let scheduler = RegionScheduler::new(2);
        let handle = scheduler
            .run_at_fixed_rate(Duration::from_secs(60), Duration::from_secs(60), Arc::new(|| {}))
            .unwrap();

        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
        assert!(handle.is_cancelled());

        let chunk = PartitionKey::new("world", 0, 0);
        let result = scheduler.run_at_partition(&chunk, Box::new(|| {}));
        assert!(matches!(result, Err(OptimizerError::SchedulerShutdown)));
    }
}
