// src/limiter.rs
//! Per-chunk villager population limit
//!
//! Every check period, each loaded chunk is handed to the scheduler lane that
//! owns it. There the chunk's villagers are split into optimized and
//! unoptimized, and each class that exceeds its cap loses its excess
//! villagers, lowest configured priority index first. Villagers whose
//! profession is not in the priority list go last.
//!
//! ```text
//! timer ─► for each loaded chunk ─► run_at_partition ─► manage_partition
//! spawn / interaction ──────────────────────────────► manage_partition
//!
//! manage_partition:
//!   classify (cache) ─► unoptimized: sort by priority, remove overflow
//!                    └► optimized:   sort by priority, remove overflow
//! ```
//!
//! The two classes never affect each other within a pass.

use crate::cache::AgentCache;
use crate::host::{
    AgentEventListener, AgentHandle, AgentRef, HostRuntime, ListenerId, Occupation, PartitionKey,
};
use crate::runtime::{ticks_to_duration, TaskHandle, TaskScheduler};
use crate::utils::errors::{OptimizerError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default removal order, first entries are removed first
pub const DEFAULT_REMOVAL_PRIORITY: [Occupation; 15] = [
    Occupation::None,
    Occupation::Nitwit,
    Occupation::Shepherd,
    Occupation::Fisherman,
    Occupation::Butcher,
    Occupation::Cartographer,
    Occupation::Leatherworker,
    Occupation::Fletcher,
    Occupation::Mason,
    Occupation::Farmer,
    Occupation::Armorer,
    Occupation::Toolsmith,
    Occupation::Weaponsmith,
    Occupation::Cleric,
    Occupation::Librarian,
];

/// Configuration for the chunk limit
#[derive(Debug, Clone)]
pub struct PopulationLimitConfig {
    /// Ticks between sweeps of all loaded chunks (default: 600)
    pub check_period_ticks: u64,

    /// Skip chunks whose entities are not loaded (default: true)
    pub skip_unloaded_entity_chunks: bool,

    /// Cap on unoptimized villagers per chunk (default: 20)
    pub max_unoptimized_per_chunk: usize,

    /// Cap on optimized villagers per chunk (default: 60)
    pub max_optimized_per_chunk: usize,

    pub unoptimized_removal_priority: Vec<Occupation>,

    pub optimized_removal_priority: Vec<Occupation>,

    /// Log every removal (default: false)
    pub log_removals: bool,
}

impl Default for PopulationLimitConfig {
    fn default() -> Self {
        Self {
            check_period_ticks: 600,
            skip_unloaded_entity_chunks: true,
            max_unoptimized_per_chunk: 20,
            max_optimized_per_chunk: 60,
            unoptimized_removal_priority: DEFAULT_REMOVAL_PRIORITY.to_vec(),
            optimized_removal_priority: DEFAULT_REMOVAL_PRIORITY.to_vec(),
            log_removals: false,
        }
    }
}

/// Parses configured profession names, dropping unknown ones with a warning
pub fn parse_priority(names: &[String], section: &str) -> Vec<Occupation> {
    names
        .iter()
        .filter_map(|name| match name.parse::<Occupation>() {
            Ok(occupation) => Some(occupation),
            Err(OptimizerError::UnknownOccupation(name)) => {
                warn!(
                    section,
                    "Villager profession '{}' not recognized, leaving it out of the removal priority", name
                );
                None
            }
            Err(e) => {
                warn!(section, "Skipping removal priority entry: {}", e);
                None
            }
        })
        .collect()
}

/// What a single chunk pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Chunk entities were not loaded, nothing was examined
    pub skipped: bool,
    pub unoptimized_seen: usize,
    pub optimized_seen: usize,
    pub unoptimized_removed: usize,
    pub optimized_removed: usize,
}

impl EvictionReport {
    pub fn total_removed(&self) -> usize {
        self.unoptimized_removed + self.optimized_removed
    }
}

#[derive(Debug, Clone, Copy)]
enum Class {
    Unoptimized,
    Optimized,
}

impl Class {
    fn label(&self) -> &'static str {
        match self {
            Class::Unoptimized => "unoptimized",
            Class::Optimized => "optimized",
        }
    }
}

/// Enforces the per-chunk villager caps
pub struct PartitionPopulationLimiter {
    config: PopulationLimitConfig,
    host: Arc<dyn HostRuntime>,
    scheduler: Arc<dyn TaskScheduler>,
    cache: Arc<AgentCache>,
    periodic: Mutex<Option<TaskHandle>>,
    listener: Mutex<Option<ListenerId>>,
}

impl PartitionPopulationLimiter {
    pub fn new(
        config: PopulationLimitConfig,
        host: Arc<dyn HostRuntime>,
        scheduler: Arc<dyn TaskScheduler>,
        cache: Arc<AgentCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            host,
            scheduler,
            cache,
            periodic: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PopulationLimitConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.periodic
            .lock()
            .as_ref()
            .map_or(false, |h| !h.is_cancelled())
    }

    /// Subscribes to villager events and starts the periodic sweep
    pub fn enable(self: &Arc<Self>) -> Result<()> {
        let mut periodic = self.periodic.lock();
        if periodic.as_ref().map_or(false, |h| !h.is_cancelled()) {
            return Ok(());
        }

        let period = ticks_to_duration(self.config.check_period_ticks);
        let weak = Arc::downgrade(self);
        let handle = self.scheduler.run_at_fixed_rate(
            period,
            period,
            Arc::new(move || {
                if let Some(limiter) = weak.upgrade() {
                    limiter.sweep();
                }
            }),
        )?;
        *periodic = Some(handle);

        let listener: Arc<dyn AgentEventListener> = Arc::clone(self) as Arc<dyn AgentEventListener>;
        let mut subscription = self.listener.lock();
        if let Some(stale) = subscription.replace(self.host.subscribe(listener)) {
            self.host.unsubscribe(stale);
        }
        drop(subscription);
        drop(periodic);

        info!(
            "Villager chunk limit enabled (every {} ticks, {} unoptimized / {} optimized per chunk)",
            self.config.check_period_ticks,
            self.config.max_unoptimized_per_chunk,
            self.config.max_optimized_per_chunk
        );
        Ok(())
    }

    /// Unsubscribes and cancels the periodic sweep
    pub fn disable(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.host.unsubscribe(id);
        }
        if let Some(handle) = self.periodic.lock().take() {
            handle.cancel();
        }
        debug!("Villager chunk limit disabled");
    }

    /// Dispatches a check of every loaded chunk to its owning lane
    ///
    /// Returns the number of chunks dispatched.
    pub fn sweep(self: &Arc<Self>) -> usize {
        let mut dispatched = 0;
        for world in self.host.worlds() {
            for partition in self.host.loaded_partitions(&world) {
                let limiter = Arc::clone(self);
                let key = partition.clone();
                let job = Box::new(move || {
                    limiter.manage_partition(&key);
                });
                if let Err(e) = self.scheduler.run_at_partition(&partition, job) {
                    warn!("Stopping chunk sweep: {}", e);
                    return dispatched;
                }
                dispatched += 1;
            }
        }
        debug!("Dispatched {} chunk checks", dispatched);
        dispatched
    }

    /// Enforces both caps on one chunk
    ///
    /// Must run on the context that owns `partition`.
    pub fn manage_partition(&self, partition: &PartitionKey) -> EvictionReport {
        if self.config.skip_unloaded_entity_chunks && !self.host.is_entities_loaded(partition) {
            return EvictionReport {
                skipped: true,
                ..Default::default()
            };
        }

        let (optimized, unoptimized): (Vec<AgentRef>, Vec<AgentRef>) = self
            .host
            .agents_in(partition)
            .into_iter()
            .partition(|agent| self.cache.get_or_add(agent).is_optimized());

        let mut report = EvictionReport {
            unoptimized_seen: unoptimized.len(),
            optimized_seen: optimized.len(),
            ..Default::default()
        };

        report.unoptimized_removed = self.evict_overflow(
            unoptimized,
            self.config.max_unoptimized_per_chunk,
            &self.config.unoptimized_removal_priority,
            Class::Unoptimized,
        );
        report.optimized_removed = self.evict_overflow(
            optimized,
            self.config.max_optimized_per_chunk,
            &self.config.optimized_removal_priority,
            Class::Optimized,
        );

        if report.total_removed() > 0 {
            debug!(
                "Chunk {}: removed {} unoptimized, {} optimized villagers",
                partition, report.unoptimized_removed, report.optimized_removed
            );
        }
        report
    }

    fn evict_overflow(
        &self,
        mut agents: Vec<AgentRef>,
        max: usize,
        priority: &[Occupation],
        class: Class,
    ) -> usize {
        let overflow = agents.len().saturating_sub(max);
        if overflow == 0 {
            return 0;
        }

        agents.sort_by_key(|agent| priority_index(priority, agent.occupation()));

        for agent in agents.iter().take(overflow) {
            agent.remove();
            self.cache.invalidate(agent.id());
            if self.config.log_removals {
                info!(
                    "Removed {} villager of profession type '{}' at {}",
                    class.label(),
                    agent.occupation(),
                    agent.location()
                );
            }
        }

        metrics::counter!("villager_optimizer_evictions_total", "class" => class.label())
            .increment(overflow as u64);
        overflow
    }
}

impl AgentEventListener for PartitionPopulationLimiter {
    fn on_agent_spawned(&self, agent: &AgentRef) {
        self.manage_partition(&agent.partition());
    }

    fn on_agent_interacted(&self, agent: &AgentRef) {
        self.manage_partition(&agent.partition());
    }
}

/// Position in the priority list, unlisted professions sort last
fn priority_index(priority: &[Occupation], occupation: Occupation) -> usize {
    priority
        .iter()
        .position(|o| *o == occupation)
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryWorld;
    use crate::host::{AgentId, Location};
    use crate::runtime::RegionScheduler;
    use crate::status::clock::SystemClock;
    use crate::status::{OptimizationType, StatusContext};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::time::Duration;

    struct Harness {
        world: Arc<MemoryWorld>,
        cache: Arc<AgentCache>,
        limiter: Arc<PartitionPopulationLimiter>,
    }

    fn harness(config: PopulationLimitConfig) -> Harness {
        let world = Arc::new(MemoryWorld::new());
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(RegionScheduler::new(2));
        let ctx = Arc::new(StatusContext::new(scheduler.clone(), Arc::new(SystemClock)));
        let cache = Arc::new(AgentCache::new(world.clone(), ctx, Duration::from_secs(30)));
        let limiter = PartitionPopulationLimiter::new(config, world.clone(), scheduler, cache.clone());
        Harness {
            world,
            cache,
            limiter,
        }
    }

    fn at_origin() -> Location {
        Location::new("world", 8.0, 64.0, 8.0)
    }

    fn chunk() -> PartitionKey {
        at_origin().partition()
    }

    fn optimize(h: &Harness, agent: &AgentRef) {
        h.cache
            .get_or_add(agent)
            .try_apply_optimization(OptimizationType::Workstation);
    }

    fn occupations(h: &Harness) -> Vec<Occupation> {
        h.world.agents_in(&chunk()).iter().map(|a| a.occupation()).collect()
    }

    #[test]
    fn test_parse_priority_skips_unknown() {
        let names: Vec<String> = ["NONE", "BAKER", "farmer", "NITWIT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            parse_priority(&names, "villager-chunk-limit.unoptimized"),
            vec![Occupation::None, Occupation::Farmer, Occupation::Nitwit]
        );
    }

    #[test]
    fn test_priority_index() {
        let priority = [Occupation::None, Occupation::Farmer];
        assert_eq!(priority_index(&priority, Occupation::None), 0);
        assert_eq!(priority_index(&priority, Occupation::Farmer), 1);
        assert_eq!(priority_index(&priority, Occupation::Cleric), usize::MAX);
    }

    #[tokio::test]
    async fn test_removes_lowest_priority_first() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 1,
            unoptimized_removal_priority: vec![Occupation::None, Occupation::Farmer],
            ..Default::default()
        });
        h.world.insert(at_origin(), Occupation::None);
        h.world.insert(at_origin(), Occupation::Farmer);
        h.world.insert(at_origin(), Occupation::None);

        let report = h.limiter.manage_partition(&chunk());
        assert_eq!(report.unoptimized_removed, 2);
        assert_eq!(occupations(&h), vec![Occupation::Farmer]);
    }

    #[tokio::test]
    async fn test_unlisted_occupations_removed_last() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 1,
            unoptimized_removal_priority: vec![Occupation::Farmer],
            ..Default::default()
        });
        h.world.insert(at_origin(), Occupation::Librarian);
        h.world.insert(at_origin(), Occupation::Farmer);
        h.world.insert(at_origin(), Occupation::Farmer);

        h.limiter.manage_partition(&chunk());
        assert_eq!(occupations(&h), vec![Occupation::Librarian]);
    }

    #[tokio::test]
    async fn test_under_cap_untouched() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 3,
            ..Default::default()
        });
        for _ in 0..3 {
            h.world.insert(at_origin(), Occupation::Mason);
        }

        let report = h.limiter.manage_partition(&chunk());
        assert_eq!(report.total_removed(), 0);
        assert_eq!(report.unoptimized_seen, 3);
        assert_eq!(h.world.population(), 3);
    }

    #[tokio::test]
    async fn test_classes_are_independent() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 1,
            max_optimized_per_chunk: 2,
            ..Default::default()
        });
        for _ in 0..3 {
            let agent: AgentRef = h.world.insert(at_origin(), Occupation::Cleric);
            optimize(&h, &agent);
        }
        for _ in 0..3 {
            h.world.insert(at_origin(), Occupation::Cleric);
        }

        let report = h.limiter.manage_partition(&chunk());
        assert_eq!(report.unoptimized_removed, 2);
        assert_eq!(report.optimized_removed, 1);

        let remaining = h.world.agents_in(&chunk());
        let optimized = remaining
            .iter()
            .filter(|a| h.cache.get_or_add(a).is_optimized())
            .count();
        assert_eq!(optimized, 2);
        assert_eq!(remaining.len() - optimized, 1);
    }

    #[tokio::test]
    async fn test_skips_chunk_without_entities() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 0,
            ..Default::default()
        });
        h.world.insert(at_origin(), Occupation::Nitwit);
        h.world.load_partition(chunk(), false);

        let report = h.limiter.manage_partition(&chunk());
        assert!(report.skipped);
        assert_eq!(h.world.population(), 1);
    }

    #[tokio::test]
    async fn test_checks_chunk_without_entities_when_not_skipping() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 0,
            skip_unloaded_entity_chunks: false,
            ..Default::default()
        });
        h.world.insert(at_origin(), Occupation::Nitwit);
        h.world.load_partition(chunk(), false);

        let report = h.limiter.manage_partition(&chunk());
        assert!(!report.skipped);
        assert_eq!(h.world.population(), 0);
    }

    #[tokio::test]
    async fn test_removed_agents_leave_cache() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 0,
            ..Default::default()
        });
        let agent = h.world.insert(at_origin(), Occupation::Nitwit);
        let id: AgentId = agent.id();

        h.limiter.manage_partition(&chunk());
        assert!(!h.cache.contains(id));
        assert!(h.cache.get(id).is_none());
    }

    #[tokio::test]
    async fn test_spawn_event_triggers_check() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 2,
            ..Default::default()
        });
        h.limiter.enable().unwrap();

        for _ in 0..5 {
            h.world.spawn(at_origin(), Occupation::Fisherman);
        }
        assert_eq!(h.world.population(), 2);

        h.limiter.disable();
        h.world.spawn(at_origin(), Occupation::Fisherman);
        assert_eq!(h.world.population(), 3);
    }

    #[tokio::test]
    async fn test_interaction_event_triggers_check() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 1,
            ..Default::default()
        });
        let first = h.world.insert(at_origin(), Occupation::Shepherd);
        h.world.insert(at_origin(), Occupation::Shepherd);
        h.limiter.enable().unwrap();

        assert!(h.world.interact(first.id()));
        assert_eq!(h.world.population(), 1);
        h.limiter.disable();
    }

    #[tokio::test]
    async fn test_enable_rejects_zero_period() {
        let h = harness(PopulationLimitConfig {
            check_period_ticks: 0,
            max_unoptimized_per_chunk: 0,
            ..Default::default()
        });
        h.world.insert(at_origin(), Occupation::Nitwit);

        let result = h.limiter.enable();
        assert!(matches!(result, Err(OptimizerError::InvalidConfig(_))));
        assert!(!h.limiter.is_running());

        // Not subscribed either
        h.world.spawn(at_origin(), Occupation::Nitwit);
        assert_eq!(h.world.population(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_enable_subscribes_once() {
        let h = harness(PopulationLimitConfig {
            max_unoptimized_per_chunk: 1,
            ..Default::default()
        });
        let barrier = std::sync::Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    h.limiter.enable().unwrap();
                });
            }
        });
        assert!(h.limiter.is_running());

        h.limiter.disable();
        assert!(!h.limiter.is_running());
        for _ in 0..3 {
            h.world.spawn(at_origin(), Occupation::Farmer);
        }
        assert_eq!(h.world.population(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep() {
        let h = harness(PopulationLimitConfig {
            check_period_ticks: 20,
            max_unoptimized_per_chunk: 2,
            ..Default::default()
        });
        for _ in 0..5 {
            h.world.insert(at_origin(), Occupation::Butcher);
        }
        for _ in 0..4 {
            h.world.insert(Location::new("world_nether", 100.0, 64.0, 100.0), Occupation::Mason);
        }

        h.limiter.enable().unwrap();
        assert!(h.limiter.is_running());
        assert_eq!(h.world.population(), 9);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(h.world.population(), 4);

        h.limiter.disable();
        assert!(!h.limiter.is_running());
        for _ in 0..3 {
            h.world.insert(at_origin(), Occupation::Butcher);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.world.population(), 7);
    }

    proptest! {
        #[test]
        fn test_eviction_respects_priority(
            picks in proptest::collection::vec(0usize..15, 0..40),
            cap in 0usize..20,
            listed in 1usize..15,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let _guard = runtime.enter();

            let priority: Vec<Occupation> = DEFAULT_REMOVAL_PRIORITY[..listed].to_vec();
            let h = harness(PopulationLimitConfig {
                max_unoptimized_per_chunk: cap,
                unoptimized_removal_priority: priority.clone(),
                ..Default::default()
            });
            let agents: Vec<AgentRef> = picks
                .iter()
                .map(|i| h.world.insert(at_origin(), Occupation::ALL[*i]) as AgentRef)
                .collect();

            let report = h.limiter.manage_partition(&chunk());
            let expected = agents.len().saturating_sub(cap);
            prop_assert_eq!(report.unoptimized_removed, expected);

            let retained: HashSet<AgentId> = h.world.agents_in(&chunk()).iter().map(|a| a.id()).collect();
            prop_assert_eq!(retained.len(), agents.len() - expected);

            let max_removed = agents
                .iter()
                .filter(|a| !retained.contains(&a.id()))
                .map(|a| priority_index(&priority, a.occupation()))
                .max();
            let min_retained = agents
                .iter()
                .filter(|a| retained.contains(&a.id()))
                .map(|a| priority_index(&priority, a.occupation()))
                .min();
            if let (Some(removed), Some(kept)) = (max_removed, min_retained) {
                prop_assert!(removed <= kept);
            }
        }
    }
}
