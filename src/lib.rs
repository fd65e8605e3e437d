// src/lib.rs
//! Villager Optimizer Library
//!
//! Tracks per-villager optimization state on top of a host world and keeps
//! the number of villagers per chunk under configurable caps.
//!
//! # Architecture
//!
//! - **host**: Contract with the host world (villagers, chunks, attributes, events)
//! - **runtime**: Chunk-affine task scheduling, fixed-rate and retry timers
//! - **status**: Persisted optimization state and cooldown bookkeeping per villager
//! - **cache**: Expire-after-write cache of status views
//! - **limiter**: Periodic per-chunk population limit
//! - **observability**: Tracing and metrics
//! - **utils**: Configuration and errors

pub mod cache;
pub mod host;
pub mod limiter;
pub mod observability;
pub mod runtime;
pub mod status;
pub mod utils;

// Re-export commonly used types
pub use cache::AgentCache;
pub use host::{AgentHandle, AgentId, AgentRef, HostRuntime, Occupation, PartitionKey};
pub use limiter::{EvictionReport, PartitionPopulationLimiter, PopulationLimitConfig};
pub use runtime::{RegionScheduler, TaskHandle, TaskScheduler};
pub use status::{AgentStatus, OptimizationType, StatusContext, StatusSnapshot};
pub use utils::config::OptimizerConfig;
pub use utils::errors::{OptimizerError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryWorld;
    use crate::host::Location;
    use crate::status::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[tokio::test]
    async fn test_components_wire_together() {
        let config = OptimizerConfig::default();
        let world = Arc::new(MemoryWorld::new());
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(RegionScheduler::new(2));
        let ctx = Arc::new(
            StatusContext::new(scheduler.clone(), Arc::new(ManualClock::new(1_000_000)))
                .with_compat(config.general.support_other_plugins)
                .with_retry_interval(config.retry_interval()),
        );
        let cache = Arc::new(AgentCache::new(world.clone(), ctx, config.cache_keep_time()));
        let limiter = PartitionPopulationLimiter::new(
            PopulationLimitConfig {
                max_optimized_per_chunk: 1,
                ..config.limit_config()
            },
            world.clone(),
            scheduler.clone(),
            cache.clone(),
        );

        let location = Location::new("world", 4.0, 70.0, -4.0);
        for _ in 0..2 {
            let agent: AgentRef = world.insert(location.clone(), Occupation::Toolsmith);
            let status = cache.get_or_add(&agent);
            assert!(status.can_optimize(config.optimization.cooldown_millis));
            status.try_apply_optimization(OptimizationType::Block);
            status.save_optimize_time();
        }

        let report = limiter.manage_partition(&location.partition());
        assert_eq!(report.optimized_removed, 1);
        assert_eq!(world.population(), 1);
        scheduler.shutdown();
    }
}
