// src/main.rs
//! Villager Optimizer
//!
//! Runs the optimizer against an in-memory world fed with synthetic spawns
//! and player interactions until Ctrl-C.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use villager_optimizer::host::memory::MemoryWorld;
use villager_optimizer::host::{AgentHandle, HostRuntime, Location, Occupation, PartitionKey};
use villager_optimizer::observability::{init_metrics, init_tracing};
use villager_optimizer::status::clock::SystemClock;
use villager_optimizer::{
    AgentCache, OptimizationType, OptimizerConfig, PartitionPopulationLimiter, RegionScheduler,
    StatusContext, TaskScheduler,
};

const WORLD: &str = "world";
const SEEDED_VILLAGERS: usize = 120;
const CHUNK_SPAN: i32 = 3;
const FEED_INTERVAL: Duration = Duration::from_millis(250);
const TICKS_PER_FEED: i64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let metrics = init_metrics()?;

    info!("Starting Villager Optimizer v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => OptimizerConfig::load_from(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => OptimizerConfig::load()?,
    };
    info!("Configuration loaded: {:?}", config);

    let world = Arc::new(MemoryWorld::new());
    let mut rng = StdRng::from_entropy();
    seed_world(&world, &mut rng);
    info!(
        "Seeded {} villagers across {} chunks",
        world.population(),
        world.loaded_partitions(WORLD).len()
    );

    let scheduler: Arc<dyn TaskScheduler> =
        Arc::new(RegionScheduler::new(config.general.worker_lanes));
    world.set_dispatcher(Arc::clone(&scheduler));
    let ctx = Arc::new(
        StatusContext::new(Arc::clone(&scheduler), Arc::new(SystemClock))
            .with_compat(config.general.support_other_plugins)
            .with_retry_interval(config.retry_interval()),
    );
    let cache = Arc::new(AgentCache::new(
        world.clone(),
        ctx,
        config.cache_keep_time(),
    ));

    let cleanup_cache = Arc::clone(&cache);
    let cleanup = scheduler.run_at_fixed_rate(
        config.cache_keep_time(),
        config.cache_keep_time(),
        Arc::new(move || {
            let purged = cleanup_cache.cleanup();
            debug!("Purged {} expired status entries", purged);
        }),
    )?;

    let limiter = PartitionPopulationLimiter::new(
        config.limit_config(),
        world.clone(),
        Arc::clone(&scheduler),
        Arc::clone(&cache),
    );
    if config.villager_chunk_limit.is_enabled() {
        limiter.enable()?;
    } else {
        info!("Villager chunk limit disabled in configuration");
    }

    let feed = tokio::spawn(run_feed(
        world.clone(),
        Arc::clone(&cache),
        Arc::clone(&scheduler),
        config.clone(),
        rng,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("Received shutdown signal, cleaning up...");

    feed.abort();
    limiter.disable();
    cleanup.cancel();
    scheduler.shutdown();

    match cache.dump_json() {
        Ok(dump) => debug!("Cached villager status at shutdown: {}", dump),
        Err(e) => debug!("Could not serialize cached status: {}", e),
    }
    info!(
        "Stopped with {} villagers alive, {} removed",
        world.population(),
        world.purge_removed()
    );
    debug!("Final metrics:\n{}", metrics.render());
    Ok(())
}

fn seed_world(world: &MemoryWorld, rng: &mut StdRng) {
    for x in 0..CHUNK_SPAN {
        for z in 0..CHUNK_SPAN {
            // Some chunks are loaded with their entities still pending
            world.load_partition(PartitionKey::new(WORLD, x, z), rng.gen_bool(0.9));
        }
    }
    for _ in 0..SEEDED_VILLAGERS {
        world.insert(random_location(rng), random_occupation(rng));
    }
}

fn random_location(rng: &mut StdRng) -> Location {
    let extent = f64::from(CHUNK_SPAN * 16);
    Location::new(WORLD, rng.gen_range(0.0..extent), 64.0, rng.gen_range(0.0..extent))
}

fn random_occupation(rng: &mut StdRng) -> Occupation {
    Occupation::ALL[rng.gen_range(0..Occupation::ALL.len())]
}

/// Spawns villagers and simulates players working with them
///
/// Per-villager work is handed to the lane that owns the villager's chunk.
async fn run_feed(
    world: Arc<MemoryWorld>,
    cache: Arc<AgentCache>,
    scheduler: Arc<dyn TaskScheduler>,
    config: OptimizerConfig,
    mut rng: StdRng,
) {
    let optimize_cooldown = config.optimization.cooldown_millis;
    let restock_cooldown = config.restock.cooldown_ticks;
    let mut interval = tokio::time::interval(FEED_INTERVAL);
    loop {
        interval.tick().await;
        world.advance_time(WORLD, TICKS_PER_FEED);

        if rng.gen_bool(0.5) {
            world.spawn(random_location(&mut rng), random_occupation(&mut rng));
        }

        let chunk = PartitionKey::new(
            WORLD,
            rng.gen_range(0..CHUNK_SPAN),
            rng.gen_range(0..CHUNK_SPAN),
        );
        let residents = world.agents_in(&chunk);
        if residents.is_empty() {
            continue;
        }
        let agent = Arc::clone(&residents[rng.gen_range(0..residents.len())]);
        let optimization = if rng.gen_bool(0.5) {
            OptimizationType::Workstation
        } else {
            OptimizationType::Block
        };

        let world = Arc::clone(&world);
        let cache = Arc::clone(&cache);
        let job = Box::new(move || {
            let status = cache.get_or_add(&agent);
            if !status.is_optimized() && status.can_optimize(optimize_cooldown) {
                if status.set_optimization_type(optimization).is_ok() {
                    status.save_optimize_time();
                    debug!("Optimizing villager {} by {}", agent.id(), optimization);
                }
            } else if status.is_optimized() && status.can_restock(restock_cooldown) {
                status.restock();
                status.save_restock_time();
            }
            world.interact(agent.id());
        });
        if let Err(e) = scheduler.run_at_partition(&chunk, job) {
            warn!("Stopping feed: {}", e);
            return;
        }
    }
}
