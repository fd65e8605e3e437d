// src/utils/config.rs
//! Optimizer configuration
//!
//! Loaded from an optional `villager-optimizer.{toml,yaml,json}` file and
//! overridden by `VILLAGER_OPTIMIZER__SECTION__KEY` environment variables.
//! File keys are kebab-case; environment keys use underscores.

use crate::limiter::{parse_priority, PopulationLimitConfig, DEFAULT_REMOVAL_PRIORITY};
use crate::utils::errors::{OptimizerError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_FILE: &str = "villager-optimizer";
const ENV_PREFIX: &str = "VILLAGER_OPTIMIZER";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OptimizerConfig {
    pub general: GeneralConfig,
    pub optimization: OptimizationConfig,
    pub restock: RestockConfig,
    #[serde(alias = "level_up")]
    pub level_up: LevelUpConfig,
    #[serde(alias = "villager_chunk_limit")]
    pub villager_chunk_limit: ChunkLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GeneralConfig {
    /// Read the foreign attribute namespace as well
    #[serde(alias = "support_other_plugins")]
    pub support_other_plugins: bool,

    #[serde(alias = "cache_keep_time_seconds")]
    pub cache_keep_time_seconds: u64,

    /// Interval between attempts of a deferred optimization change
    #[serde(alias = "retry_interval_millis")]
    pub retry_interval_millis: u64,

    /// Scheduler lanes (0 = available parallelism)
    #[serde(alias = "worker_lanes")]
    pub worker_lanes: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            support_other_plugins: false,
            cache_keep_time_seconds: 30,
            retry_interval_millis: 1000,
            worker_lanes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OptimizationConfig {
    #[serde(alias = "cooldown_millis")]
    pub cooldown_millis: i64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            cooldown_millis: 600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RestockConfig {
    #[serde(alias = "cooldown_ticks")]
    pub cooldown_ticks: i64,
}

impl Default for RestockConfig {
    fn default() -> Self {
        Self {
            cooldown_ticks: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LevelUpConfig {
    #[serde(alias = "cooldown_ticks")]
    pub cooldown_ticks: i64,
}

impl Default for LevelUpConfig {
    fn default() -> Self {
        Self { cooldown_ticks: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChunkLimitConfig {
    pub enable: bool,

    #[serde(alias = "check_period_in_ticks")]
    pub check_period_in_ticks: u64,

    #[serde(alias = "skip_if_chunk_has_not_loaded_entities")]
    pub skip_if_chunk_has_not_loaded_entities: bool,

    #[serde(alias = "log_removals")]
    pub log_removals: bool,

    pub unoptimized: ClassLimitConfig,

    pub optimized: ClassLimitConfig,
}

impl Default for ChunkLimitConfig {
    fn default() -> Self {
        Self {
            enable: false,
            check_period_in_ticks: 600,
            skip_if_chunk_has_not_loaded_entities: true,
            log_removals: false,
            unoptimized: ClassLimitConfig::with_max(20),
            optimized: ClassLimitConfig::with_max(60),
        }
    }
}

impl ChunkLimitConfig {
    pub fn is_enabled(&self) -> bool {
        self.enable
    }
}

/// Cap and removal order for one class of villagers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClassLimitConfig {
    #[serde(alias = "max_per_chunk")]
    pub max_per_chunk: usize,

    /// Profession names, removed first to last
    #[serde(alias = "removal_priority")]
    pub removal_priority: Vec<String>,
}

impl ClassLimitConfig {
    fn with_max(max_per_chunk: usize) -> Self {
        Self {
            max_per_chunk,
            removal_priority: DEFAULT_REMOVAL_PRIORITY
                .iter()
                .map(|o| o.name().to_string())
                .collect(),
        }
    }
}

impl Default for ClassLimitConfig {
    fn default() -> Self {
        Self::with_max(20)
    }
}

impl OptimizerConfig {
    /// Load from `villager-optimizer.*` in the working directory, if present
    pub fn load() -> Result<Self> {
        Self::build(File::with_name(DEFAULT_FILE).required(false))
    }

    /// Load from an explicit file, which must exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("villager_chunk_limit.unoptimized.removal_priority")
            .with_list_parse_key("villager_chunk_limit.optimized.removal_priority");

        let config: OptimizerConfig = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the optimizer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.villager_chunk_limit.check_period_in_ticks == 0 {
            return Err(OptimizerError::InvalidConfig(
                "villager-chunk-limit.check-period-in-ticks must be greater than 0".to_string(),
            ));
        }
        if self.general.cache_keep_time_seconds == 0 {
            return Err(OptimizerError::InvalidConfig(
                "general.cache-keep-time-seconds must be greater than 0".to_string(),
            ));
        }
        if self.general.retry_interval_millis == 0 {
            return Err(OptimizerError::InvalidConfig(
                "general.retry-interval-millis must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_keep_time(&self) -> Duration {
        Duration::from_secs(self.general.cache_keep_time_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.general.retry_interval_millis)
    }

    /// Typed limiter settings; unknown professions are dropped with a warning
    pub fn limit_config(&self) -> PopulationLimitConfig {
        let limit = &self.villager_chunk_limit;
        PopulationLimitConfig {
            check_period_ticks: limit.check_period_in_ticks,
            skip_unloaded_entity_chunks: limit.skip_if_chunk_has_not_loaded_entities,
            max_unoptimized_per_chunk: limit.unoptimized.max_per_chunk,
            max_optimized_per_chunk: limit.optimized.max_per_chunk,
            unoptimized_removal_priority: parse_priority(
                &limit.unoptimized.removal_priority,
                "villager-chunk-limit.unoptimized.removal-priority",
            ),
            optimized_removal_priority: parse_priority(
                &limit.optimized.removal_priority,
                "villager-chunk-limit.optimized.removal-priority",
            ),
            log_removals: limit.log_removals,
        }
    }
}
