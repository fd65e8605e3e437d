// src/status/mod.rs
//! Villager optimization status
//!
//! [`AgentStatus`] is a view over one villager's persisted attributes. It holds
//! no state of its own, so any number of views over the same villager agree
//! and a view can be rebuilt at any time.
//!
//! When compatibility is enabled, status recorded by AntiVillagerLag under its
//! own namespace is consulted as a lower-precedence fallback:
//!
//! ```text
//! optimization_type()  = native  ──(None?)──►  foreign  ──►  None
//! can_optimize()       = foreign veto  ──►  native cooldown
//! last_restock()       = max(native, foreign)
//! ```

pub mod clock;
pub mod keys;

use crate::host::{AgentHandle, AgentId, AgentRef, AttributeStore, AttributeType, Occupation};
use crate::runtime::scheduler::{RetryOutcome, TaskHandle, TaskScheduler};
use crate::utils::errors::Result;
use clock::WallClock;
use keys::{foreign, native, Namespace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How a villager was exempted from full simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizationType {
    /// Fully simulated
    None,
    Workstation,
    Block,
    Command,
}

impl OptimizationType {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizationType::None => "NONE",
            OptimizationType::Workstation => "WORKSTATION",
            OptimizationType::Block => "BLOCK",
            OptimizationType::Command => "COMMAND",
        }
    }

    /// Parses a stored native value
    ///
    /// Values written by older releases that no longer exist (e.g. `NAMETAG`)
    /// still mean the villager is optimized and resolve to `Command`.
    fn from_stored(value: &str) -> Self {
        match value {
            "NONE" => OptimizationType::None,
            "WORKSTATION" => OptimizationType::Workstation,
            "BLOCK" => OptimizationType::Block,
            "COMMAND" => OptimizationType::Command,
            other => {
                warn!("Unknown stored optimization type '{}', treating as COMMAND", other);
                OptimizationType::Command
            }
        }
    }
}

impl fmt::Display for OptimizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Level 1-5 for a trading experience value
pub fn level_for_experience(experience: u32) -> u8 {
    if experience >= 250 {
        5
    } else if experience >= 150 {
        4
    } else if experience >= 70 {
        3
    } else if experience >= 10 {
        2
    } else {
        1
    }
}

/// Shared collaborators for every status view
pub struct StatusContext {
    /// Read AntiVillagerLag data as well
    pub compat: bool,

    /// Source of wall-clock millis
    pub clock: Arc<dyn WallClock>,

    /// Runs deferred optimization changes
    pub scheduler: Arc<dyn TaskScheduler>,

    /// Interval between attempts of a deferred change
    pub retry_interval: Duration,
}

impl StatusContext {
    pub fn new(scheduler: Arc<dyn TaskScheduler>, clock: Arc<dyn WallClock>) -> Self {
        Self {
            compat: false,
            clock,
            scheduler,
            retry_interval: Duration::from_secs(1),
        }
    }

    pub fn with_compat(mut self, compat: bool) -> Self {
        self.compat = compat;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Comparable copy of a villager's derived status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub id: AgentId,
    pub occupation: Occupation,
    pub level: u8,
    pub optimization_type: OptimizationType,
    pub last_optimize: i64,
    pub last_restock: i64,
    pub last_level_up: i64,
    pub memorized_name: Option<String>,
}

/// Status view over a single villager
#[derive(Clone)]
pub struct AgentStatus {
    agent: AgentRef,
    ctx: Arc<StatusContext>,
}

impl fmt::Debug for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentStatus")
            .field("id", &self.agent.id())
            .field("compat", &self.ctx.compat)
            .finish()
    }
}

impl AgentStatus {
    pub fn new(agent: AgentRef, ctx: Arc<StatusContext>) -> Self {
        Self { agent, ctx }
    }

    pub fn id(&self) -> AgentId {
        self.agent.id()
    }

    pub fn agent(&self) -> &AgentRef {
        &self.agent
    }

    fn attrs(&self) -> &dyn AttributeStore {
        self.agent.attributes()
    }

    fn now_millis(&self) -> i64 {
        self.ctx.clock.now_millis()
    }

    /// Optimized by this crate, or by AntiVillagerLag when compatibility is on
    pub fn is_optimized(&self) -> bool {
        if !self.ctx.compat {
            return self.is_optimized_in(Namespace::Native);
        }
        Namespace::ALL.iter().any(|ns| self.is_optimized_in(*ns))
    }

    pub fn is_optimized_in(&self, namespace: Namespace) -> bool {
        match namespace {
            Namespace::Native => self.optimization_type_in(Namespace::Native) != OptimizationType::None,
            Namespace::Foreign => foreign::OPTIMIZATION_FLAGS
                .iter()
                .any(|key| self.attrs().has(key, AttributeType::String)),
        }
    }

    pub fn optimization_type(&self) -> OptimizationType {
        let native = self.optimization_type_in(Namespace::Native);
        if native != OptimizationType::None || !self.ctx.compat {
            return native;
        }
        self.optimization_type_in(Namespace::Foreign)
    }

    pub fn optimization_type_in(&self, namespace: Namespace) -> OptimizationType {
        let attrs = self.attrs();
        match namespace {
            Namespace::Native => attrs
                .get_string(&native::OPTIMIZATION_TYPE)
                .map_or(OptimizationType::None, |v| OptimizationType::from_stored(&v)),
            Namespace::Foreign => {
                if attrs.has(&foreign::OPTIMIZED_BLOCK, AttributeType::String) {
                    OptimizationType::Block
                } else if attrs.has(&foreign::OPTIMIZED_WORKSTATION, AttributeType::String) {
                    OptimizationType::Workstation
                } else if attrs.has(&foreign::OPTIMIZED_ANY, AttributeType::String) {
                    // AntiVillagerLag does not record how
                    OptimizationType::Command
                } else {
                    OptimizationType::None
                }
            }
        }
    }

    /// Schedules an optimization change on the villager's owning context
    ///
    /// The change is retried every retry interval while a player is trading
    /// with the villager and is applied exactly once afterwards.
    pub fn set_optimization_type(&self, optimization: OptimizationType) -> Result<TaskHandle> {
        let status = self.clone();
        self.ctx.scheduler.run_at_agent_timer(
            &self.agent,
            self.ctx.retry_interval,
            Box::new(move || status.try_apply_optimization(optimization)),
        )
    }

    /// One attempt of [`Self::set_optimization_type`]
    pub fn try_apply_optimization(&self, optimization: OptimizationType) -> RetryOutcome {
        if self.agent.is_trading() {
            trace!("Villager {} is trading, deferring {}", self.id(), optimization);
            return RetryOutcome::Retry;
        }
        self.apply_optimization(optimization);
        RetryOutcome::Done
    }

    fn apply_optimization(&self, optimization: OptimizationType) {
        let attrs = self.attrs();
        if optimization == OptimizationType::None {
            // Only foreign-optimized villagers have nothing native to remove
            if self.is_optimized_in(Namespace::Native) {
                attrs.remove(&native::OPTIMIZATION_TYPE);
            }
            self.agent.set_aware(true);
            self.agent.set_ai(true);
        } else {
            attrs.set_string(&native::OPTIMIZATION_TYPE, optimization.name());
            self.agent.set_aware(false);
        }
        debug!("Villager {} optimization set to {}", self.id(), optimization);
    }

    /// Whether the optimize cooldown has run out
    pub fn can_optimize(&self, cooldown_millis: i64) -> bool {
        let now = self.now_millis();
        if self.ctx.compat {
            if let Some(next_secs) = self.attrs().get_long(&foreign::NEXT_OPTIMIZATION) {
                if now <= next_secs.saturating_mul(1000) {
                    return false;
                }
            }
        }
        now > self.last_optimize().saturating_add(cooldown_millis)
    }

    /// Millis left until the villager can be optimized again, 0 if ready
    pub fn optimize_cooldown_millis(&self, cooldown_millis: i64) -> i64 {
        let now = self.now_millis();
        let mut remaining = self
            .last_optimize()
            .saturating_add(cooldown_millis)
            .saturating_sub(now);

        if self.ctx.compat {
            if let Some(next_secs) = self.attrs().get_long(&foreign::NEXT_OPTIMIZATION) {
                remaining = remaining.max(next_secs.saturating_mul(1000).saturating_sub(now));
            }
        }
        remaining.max(0)
    }

    pub fn save_optimize_time(&self) {
        self.attrs().set_long(&native::LAST_OPTIMIZE, self.now_millis());
    }

    /// Wall-clock millis of the last optimization, 0 if never
    pub fn last_optimize(&self) -> i64 {
        self.attrs().get_long(&native::LAST_OPTIMIZE).unwrap_or(0)
    }

    pub fn can_restock(&self, cooldown_ticks: i64) -> bool {
        self.last_restock().saturating_add(cooldown_ticks) <= self.agent.world_full_time()
    }

    /// Ticks left until the next restock is allowed, 0 if ready
    pub fn restock_cooldown_ticks(&self, cooldown_ticks: i64) -> i64 {
        self.last_restock()
            .saturating_add(cooldown_ticks)
            .saturating_sub(self.agent.world_full_time())
            .max(0)
    }

    /// Resets every trade recipe's use counter
    pub fn restock(&self) {
        self.agent.reset_recipe_uses();
    }

    pub fn save_restock_time(&self) {
        self.attrs()
            .set_long(&native::LAST_RESTOCK, self.agent.world_full_time());
    }

    /// World time of the latest restock recorded by either system, 0 if never
    pub fn last_restock(&self) -> i64 {
        let native_restock = self.attrs().get_long(&native::LAST_RESTOCK).unwrap_or(0);
        if !self.ctx.compat {
            return native_restock;
        }
        let foreign_restock = self.attrs().get_long(&foreign::LAST_RESTOCK).unwrap_or(0);
        native_restock.max(foreign_restock)
    }

    /// Level 1-5 from the villager's trading experience
    pub fn calculate_level(&self) -> u8 {
        level_for_experience(self.agent.experience())
    }

    pub fn can_level_up(&self, cooldown_ticks: i64) -> bool {
        if self.agent.world_full_time() < self.last_level_up().saturating_add(cooldown_ticks) {
            return false;
        }
        if self.ctx.compat {
            if let Some(next_secs) = self.attrs().get_long(&foreign::NEXT_LEVEL_UP) {
                return self.now_millis() > next_secs.saturating_mul(1000);
            }
        }
        true
    }

    /// Ticks left until the next level-up is allowed, 0 if ready
    pub fn level_up_cooldown_ticks(&self, cooldown_ticks: i64) -> i64 {
        self.last_level_up()
            .saturating_add(cooldown_ticks)
            .saturating_sub(self.agent.world_full_time())
            .max(0)
    }

    pub fn save_last_level_up(&self) {
        self.attrs()
            .set_long(&native::LAST_LEVEL_UP, self.agent.world_full_time());
    }

    /// World time of the last level-up, 0 if never
    pub fn last_level_up(&self) -> i64 {
        self.attrs().get_long(&native::LAST_LEVEL_UP).unwrap_or(0)
    }

    /// Stores the serialized display name so it can be restored later
    pub fn memorize_name(&self, serialized: &str) {
        self.attrs()
            .set_string(&native::LAST_OPTIMIZE_NAME, serialized);
    }

    pub fn memorized_name(&self) -> Option<String> {
        self.attrs().get_string(&native::LAST_OPTIMIZE_NAME)
    }

    pub fn forget_name(&self) {
        self.attrs().remove(&native::LAST_OPTIMIZE_NAME);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.id(),
            occupation: self.agent.occupation(),
            level: self.calculate_level(),
            optimization_type: self.optimization_type(),
            last_optimize: self.last_optimize(),
            last_restock: self.last_restock(),
            last_level_up: self.last_level_up(),
            memorized_name: self.memorized_name(),
        }
    }
}
