// src/status/keys.rs
//! Persisted attribute keys
//!
//! Native keys are owned by this crate. Foreign keys are written by
//! AntiVillagerLag and are only ever read, and only when compatibility is
//! enabled.

use crate::host::AttributeKey;

pub const NATIVE_NAMESPACE: &str = "villageroptimizer";
pub const FOREIGN_NAMESPACE: &str = "antivillagerlag";

/// Which system recorded a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Written by this crate
    Native,
    /// Written by AntiVillagerLag, read-only
    Foreign,
}

impl Namespace {
    /// Resolution order, native first
    pub const ALL: [Namespace; 2] = [Namespace::Native, Namespace::Foreign];
}

pub mod native {
    use super::*;

    /// String enum name of the optimization type
    pub const OPTIMIZATION_TYPE: AttributeKey = AttributeKey::new(NATIVE_NAMESPACE, "optimization-type");
    /// Wall-clock millis
    pub const LAST_OPTIMIZE: AttributeKey = AttributeKey::new(NATIVE_NAMESPACE, "last-optimize");
    /// World full time in ticks
    pub const LAST_RESTOCK: AttributeKey = AttributeKey::new(NATIVE_NAMESPACE, "last-restock");
    /// World full time in ticks
    pub const LAST_LEVEL_UP: AttributeKey = AttributeKey::new(NATIVE_NAMESPACE, "last-levelup");
    /// Serialized rich-text name
    pub const LAST_OPTIMIZE_NAME: AttributeKey = AttributeKey::new(NATIVE_NAMESPACE, "last-optimize-name");
}

pub mod foreign {
    use super::*;

    /// Optimized, method unknown
    pub const OPTIMIZED_ANY: AttributeKey = AttributeKey::new(FOREIGN_NAMESPACE, "marker");
    pub const OPTIMIZED_BLOCK: AttributeKey = AttributeKey::new(FOREIGN_NAMESPACE, "disabledbyblock");
    pub const OPTIMIZED_WORKSTATION: AttributeKey = AttributeKey::new(FOREIGN_NAMESPACE, "disabledbyworkstation");
    /// Epoch seconds
    pub const NEXT_OPTIMIZATION: AttributeKey = AttributeKey::new(FOREIGN_NAMESPACE, "cooldown");
    /// Epoch seconds
    pub const NEXT_LEVEL_UP: AttributeKey = AttributeKey::new(FOREIGN_NAMESPACE, "levelcooldown");
    /// World full time in ticks
    pub const LAST_RESTOCK: AttributeKey = AttributeKey::new(FOREIGN_NAMESPACE, "time");

    pub const OPTIMIZATION_FLAGS: [AttributeKey; 3] = [OPTIMIZED_ANY, OPTIMIZED_WORKSTATION, OPTIMIZED_BLOCK];
}
