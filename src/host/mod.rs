// src/host/mod.rs
//! Host runtime contract
//!
//! The optimizer never owns villagers, chunks or their persisted data. Everything
//! it needs from the server is consumed through the traits in this module:
//!
//! - **HostRuntime**: world/chunk enumeration, entity lookup, event subscription
//! - **AgentHandle**: a live villager reference (profession, flags, removal)
//! - **AttributeStore**: typed key/value data persisted on the villager
//!
//! [`memory::MemoryWorld`] is an in-process implementation used by the binary
//! and by tests.

pub mod memory;

use crate::utils::errors::OptimizerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use ulid::Ulid;

/// Blocks per chunk edge
pub const CHUNK_SIZE: i32 = 16;

/// Stable identity of a villager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Ulid);

impl AgentId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A chunk of a named world
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub world: String,
    pub x: i32,
    pub z: i32,
}

impl PartitionKey {
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.world, self.x, self.z)
    }
}

/// Block position of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Chunk containing this position
    pub fn partition(&self) -> PartitionKey {
        PartitionKey {
            world: self.world.clone(),
            x: (self.x.floor() as i32).div_euclid(CHUNK_SIZE),
            z: (self.z.floor() as i32).div_euclid(CHUNK_SIZE),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.1}, {:.1}, {:.1})", self.world, self.x, self.y, self.z)
    }
}

/// Villager profession
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Occupation {
    None,
    Armorer,
    Butcher,
    Cartographer,
    Cleric,
    Farmer,
    Fisherman,
    Fletcher,
    Leatherworker,
    Librarian,
    Mason,
    Nitwit,
    Shepherd,
    Toolsmith,
    Weaponsmith,
}

impl Occupation {
    pub const ALL: [Occupation; 15] = [
        Occupation::None,
        Occupation::Armorer,
        Occupation::Butcher,
        Occupation::Cartographer,
        Occupation::Cleric,
        Occupation::Farmer,
        Occupation::Fisherman,
        Occupation::Fletcher,
        Occupation::Leatherworker,
        Occupation::Librarian,
        Occupation::Mason,
        Occupation::Nitwit,
        Occupation::Shepherd,
        Occupation::Toolsmith,
        Occupation::Weaponsmith,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Occupation::None => "NONE",
            Occupation::Armorer => "ARMORER",
            Occupation::Butcher => "BUTCHER",
            Occupation::Cartographer => "CARTOGRAPHER",
            Occupation::Cleric => "CLERIC",
            Occupation::Farmer => "FARMER",
            Occupation::Fisherman => "FISHERMAN",
            Occupation::Fletcher => "FLETCHER",
            Occupation::Leatherworker => "LEATHERWORKER",
            Occupation::Librarian => "LIBRARIAN",
            Occupation::Mason => "MASON",
            Occupation::Nitwit => "NITWIT",
            Occupation::Shepherd => "SHEPHERD",
            Occupation::Toolsmith => "TOOLSMITH",
            Occupation::Weaponsmith => "WEAPONSMITH",
        }
    }
}

impl fmt::Display for Occupation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Occupation {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Occupation::ALL
            .iter()
            .copied()
            .find(|o| o.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| OptimizerError::UnknownOccupation(s.to_string()))
    }
}

/// Namespaced attribute key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub namespace: &'static str,
    pub key: &'static str,
}

impl AttributeKey {
    pub const fn new(namespace: &'static str, key: &'static str) -> Self {
        Self { namespace, key }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

/// Persisted attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Long,
    Boolean,
}

/// A persisted attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    String(String),
    Long(i64),
    Boolean(bool),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeType {
        match self {
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Long(_) => AttributeType::Long,
            AttributeValue::Boolean(_) => AttributeType::Boolean,
        }
    }
}

/// Key/value data persisted by the host on a single villager
///
/// Reads are typed: a value stored under a different type than requested
/// reads as absent.
pub trait AttributeStore: Send + Sync {
    fn get(&self, key: &AttributeKey) -> Option<AttributeValue>;

    fn set(&self, key: &AttributeKey, value: AttributeValue);

    fn remove(&self, key: &AttributeKey);

    fn has(&self, key: &AttributeKey, kind: AttributeType) -> bool {
        self.get(key).map_or(false, |v| v.kind() == kind)
    }

    fn get_string(&self, key: &AttributeKey) -> Option<String> {
        match self.get(key) {
            Some(AttributeValue::String(v)) => Some(v),
            _ => None,
        }
    }

    fn get_long(&self, key: &AttributeKey) -> Option<i64> {
        match self.get(key) {
            Some(AttributeValue::Long(v)) => Some(v),
            _ => None,
        }
    }

    fn get_bool(&self, key: &AttributeKey) -> Option<bool> {
        match self.get(key) {
            Some(AttributeValue::Boolean(v)) => Some(v),
            _ => None,
        }
    }

    fn set_string(&self, key: &AttributeKey, value: &str) {
        self.set(key, AttributeValue::String(value.to_string()));
    }

    fn set_long(&self, key: &AttributeKey, value: i64) {
        self.set(key, AttributeValue::Long(value));
    }
}

/// Live reference to a villager owned by the host
pub trait AgentHandle: Send + Sync {
    fn id(&self) -> AgentId;

    fn occupation(&self) -> Occupation;

    /// Trading experience, drives the 1-5 level
    fn experience(&self) -> u32;

    /// True while a player has the trade window open
    fn is_trading(&self) -> bool;

    fn attributes(&self) -> &dyn AttributeStore;

    fn location(&self) -> Location;

    fn partition(&self) -> PartitionKey {
        self.location().partition()
    }

    /// Full world time in ticks of the villager's world
    fn world_full_time(&self) -> i64;

    fn is_aware(&self) -> bool;

    fn set_aware(&self, aware: bool);

    fn has_ai(&self) -> bool;

    fn set_ai(&self, enabled: bool);

    /// Sets every trade recipe's use counter back to zero
    fn reset_recipe_uses(&self);

    /// Permanently deletes the villager from the world
    fn remove(&self);

    /// False once removed
    fn is_valid(&self) -> bool;
}

pub type AgentRef = Arc<dyn AgentHandle>;

/// Subscriber for villager notifications fired by the host
///
/// Hosts call both hooks on the context that owns the villager's chunk, so
/// listeners may read and mutate villagers in that chunk directly.
pub trait AgentEventListener: Send + Sync {
    fn on_agent_spawned(&self, agent: &AgentRef);

    fn on_agent_interacted(&self, agent: &AgentRef);
}

/// Identifies a registered [`AgentEventListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// World and entity access provided by the server
pub trait HostRuntime: Send + Sync {
    fn worlds(&self) -> Vec<String>;

    fn loaded_partitions(&self, world: &str) -> Vec<PartitionKey>;

    /// Whether the chunk's entities have been loaded
    fn is_entities_loaded(&self, partition: &PartitionKey) -> bool;

    /// Villagers currently resident in the chunk, in host order
    fn agents_in(&self, partition: &PartitionKey) -> Vec<AgentRef>;

    fn resolve_agent(&self, id: AgentId) -> Option<AgentRef>;

    fn subscribe(&self, listener: Arc<dyn AgentEventListener>) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId);
}
