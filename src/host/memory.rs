// src/host/memory.rs
//! In-memory host world
//!
//! Keeps villagers, loaded chunks and per-world time in process. Chunk
//! membership is recorded in spawn order so enumeration is stable.
//!
//! With a dispatcher attached, spawn and interaction notifications run on the
//! scheduler context that owns the villager's chunk. Without one they run
//! inline on the caller.

use crate::host::{
    AgentEventListener, AgentHandle, AgentId, AgentRef, AttributeKey, AttributeStore,
    AttributeValue, HostRuntime, ListenerId, Location, Occupation, PartitionKey,
};
use crate::runtime::TaskScheduler;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attribute store backed by a locked map
#[derive(Debug, Default)]
pub struct MemoryAttributes {
    values: RwLock<HashMap<AttributeKey, AttributeValue>>,
}

impl MemoryAttributes {
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Copy of every stored attribute
    pub fn snapshot(&self) -> HashMap<AttributeKey, AttributeValue> {
        self.values.read().clone()
    }
}

impl AttributeStore for MemoryAttributes {
    fn get(&self, key: &AttributeKey) -> Option<AttributeValue> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &AttributeKey, value: AttributeValue) {
        self.values.write().insert(*key, value);
    }

    fn remove(&self, key: &AttributeKey) {
        self.values.write().remove(key);
    }
}

/// A villager living in a [`MemoryWorld`]
#[derive(Debug)]
pub struct MemoryAgent {
    id: AgentId,
    occupation: RwLock<Occupation>,
    experience: AtomicU32,
    trading: AtomicBool,
    attributes: MemoryAttributes,
    location: Location,
    world_time: Arc<AtomicI64>,
    aware: AtomicBool,
    ai: AtomicBool,
    recipe_uses: Mutex<Vec<u32>>,
    removed: AtomicBool,
}

impl MemoryAgent {
    pub fn set_occupation(&self, occupation: Occupation) {
        *self.occupation.write() = occupation;
    }

    pub fn set_experience(&self, experience: u32) {
        self.experience.store(experience, Ordering::Relaxed);
    }

    pub fn set_trading(&self, trading: bool) {
        self.trading.store(trading, Ordering::SeqCst);
    }

    pub fn memory_attributes(&self) -> &MemoryAttributes {
        &self.attributes
    }

    pub fn set_recipe_uses(&self, uses: Vec<u32>) {
        *self.recipe_uses.lock() = uses;
    }

    pub fn recipe_uses(&self) -> Vec<u32> {
        self.recipe_uses.lock().clone()
    }
}

impl AgentHandle for MemoryAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn occupation(&self) -> Occupation {
        *self.occupation.read()
    }

    fn experience(&self) -> u32 {
        self.experience.load(Ordering::Relaxed)
    }

    fn is_trading(&self) -> bool {
        self.trading.load(Ordering::SeqCst)
    }

    fn attributes(&self) -> &dyn AttributeStore {
        &self.attributes
    }

    fn location(&self) -> Location {
        self.location.clone()
    }

    fn world_full_time(&self) -> i64 {
        self.world_time.load(Ordering::SeqCst)
    }

    fn is_aware(&self) -> bool {
        self.aware.load(Ordering::SeqCst)
    }

    fn set_aware(&self, aware: bool) {
        self.aware.store(aware, Ordering::SeqCst);
    }

    fn has_ai(&self) -> bool {
        self.ai.load(Ordering::SeqCst)
    }

    fn set_ai(&self, enabled: bool) {
        self.ai.store(enabled, Ordering::SeqCst);
    }

    fn reset_recipe_uses(&self) {
        self.recipe_uses.lock().iter_mut().for_each(|uses| *uses = 0);
    }

    fn remove(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    fn is_valid(&self) -> bool {
        !self.removed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Spawned,
    Interacted,
}

#[derive(Debug, Clone, Copy)]
struct ChunkState {
    entities_loaded: bool,
}

/// In-process [`HostRuntime`]
#[derive(Default)]
pub struct MemoryWorld {
    agents: DashMap<AgentId, Arc<MemoryAgent>>,
    chunks: RwLock<HashMap<PartitionKey, ChunkState>>,
    residents: RwLock<HashMap<PartitionKey, Vec<AgentId>>>,
    world_times: DashMap<String, Arc<AtomicI64>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn AgentEventListener>)>>,
    next_listener: AtomicU64,
    dispatcher: RwLock<Option<Arc<dyn TaskScheduler>>>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver notifications on the chunk-owning context of `scheduler`
    pub fn set_dispatcher(&self, scheduler: Arc<dyn TaskScheduler>) {
        *self.dispatcher.write() = Some(scheduler);
    }

    /// Marks a chunk as loaded, optionally without its entities
    pub fn load_partition(&self, partition: PartitionKey, entities_loaded: bool) {
        self.world_clock(&partition.world);
        self.chunks
            .write()
            .insert(partition, ChunkState { entities_loaded });
    }

    pub fn unload_partition(&self, partition: &PartitionKey) {
        self.chunks.write().remove(partition);
    }

    /// Adds a villager without notifying listeners
    pub fn insert(&self, location: Location, occupation: Occupation) -> Arc<MemoryAgent> {
        let partition = location.partition();
        let world_time = self.world_clock(&location.world);

        let agent = Arc::new(MemoryAgent {
            id: AgentId::new(),
            occupation: RwLock::new(occupation),
            experience: AtomicU32::new(0),
            trading: AtomicBool::new(false),
            attributes: MemoryAttributes::default(),
            location,
            world_time,
            aware: AtomicBool::new(true),
            ai: AtomicBool::new(true),
            recipe_uses: Mutex::new(Vec::new()),
            removed: AtomicBool::new(false),
        });

        self.chunks
            .write()
            .entry(partition.clone())
            .or_insert(ChunkState {
                entities_loaded: true,
            });
        self.residents
            .write()
            .entry(partition)
            .or_default()
            .push(agent.id);
        self.agents.insert(agent.id, Arc::clone(&agent));

        agent
    }

    /// Adds a villager and fires the spawn notification
    pub fn spawn(&self, location: Location, occupation: Occupation) -> Arc<MemoryAgent> {
        let agent = self.insert(location, occupation);
        debug!("Spawned {} villager {}", occupation, agent.id);

        let handle: AgentRef = agent.clone();
        self.notify(handle, Notification::Spawned);
        agent
    }

    /// Fires the interaction notification for a villager
    pub fn interact(&self, id: AgentId) -> bool {
        let Some(handle) = self.resolve_agent(id) else {
            return false;
        };
        self.notify(handle, Notification::Interacted);
        true
    }

    fn notify(&self, agent: AgentRef, notification: Notification) {
        let listeners = self.listener_snapshot();
        if listeners.is_empty() {
            return;
        }
        let partition = agent.partition();
        let deliver = move || {
            for listener in &listeners {
                match notification {
                    Notification::Spawned => listener.on_agent_spawned(&agent),
                    Notification::Interacted => listener.on_agent_interacted(&agent),
                }
            }
        };

        let dispatcher = self.dispatcher.read().clone();
        match dispatcher {
            Some(scheduler) => {
                if let Err(e) = scheduler.run_at_partition(&partition, Box::new(deliver)) {
                    warn!("Dropping villager notification for {}: {}", partition, e);
                }
            }
            None => deliver(),
        }
    }

    pub fn set_full_time(&self, world: &str, ticks: i64) {
        self.world_clock(world).store(ticks, Ordering::SeqCst);
    }

    pub fn advance_time(&self, world: &str, ticks: i64) {
        self.world_clock(world).fetch_add(ticks, Ordering::SeqCst);
    }

    /// Number of villagers not yet removed
    pub fn population(&self) -> usize {
        self.agents.iter().filter(|a| a.value().is_valid()).count()
    }

    /// Drops removed villagers from every index
    pub fn purge_removed(&self) -> usize {
        let removed: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|a| !a.value().is_valid())
            .map(|a| *a.key())
            .collect();

        for id in &removed {
            self.agents.remove(id);
        }
        let mut residents = self.residents.write();
        for ids in residents.values_mut() {
            ids.retain(|id| !removed.contains(id));
        }
        removed.len()
    }

    fn world_clock(&self, world: &str) -> Arc<AtomicI64> {
        self.world_times
            .entry(world.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone()
    }

    fn listener_snapshot(&self) -> Vec<Arc<dyn AgentEventListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }
}

impl HostRuntime for MemoryWorld {
    fn worlds(&self) -> Vec<String> {
        let mut worlds: Vec<String> = self.world_times.iter().map(|w| w.key().clone()).collect();
        worlds.sort();
        worlds
    }

    fn loaded_partitions(&self, world: &str) -> Vec<PartitionKey> {
        self.chunks
            .read()
            .keys()
            .filter(|p| p.world == world)
            .cloned()
            .collect()
    }

    fn is_entities_loaded(&self, partition: &PartitionKey) -> bool {
        self.chunks
            .read()
            .get(partition)
            .map_or(false, |c| c.entities_loaded)
    }

    fn agents_in(&self, partition: &PartitionKey) -> Vec<AgentRef> {
        let residents = self.residents.read();
        let Some(ids) = residents.get(partition) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.agents.get(id).map(|a| Arc::clone(a.value())))
            .filter(|a| a.is_valid())
            .map(|a| a as AgentRef)
            .collect()
    }

    fn resolve_agent(&self, id: AgentId) -> Option<AgentRef> {
        self.agents
            .get(&id)
            .map(|a| Arc::clone(a.value()))
            .filter(|a| a.is_valid())
            .map(|a| a as AgentRef)
    }

    fn subscribe(&self, listener: Arc<dyn AgentEventListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }
}
