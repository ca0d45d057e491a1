use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::BuildHasher;

use super::flow::{FlowKey, FlowState};

/// One shard of the flow table. Callers hold the shard lock for the whole
/// update-and-compute step of a packet, so per-key processing is serialized.
#[derive(Debug, Default)]
pub struct FlowShard {
    flows: HashMap<FlowKey, FlowState>,
}

impl FlowShard {
    /// Returns the flow for `key`, creating it with `start = last_seen = now`.
    pub fn lookup_or_create(&mut self, key: FlowKey, now: u64) -> &mut FlowState {
        match self.flows.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(FlowState::new(now)),
        }
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    fn evict(&mut self, now: u64, timeout_us: u64) -> usize {
        let before = self.flows.len();
        self.flows
            .retain(|_, flow| now.saturating_sub(flow.last_seen_micros()) <= timeout_us);
        before - self.flows.len()
    }
}

/// Flow state table sharded by key hash. A key always hashes to the same shard.
#[derive(Debug)]
pub struct FlowTable {
    shards: Vec<Mutex<FlowShard>>,
    hasher: RandomState,
}

impl FlowTable {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(FlowShard::default()))
            .collect();
        Self { shards, hasher: RandomState::new() }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_index(&self, key: &FlowKey) -> usize {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as usize
    }

    pub fn lock_shard(&self, key: &FlowKey) -> MutexGuard<'_, FlowShard> {
        self.shards[self.shard_index(key)].lock()
    }

    /// Copy of a flow's current state.
    pub fn snapshot(&self, key: &FlowKey) -> Option<FlowState> {
        self.lock_shard(key).get(key).cloned()
    }

    /// Removes every flow idle for longer than `timeout_us`, one shard at a time.
    pub fn evict(&self, now: u64, timeout_us: u64) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().evict(now, timeout_us))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
