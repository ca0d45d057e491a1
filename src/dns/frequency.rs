use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;

/// Last two dot-separated labels, or the whole name when it has fewer.
pub fn base_domain(domain: &str) -> &str {
    match domain.rmatch_indices('.').nth(1) {
        Some((idx, _)) => &domain[idx + 1..],
        None => domain,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryFrequency {
    pub in_window: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainFrequencyRecord {
    pub total_count: u64,
    pub timestamps: Vec<u64>,
    pub last_query_time: u64,
}

impl DomainFrequencyRecord {
    /// Registers a query at `now` and prunes timestamps outside the window.
    pub fn record(&mut self, now: u64, window_us: u64) -> QueryFrequency {
        self.total_count += 1;
        self.timestamps.push(now);
        self.timestamps.retain(|&ts| now.saturating_sub(ts) < window_us);
        self.last_query_time = self.last_query_time.max(now);
        QueryFrequency {
            in_window: self.timestamps.len() as u64,
            total: self.total_count,
        }
    }
}

/// Per-base-domain query counters, sharded like the flow table.
#[derive(Debug)]
pub struct DomainFrequencyTable {
    shards: Vec<Mutex<HashMap<String, DomainFrequencyRecord>>>,
    hasher: RandomState,
    window_us: u64,
}

impl DomainFrequencyTable {
    pub fn new(shard_count: usize, window_us: u64) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards, hasher: RandomState::new(), window_us }
    }

    fn shard(&self, base: &str) -> &Mutex<HashMap<String, DomainFrequencyRecord>> {
        let idx = (self.hasher.hash_one(base) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    pub fn record_query(&self, base: &str, now: u64) -> QueryFrequency {
        let mut shard = self.shard(base).lock();
        // Avoid allocating the key on the hot path
        if let Some(rec) = shard.get_mut(base) {
            return rec.record(now, self.window_us);
        }
        shard
            .entry(base.to_string())
            .or_default()
            .record(now, self.window_us)
    }

    pub fn get(&self, base: &str) -> Option<DomainFrequencyRecord> {
        self.shard(base).lock().get(base).cloned()
    }

    /// Drops records whose last query is older than `idle_timeout_us`.
    pub fn evict(&self, now: u64, idle_timeout_us: u64) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut map = shard.lock();
                let before = map.len();
                map.retain(|_, rec| now.saturating_sub(rec.last_query_time) <= idle_timeout_us);
                before - map.len()
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
