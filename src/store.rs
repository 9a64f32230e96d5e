// 🗂️ Aggregate Store - Identity key → EntityRecord, sharded by key hash
//
// Owned by exactly one writer (the merge consumer). Sharding keeps each map
// small and gives a natural seam for per-shard writers; a key always lands
// in the same shard, so two writes to one identity never race.

use crate::entities::EntityRecord;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

pub const DEFAULT_SHARD_COUNT: usize = 8;

pub struct AggregateStore {
    shards: Vec<HashMap<String, EntityRecord>>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    pub fn with_shards(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        AggregateStore {
            shards: (0..shard_count).map(|_| HashMap::new()).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index for an identity key
    pub fn shard_for(&self, identity_key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        identity_key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    pub fn get(&self, identity_key: &str) -> Option<&EntityRecord> {
        self.shards[self.shard_for(identity_key)].get(identity_key)
    }

    pub fn get_mut(&mut self, identity_key: &str) -> Option<&mut EntityRecord> {
        let shard = self.shard_for(identity_key);
        self.shards[shard].get_mut(identity_key)
    }

    pub fn contains(&self, identity_key: &str) -> bool {
        self.get(identity_key).is_some()
    }

    /// Insert keyed by the record's own identity key. Returns the record it
    /// replaced, if any.
    pub fn insert(&mut self, record: EntityRecord) -> Option<EntityRecord> {
        let shard = self.shard_for(&record.identity_key);
        self.shards[shard].insert(record.identity_key.clone(), record)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.shards.iter().flat_map(|shard| shard.values())
    }

    /// All records in discovery order
    pub fn into_snapshot(self) -> Vec<EntityRecord> {
        let mut records: Vec<EntityRecord> = self
            .shards
            .into_iter()
            .flat_map(|shard| shard.into_values())
            .collect();
        records.sort_by_key(|r| r.discovery_seq);
        records
    }
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new()
    }
}
