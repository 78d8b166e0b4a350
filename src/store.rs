use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;

/// Number of lock-striped partitions. The shard index is the low byte of the
/// key hash, so this must stay at 256.
const NUM_SHARDS: usize = 256;

/// A record owned by a shard.
pub(crate) struct StoreItem<V> {
    pub conflict: u64,
    pub value: V,
    pub expiration: Option<SystemTime>,
}

/// Concurrent map from key hash to value plus metadata, striped over 256
/// reader/writer locks. A probe whose conflict tag disagrees with the stored
/// tag reports a miss; bounded false negatives are the price of never
/// chaining inside a shard.
pub(crate) struct ShardedMap<V> {
    shards: Vec<RwLock<HashMap<u64, StoreItem<V>>>>,
}

impl<V> ShardedMap<V> {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(NUM_SHARDS);
        for _ in 0..NUM_SHARDS {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self { shards }
    }

    fn shard(&self, key: u64) -> &RwLock<HashMap<u64, StoreItem<V>>> {
        &self.shards[(key & 0xff) as usize]
    }

    /// True when the key is present and the conflict tag agrees. Expired
    /// entries still count: until the sweeper removes them they remain
    /// updatable in place.
    pub fn contains(&self, key: u64, conflict: u64) -> bool {
        let shard = self.shard(key).read();
        match shard.get(&key) {
            Some(item) => tag_matches(item.conflict, conflict),
            None => false,
        }
    }

    /// Unconditional write; a new owner wins any collision on `key`.
    pub fn set(&self, key: u64, conflict: u64, value: V, expiration: Option<SystemTime>) {
        let mut shard = self.shard(key).write();
        shard.insert(key, StoreItem { conflict, value, expiration });
    }

    /// Writes only when the key exists and the conflict tag agrees.
    pub fn update(&self, key: u64, conflict: u64, value: V, expiration: Option<SystemTime>) -> bool {
        let mut shard = self.shard(key).write();
        match shard.get_mut(&key) {
            Some(item) if tag_matches(item.conflict, conflict) => {
                item.value = value;
                item.expiration = expiration;
                true
            }
            _ => false,
        }
    }

    /// Removes the entry, returning the stored conflict tag and value.
    /// A probe conflict of zero matches any stored tag.
    pub fn del(&self, key: u64, conflict: u64) -> Option<(u64, V)> {
        let mut shard = self.shard(key).write();
        let matches = shard.get(&key).is_some_and(|item| tag_matches(item.conflict, conflict));
        if !matches {
            return None;
        }
        let item = shard.remove(&key)?;
        Some((item.conflict, item.value))
    }

    /// Expiration of the stored entry, if any is set.
    pub fn expiration(&self, key: u64) -> Option<SystemTime> {
        self.shard(key).read().get(&key).and_then(|item| item.expiration)
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            *shard.write() = HashMap::new();
        }
    }
}

impl<V: Clone> ShardedMap<V> {
    /// Shared-lock lookup. Expired entries report a miss; physical removal is
    /// left to the expiration sweeper.
    pub fn get(&self, key: u64, conflict: u64) -> Option<V> {
        let shard = self.shard(key).read();
        let item = shard.get(&key)?;
        if !tag_matches(item.conflict, conflict) || is_expired(item.expiration) {
            return None;
        }
        Some(item.value.clone())
    }
}

/// A probe tag of zero is a wildcard; otherwise the tags must agree.
fn tag_matches(stored: u64, probe: u64) -> bool {
    probe == 0 || stored == probe
}

fn is_expired(expiration: Option<SystemTime>) -> bool {
    expiration.is_some_and(|at| SystemTime::now() > at)
}
