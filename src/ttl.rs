use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Width of one expiration bucket. Callers relying on sub-second TTL
/// accuracy are out of luck: removal may lag expiry by up to two widths.
pub(crate) const BUCKET_SECS: u64 = 5;

fn epoch_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Bucket an expiration instant is stored under. Offset by one so that the
/// bucket behind "now" only ever holds instants that have already passed.
fn storage_bucket(at: SystemTime) -> u64 {
    epoch_secs(at) / BUCKET_SECS + 1
}

/// Bucketed index of pending expirations: bucket number to key/conflict
/// pairs. An entry with an expiration lives in exactly one bucket; `update`
/// moves it when the expiration changes.
pub(crate) struct ExpirationMap {
    buckets: Mutex<HashMap<u64, HashMap<u64, u64>>>,
}

impl ExpirationMap {
    pub fn new() -> Self {
        Self { buckets: Mutex::new(HashMap::new()) }
    }

    pub fn add(&self, key: u64, conflict: u64, expiration: Option<SystemTime>) {
        let Some(at) = expiration else { return };
        self.buckets.lock().entry(storage_bucket(at)).or_default().insert(key, conflict);
    }

    pub fn update(
        &self,
        key: u64,
        conflict: u64,
        old: Option<SystemTime>,
        new: Option<SystemTime>,
    ) {
        let old_bucket = old.map(storage_bucket);
        let new_bucket = new.map(storage_bucket);
        let mut buckets = self.buckets.lock();
        if old_bucket != new_bucket {
            if let Some(bucket) = old_bucket {
                if let Some(pending) = buckets.get_mut(&bucket) {
                    pending.remove(&key);
                    if pending.is_empty() {
                        buckets.remove(&bucket);
                    }
                }
            }
        }
        if let Some(bucket) = new_bucket {
            buckets.entry(bucket).or_default().insert(key, conflict);
        }
    }

    pub fn del(&self, key: u64, expiration: Option<SystemTime>) {
        let Some(at) = expiration else { return };
        let mut buckets = self.buckets.lock();
        if let Some(pending) = buckets.get_mut(&storage_bucket(at)) {
            pending.remove(&key);
            if pending.is_empty() {
                buckets.remove(&storage_bucket(at));
            }
        }
    }

    /// Detaches and returns the bucket one behind `now`. Everything in it is
    /// strictly expired; per-key deletion happens outside the lock.
    pub fn cleanup(&self, now: SystemTime) -> Vec<(u64, u64)> {
        let bucket = storage_bucket(now).saturating_sub(1);
        let detached = self.buckets.lock().remove(&bucket);
        detached.map(Vec::from_iter).unwrap_or_default()
    }

    pub fn clear(&self) {
        self.buckets.lock().clear();
    }
}
