use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::cache::config::{Config, CostFn, KeyToHashFn, OnEvictFn};
use crate::cache::metrics::{Metrics, MetricsSnapshot};
use crate::errors::CacheError;
use crate::policy::{LfuPolicy, Victim};
use crate::ring::{RingBuffer, RingConsumer};
use crate::store::ShardedMap;
use crate::ttl::{ExpirationMap, BUCKET_SECS};
use crate::utils::hash::key_to_hash;
use crate::utils::num::i64_to_u64_saturating_nonnegative;

/// Capacity of the set-buffer. A full buffer pushes back by failing `set`.
const SET_BUF_SIZE: usize = 32 * 1024;

/// How a buffered item is applied by the writer task.
enum ItemFlag {
    New,
    Update,
    Delete,
    Wait,
}

/// The unit flowing from the public surface to the writer task.
struct Item<V> {
    flag: ItemFlag,
    key: u64,
    conflict: u64,
    value: Option<V>,
    cost: i64,
    expiration: Option<SystemTime>,
    ack: Option<Sender<()>>,
}

struct WriterHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Concurrent, cost-bounded cache with TinyLFU admission.
///
/// Lookups go straight to the sharded store and leave their access trace in a
/// lossy ring. Mutations are buffered and applied by a single writer task, so
/// every admission and eviction decision is serialized; capacity is therefore
/// approximate within one admission window, never exact.
pub struct Cache<K, V> {
    store: Arc<ShardedMap<V>>,
    policy: Arc<LfuPolicy>,
    ring: RingBuffer,
    ttl: Arc<ExpirationMap>,
    set_tx: Sender<Item<V>>,
    set_rx: Receiver<Item<V>>,
    writer: Mutex<Option<WriterHandle>>,
    closed: AtomicBool,
    metrics: Option<Arc<Metrics>>,
    on_evict: Option<Arc<OnEvictFn<V>>>,
    key_to_hash: Option<Arc<KeyToHashFn<K>>>,
    cost_fn: Option<Arc<CostFn<V>>>,
}

impl<K, V> Cache<K, V>
where
    K: Hash,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: Config<K, V>) -> Result<Self, CacheError> {
        config.validate()?;
        let metrics = config.metrics.then(|| Arc::new(Metrics::default()));
        let store = Arc::new(ShardedMap::new());
        let policy = LfuPolicy::new(config.num_counters, config.max_cost, metrics.clone());
        let ring =
            RingBuffer::new(Arc::clone(&policy) as Arc<dyn RingConsumer>, config.buffer_items);
        let ttl = Arc::new(ExpirationMap::new());
        let (set_tx, set_rx) = bounded(SET_BUF_SIZE);

        let cache = Self {
            store,
            policy,
            ring,
            ttl,
            set_tx,
            set_rx,
            writer: Mutex::new(None),
            closed: AtomicBool::new(false),
            metrics,
            on_evict: config.on_evict,
            key_to_hash: config.key_to_hash,
            cost_fn: config.cost,
        };
        *cache.writer.lock() = Some(cache.start_writer());
        Ok(cache)
    }

    /// Looks up a key. The access is recorded in the ring on hit and miss
    /// alike: frequency tracks interest, not success.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let (key_hash, conflict) = self.hash(key);
        self.ring.push(key_hash);
        let value = self.store.get(key_hash, conflict);
        if let Some(m) = &self.metrics {
            if value.is_some() {
                Metrics::count(&m.hits, 1);
            } else {
                Metrics::count(&m.misses, 1);
            }
        }
        value
    }

    /// Buffers an insert or update. Returns whether the item was accepted
    /// into the buffer; admission itself is asynchronous, so a `true` here
    /// does not guarantee residency.
    pub fn set(&self, key: &K, value: V, cost: i64) -> bool {
        self.set_with_ttl(key, value, cost, Duration::ZERO)
    }

    /// Like [`set`](Self::set) with a relative time-to-live. A zero `ttl`
    /// never expires. Expiration is bucketed at five-second granularity;
    /// removal may lag the instant by up to two buckets.
    pub fn set_with_ttl(&self, key: &K, value: V, cost: i64, ttl: Duration) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let expiration = (ttl > Duration::ZERO).then(|| SystemTime::now() + ttl);
        let (key_hash, conflict) = self.hash(key);
        let cost = if cost == 0 {
            match &self.cost_fn {
                Some(cost_fn) => cost_fn(&value),
                // Zero-cost entries would unbound the entry count.
                None => 1,
            }
        } else {
            cost
        };
        let flag = if self.store.contains(key_hash, conflict) {
            ItemFlag::Update
        } else {
            ItemFlag::New
        };
        let item = Item {
            flag,
            key: key_hash,
            conflict,
            value: Some(value),
            cost,
            expiration,
            ack: None,
        };
        match self.set_tx.try_send(item) {
            Ok(()) => true,
            Err(_) => {
                if let Some(m) = &self.metrics {
                    Metrics::count(&m.sets_dropped, 1);
                }
                false
            }
        }
    }

    /// Buffers a delete. Unlike lossy access metadata, deletes are never
    /// dropped; the send waits for buffer room if it must.
    pub fn del(&self, key: &K) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let (key_hash, conflict) = self.hash(key);
        let item = Item {
            flag: ItemFlag::Delete,
            key: key_hash,
            conflict,
            value: None,
            cost: 0,
            expiration: None,
            ack: None,
        };
        let _ = self.set_tx.send(item);
    }

    /// Blocks until every mutation buffered before this call has been
    /// applied by the writer task.
    pub fn wait(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let (ack_tx, ack_rx) = bounded(1);
        let mut item = Item {
            flag: ItemFlag::Wait,
            key: 0,
            conflict: 0,
            value: None,
            cost: 0,
            expiration: None,
            ack: Some(ack_tx),
        };
        loop {
            match self.set_tx.try_send(item) {
                Ok(()) => {
                    let _ = ack_rx.recv();
                    return;
                }
                Err(TrySendError::Full(returned)) => {
                    if self.closed.load(Ordering::Acquire) {
                        return;
                    }
                    item = returned;
                    std::thread::yield_now();
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Wipes everything: store, policy frequencies and costs, pending
    /// expirations and metrics. The writer is stopped for the duration so no
    /// in-flight mutation lands behind the wipe.
    pub fn clear(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut writer = self.writer.lock();
        if let Some(w) = writer.take() {
            let _ = w.stop_tx.send(());
            let _ = w.handle.join();
        }
        self.drain_set_buf();
        self.policy.clear();
        self.store.clear();
        self.ttl.clear();
        if let Some(m) = &self.metrics {
            m.clear();
        }
        *writer = Some(self.start_writer());
        log::debug!("cache cleared");
    }

    /// Stops the writer and policy tasks. Idempotent; all operations after
    /// close are no-ops (gets report misses).
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock();
        if let Some(w) = writer.take() {
            let _ = w.stop_tx.send(());
            let _ = w.handle.join();
        }
        self.drain_set_buf();
        self.policy.close();
        log::debug!("cache closed");
    }

    /// Snapshot of the counters, when metrics were enabled.
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(|m| m.snapshot())
    }

    /// Remaining cost headroom as last observed by the policy.
    pub fn remaining_cost(&self) -> i64 {
        self.policy.cap()
    }

    fn hash(&self, key: &K) -> (u64, u64) {
        match &self.key_to_hash {
            Some(hasher) => hasher(key),
            None => key_to_hash(key),
        }
    }

    /// Discards buffered items, answering any waiters so they do not hang.
    fn drain_set_buf(&self) {
        while let Ok(item) = self.set_rx.try_recv() {
            if let Some(ack) = item.ack {
                let _ = ack.send(());
            }
        }
    }

    fn start_writer(&self) -> WriterHandle {
        let (stop_tx, stop_rx) = bounded(1);
        let writer = Writer {
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            ttl: Arc::clone(&self.ttl),
            metrics: self.metrics.clone(),
            on_evict: self.on_evict.clone(),
        };
        let set_rx = self.set_rx.clone();
        let handle = std::thread::spawn(move || writer.run(&set_rx, &stop_rx));
        WriterHandle { stop_tx, handle }
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(w) = self.writer.lock().take() {
            let _ = w.stop_tx.send(());
            let _ = w.handle.join();
        }
        self.policy.close();
    }
}

/// The single task that owns every policy, store and expiration mutation
/// coming from the public surface.
struct Writer<V> {
    store: Arc<ShardedMap<V>>,
    policy: Arc<LfuPolicy>,
    ttl: Arc<ExpirationMap>,
    metrics: Option<Arc<Metrics>>,
    on_evict: Option<Arc<OnEvictFn<V>>>,
}

impl<V: Send + Sync + 'static> Writer<V> {
    fn run(&self, set_rx: &Receiver<Item<V>>, stop_rx: &Receiver<()>) {
        let sweep = tick(Duration::from_millis(BUCKET_SECS * 1000 / 2));
        loop {
            select! {
                recv(set_rx) -> item => match item {
                    Ok(item) => self.apply(item),
                    Err(_) => break,
                },
                recv(sweep) -> _ => self.sweep_expired(SystemTime::now()),
                recv(stop_rx) -> _ => break,
            }
        }
    }

    fn apply(&self, item: Item<V>) {
        match item.flag {
            ItemFlag::New | ItemFlag::Update => self.apply_set(item),
            ItemFlag::Delete => {
                // A mismatched conflict tag makes the whole delete a no-op;
                // the resident entry belongs to someone else.
                if !self.store.contains(item.key, item.conflict) {
                    return;
                }
                let expiration = self.store.expiration(item.key);
                self.ttl.del(item.key, expiration);
                self.policy.del(item.key);
                self.store.del(item.key, item.conflict);
            }
            ItemFlag::Wait => {
                if let Some(ack) = item.ack {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn apply_set(&self, item: Item<V>) {
        let Some(value) = item.value else { return };
        match item.flag {
            ItemFlag::Update => {
                // Re-validate against the store: the entry may have been
                // evicted or deleted since the caller probed it.
                let old = self.store.expiration(item.key);
                if !self.store.update(item.key, item.conflict, value, item.expiration) {
                    return;
                }
                self.ttl.update(item.key, item.conflict, old, item.expiration);
                let victims = self.policy.update(item.key, item.cost);
                if let Some(m) = &self.metrics {
                    Metrics::count(&m.keys_updated, 1);
                }
                self.remove_victims(victims);
            }
            _ => {
                let (victims, added) = self.policy.add(item.key, item.cost);
                if added {
                    self.store.set(item.key, item.conflict, value, item.expiration);
                    self.ttl.add(item.key, item.conflict, item.expiration);
                    if let Some(m) = &self.metrics {
                        Metrics::count(&m.keys_added, 1);
                        Metrics::count(&m.cost_added, i64_to_u64_saturating_nonnegative(item.cost));
                    }
                } else if self.policy.cost(item.key).is_some() {
                    // The policy already tracks this key: the probe raced an
                    // earlier insert of the same key. Apply as a guarded
                    // update; a true collision fails the conflict tag and the
                    // resident value stays put.
                    let old = self.store.expiration(item.key);
                    if self.store.update(item.key, item.conflict, value, item.expiration) {
                        self.ttl.update(item.key, item.conflict, old, item.expiration);
                        if let Some(m) = &self.metrics {
                            Metrics::count(&m.keys_updated, 1);
                        }
                    }
                }
                self.remove_victims(victims);
            }
        }
    }

    /// Mirrors policy evictions in the store and fires the callback.
    fn remove_victims(&self, victims: Vec<Victim>) {
        for victim in victims {
            let expiration = self.store.expiration(victim.key);
            self.ttl.del(victim.key, expiration);
            if let Some((conflict, value)) = self.store.del(victim.key, 0) {
                if let Some(m) = &self.metrics {
                    Metrics::count(&m.keys_evicted, 1);
                    Metrics::count(
                        &m.cost_evicted,
                        i64_to_u64_saturating_nonnegative(victim.cost),
                    );
                }
                self.notify_evict(victim.key, conflict, value, victim.cost);
            }
        }
    }

    fn sweep_expired(&self, now: SystemTime) {
        log::trace!("expiration sweep tick");
        for (key, conflict) in self.ttl.cleanup(now) {
            // An entry refreshed after this bucket detached is still live.
            if self.store.expiration(key).is_some_and(|at| at > now) {
                continue;
            }
            let cost = self.policy.cost(key).unwrap_or(0);
            self.policy.del(key);
            if let Some((_, value)) = self.store.del(key, 0) {
                if let Some(m) = &self.metrics {
                    Metrics::count(&m.keys_evicted, 1);
                    Metrics::count(&m.cost_evicted, i64_to_u64_saturating_nonnegative(cost));
                }
                self.notify_evict(key, conflict, value, cost);
            }
        }
    }

    /// The callback boundary: a panicking callback is logged, never
    /// propagated into the writer task.
    fn notify_evict(&self, key: u64, conflict: u64, value: V, cost: i64) {
        if let Some(on_evict) = &self.on_evict {
            let on_evict = Arc::clone(on_evict);
            if catch_unwind(AssertUnwindSafe(move || on_evict(key, conflict, value, cost))).is_err()
            {
                log::warn!("on_evict callback panicked; cache remains operational");
            }
        }
    }
}
