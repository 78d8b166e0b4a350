use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::ThreadRng;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::bloom::Doorkeeper;
use crate::cache::Metrics;
use crate::ring::RingConsumer;
use crate::sketch::CmSketch;
use crate::utils::num::usize_to_u64;

/// Eviction candidates drawn per round.
const SAMPLE_SIZE: usize = 5;
/// Access batches buffered between the ring and the consumer task.
const BATCH_CHANNEL_CAP: usize = 3;

/// A resident entry chosen for eviction; the coordinator mirrors the removal
/// in the store and fires the eviction callback.
pub(crate) struct Victim {
    pub key: u64,
    pub cost: i64,
}

/// TinyLFU admission plus sampled LFU eviction.
///
/// All frequency and cost state sits behind one mutex. Access batches arrive
/// on a small bounded channel and are applied by a dedicated consumer thread;
/// admission calls come from the coordinator's writer task. Those two are the
/// only writers, so the mutex is effectively uncontended.
pub(crate) struct LfuPolicy {
    inner: Arc<Mutex<PolicyInner>>,
    batch_tx: Sender<Vec<u64>>,
    batch_rx: Receiver<Vec<u64>>,
    stop_tx: Sender<()>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<Metrics>>,
}

struct PolicyInner {
    admit: TinyLfu,
    evict: SampledLfu,
}

impl LfuPolicy {
    pub fn new(num_counters: u64, max_cost: i64, metrics: Option<Arc<Metrics>>) -> Arc<Self> {
        let inner = Arc::new(Mutex::new(PolicyInner {
            admit: TinyLfu::new(num_counters),
            evict: SampledLfu::new(max_cost),
        }));
        let (batch_tx, batch_rx) = bounded(BATCH_CHANNEL_CAP);
        let (stop_tx, stop_rx) = bounded(1);

        let consumer = std::thread::spawn({
            let inner = Arc::clone(&inner);
            let batch_rx = batch_rx.clone();
            move || loop {
                select! {
                    recv(batch_rx) -> batch => match batch {
                        Ok(keys) => {
                            let mut inner = inner.lock();
                            for key in keys {
                                inner.admit.increment(key);
                            }
                        }
                        Err(_) => break,
                    },
                    recv(stop_rx) -> _ => break,
                }
            }
        });

        Arc::new(Self {
            inner,
            batch_tx,
            batch_rx,
            stop_tx,
            consumer: Mutex::new(Some(consumer)),
            metrics,
        })
    }

    /// Lossy ingest of one access batch. Never blocks; a busy consumer costs
    /// a dropped batch, not a stall.
    pub fn push(&self, keys: &[u64]) -> bool {
        if keys.is_empty() {
            return true;
        }
        let len = usize_to_u64(keys.len());
        match self.batch_tx.try_send(keys.to_vec()) {
            Ok(()) => {
                if let Some(m) = &self.metrics {
                    Metrics::count(&m.gets_kept, len);
                }
                true
            }
            Err(_) => {
                if let Some(m) = &self.metrics {
                    Metrics::count(&m.gets_dropped, len);
                }
                false
            }
        }
    }

    /// Admission decision for a new key.
    ///
    /// Returns the victims that had to leave and whether the key was
    /// admitted. A key that is already resident gets its cost refreshed and
    /// reports `false`: the caller must not overwrite the stored value, which
    /// may belong to a different conflict tag.
    pub fn add(&self, key: u64, cost: i64) -> (Vec<Victim>, bool) {
        let mut inner = self.inner.lock();

        if inner.evict.update_if_has(key, cost) {
            let victims = Self::shed(&mut inner);
            return (victims, false);
        }

        // Never cacheable.
        if cost > inner.evict.max_cost {
            if let Some(m) = &self.metrics {
                Metrics::count(&m.sets_rejected, 1);
            }
            return (Vec::new(), false);
        }

        if inner.evict.room_left(cost) >= 0 {
            inner.evict.add(key, cost);
            return (Vec::new(), true);
        }

        // Full: evict sampled low-frequency residents, but only if the
        // incoming key is at least as hot as the coldest candidate.
        let incoming = inner.admit.estimate(key);
        let mut victims = Vec::new();
        let mut rng = rand::rng();
        while inner.evict.room_left(cost) < 0 {
            let sample = inner.evict.sample(&mut rng);
            let Some((victim, victim_hits)) = Self::coldest(&inner.admit, &sample) else {
                break;
            };
            if incoming < victim_hits {
                if let Some(m) = &self.metrics {
                    Metrics::count(&m.sets_rejected, 1);
                }
                return (victims, false);
            }
            inner.evict.del(victim.key);
            victims.push(victim);
        }
        inner.evict.add(key, cost);
        (victims, true)
    }

    /// Cost refresh for a key the store just updated in place. May shed
    /// residents when the new cost overflows the budget.
    pub fn update(&self, key: u64, cost: i64) -> Vec<Victim> {
        let mut inner = self.inner.lock();
        if inner.evict.update_if_has(key, cost) {
            Self::shed(&mut inner)
        } else {
            Vec::new()
        }
    }

    pub fn del(&self, key: u64) {
        self.inner.lock().evict.del(key);
    }

    pub fn cost(&self, key: u64) -> Option<i64> {
        self.inner.lock().evict.key_costs.get(&key).copied()
    }

    #[cfg(test)]
    pub fn has(&self, key: u64) -> bool {
        self.inner.lock().evict.key_costs.contains_key(&key)
    }

    /// Budget headroom: `max_cost - used`.
    pub fn cap(&self) -> i64 {
        let inner = self.inner.lock();
        inner.evict.max_cost - inner.evict.used
    }

    pub fn clear(&self) {
        // Batches queued behind the wipe would resurrect stale frequencies.
        while self.batch_rx.try_recv().is_ok() {}
        let mut inner = self.inner.lock();
        inner.admit.clear();
        inner.evict.clear();
    }

    /// Stops the consumer task. Idempotent.
    pub fn close(&self) {
        if let Some(handle) = self.consumer.lock().take() {
            let _ = self.stop_tx.send(());
            let _ = handle.join();
        }
    }

    /// Evicts coldest samples until the budget holds again.
    fn shed(inner: &mut PolicyInner) -> Vec<Victim> {
        let mut victims = Vec::new();
        let mut rng = rand::rng();
        while inner.evict.used > inner.evict.max_cost {
            let sample = inner.evict.sample(&mut rng);
            let Some((victim, _)) = Self::coldest(&inner.admit, &sample) else {
                break;
            };
            inner.evict.del(victim.key);
            victims.push(victim);
        }
        victims
    }

    /// Stable minimum-frequency scan: the first candidate seen at the lowest
    /// estimate wins.
    fn coldest(admit: &TinyLfu, sample: &[(u64, i64)]) -> Option<(Victim, i64)> {
        let mut result: Option<(Victim, i64)> = None;
        for &(key, cost) in sample {
            let hits = admit.estimate(key);
            let colder = match &result {
                Some((_, min_hits)) => hits < *min_hits,
                None => true,
            };
            if colder {
                result = Some((Victim { key, cost }, hits));
            }
        }
        result
    }
}

impl RingConsumer for LfuPolicy {
    fn push_batch(&self, keys: &[u64]) -> bool {
        self.push(keys)
    }
}

/// Frequency half of the policy: doorkeeper in front of the sketch.
struct TinyLfu {
    freq: CmSketch,
    door: Doorkeeper,
    incrs: u64,
    reset_at: u64,
}

impl TinyLfu {
    fn new(num_counters: u64) -> Self {
        Self {
            freq: CmSketch::new(num_counters),
            door: Doorkeeper::new(num_counters, 0.01),
            incrs: 0,
            reset_at: num_counters,
        }
    }

    fn increment(&mut self, key: u64) {
        // First sighting is absorbed by the doorkeeper; repeats reach the
        // sketch. One-hit wonders never pollute the counters.
        if !self.door.add(key) {
            self.freq.increment(key);
        }
        self.incrs += 1;
        if self.incrs >= self.reset_at {
            self.reset();
        }
    }

    fn estimate(&self, key: u64) -> i64 {
        let mut hits = self.freq.estimate(key);
        if self.door.contains(key) {
            hits += 1;
        }
        hits
    }

    fn reset(&mut self) {
        self.incrs = 0;
        self.door.clear();
        self.freq.reset();
    }

    fn clear(&mut self) {
        self.incrs = 0;
        self.door.clear();
        self.freq.clear();
    }
}

/// Cost half of the policy: resident keys with their weights.
struct SampledLfu {
    key_costs: HashMap<u64, i64>,
    max_cost: i64,
    used: i64,
}

impl SampledLfu {
    fn new(max_cost: i64) -> Self {
        Self { key_costs: HashMap::new(), max_cost, used: 0 }
    }

    fn room_left(&self, cost: i64) -> i64 {
        self.max_cost - (self.used + cost)
    }

    fn add(&mut self, key: u64, cost: i64) {
        match self.key_costs.insert(key, cost) {
            Some(prev) => self.used += cost - prev,
            None => self.used += cost,
        }
    }

    fn update_if_has(&mut self, key: u64, cost: i64) -> bool {
        match self.key_costs.get_mut(&key) {
            Some(prev) => {
                self.used += cost - *prev;
                *prev = cost;
                true
            }
            None => false,
        }
    }

    fn del(&mut self, key: u64) -> Option<i64> {
        let cost = self.key_costs.remove(&key)?;
        self.used -= cost;
        debug_assert!(self.used >= 0, "resident cost went negative");
        Some(cost)
    }

    fn sample(&self, rng: &mut ThreadRng) -> Vec<(u64, i64)> {
        self.key_costs.iter().map(|(key, cost)| (*key, *cost)).choose_multiple(rng, SAMPLE_SIZE)
    }

    fn clear(&mut self) {
        self.key_costs.clear();
        self.used = 0;
    }
}
