use fluxcache::{Cache, Config};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn small_cache(max_cost: i64, buffer_items: u64) -> Cache<String, u64> {
    Cache::new(Config {
        num_counters: 100,
        max_cost,
        buffer_items,
        metrics: true,
        ..Config::default()
    })
    .expect("valid config")
}

#[test]
fn basic_set_and_get() {
    let cache = small_cache(10, 1);
    assert!(cache.set(&"1".to_string(), 1, 1));
    cache.wait();
    assert_eq!(cache.get(&"1".to_string()), Some(1));
}

#[test]
fn miss_on_absent_key() {
    let cache = small_cache(10, 1);
    assert_eq!(cache.get(&"nope".to_string()), None);
    let metrics = cache.metrics().expect("metrics enabled");
    assert_eq!(metrics.misses, 1);
}

#[test]
fn update_round_trip() {
    let cache = small_cache(10, 1);
    assert!(cache.set(&"k".to_string(), 1, 1));
    cache.wait();
    assert!(cache.set(&"k".to_string(), 2, 1));
    cache.wait();
    assert_eq!(cache.get(&"k".to_string()), Some(2));
    let metrics = cache.metrics().expect("metrics enabled");
    assert_eq!(metrics.keys_added, 1);
    assert_eq!(metrics.keys_updated, 1);
}

#[test]
fn capacity_is_respected_after_drain() {
    let cache = small_cache(4, 4);
    for i in 0..16u64 {
        cache.set(&format!("{i}"), i, 1);
        cache.wait();
    }
    let resident = (0..16u64).filter(|i| cache.get(&format!("{i}")).is_some()).count();
    assert!(resident <= 4, "more residents than the budget allows: {resident}");
    assert!(cache.remaining_cost() >= 0);
}

#[test]
fn hot_key_survives_a_cold_flood() {
    let cache = small_cache(10, 1);
    assert!(cache.set(&"hot".to_string(), 0, 1));
    cache.wait();
    // Give the access trace time to drain into the sketch.
    for _ in 0..32 {
        assert_eq!(cache.get(&"hot".to_string()), Some(0));
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(50));
    for i in 0..100u64 {
        cache.set(&format!("cold-{i}"), i, 1);
        cache.wait();
    }
    assert_eq!(cache.get(&"hot".to_string()), Some(0), "hot key was displaced by one-hit wonders");
}

#[test]
fn delete_removes_and_is_idempotent() {
    let evictions = Arc::new(AtomicU64::new(0));
    let evictions_seen = Arc::clone(&evictions);
    let cache: Cache<String, u64> = Cache::new(Config {
        num_counters: 100,
        max_cost: 10,
        buffer_items: 1,
        on_evict: Some(Arc::new(move |_key, _conflict, _value, _cost| {
            evictions_seen.fetch_add(1, Ordering::Relaxed);
        })),
        ..Config::default()
    })
    .expect("valid config");

    cache.set(&"k".to_string(), 1, 1);
    cache.wait();
    cache.del(&"k".to_string());
    cache.del(&"k".to_string());
    cache.wait();
    assert_eq!(cache.get(&"k".to_string()), None);
    // Explicit deletes never fire the eviction callback.
    assert_eq!(evictions.load(Ordering::Relaxed), 0);
}

#[test]
fn clear_forgets_every_entry() {
    let cache = small_cache(2000, 8);
    for i in 0..1000u64 {
        cache.set(&format!("{i}"), i, 1);
    }
    cache.wait();
    cache.clear();
    for i in 0..1000u64 {
        assert_eq!(cache.get(&format!("{i}")), None);
    }
    // The cache keeps working after a wipe.
    assert!(cache.set(&"again".to_string(), 7, 1));
    cache.wait();
    assert_eq!(cache.get(&"again".to_string()), Some(7));
}

#[test]
fn close_is_idempotent_and_disables_operations() {
    let cache = small_cache(10, 1);
    cache.set(&"k".to_string(), 1, 1);
    cache.wait();
    cache.close();
    cache.close();
    assert_eq!(cache.get(&"k".to_string()), None);
    assert!(!cache.set(&"other".to_string(), 2, 1));
    cache.del(&"k".to_string());
    cache.wait();
}

#[test]
fn zero_cost_defaults_to_one() {
    let cache = small_cache(4, 1);
    for i in 0..8u64 {
        cache.set(&format!("{i}"), i, 0);
        cache.wait();
    }
    // Were zero-cost entries admitted for free, all eight would be resident.
    let resident = (0..8u64).filter(|i| cache.get(&format!("{i}")).is_some()).count();
    assert!(resident <= 4, "zero-cost entries must still be charged: {resident}");
}

#[test]
fn cost_callback_prices_uncosted_values() {
    let cache: Cache<String, String> = Cache::new(Config {
        num_counters: 100,
        max_cost: 100,
        buffer_items: 1,
        cost: Some(Arc::new(|value: &String| value.len() as i64)),
        ..Config::default()
    })
    .expect("valid config");
    cache.set(&"k".to_string(), "x".repeat(30), 0);
    cache.wait();
    assert_eq!(cache.remaining_cost(), 70);
}

#[test]
fn metrics_track_hits_misses_and_admissions() {
    let cache = small_cache(10, 1);
    cache.set(&"a".to_string(), 1, 1);
    cache.wait();
    assert_eq!(cache.get(&"a".to_string()), Some(1));
    assert_eq!(cache.get(&"b".to_string()), None);
    let metrics = cache.metrics().expect("metrics enabled");
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.keys_added, 1);
    assert_eq!(metrics.cost_added, 1);
    assert!((metrics.ratio() - 0.5).abs() < f64::EPSILON);
    assert!(metrics.to_json().contains("\"hits\":1"));
}

#[test]
fn panicking_on_evict_does_not_kill_the_writer() {
    let cache: Cache<String, u64> = Cache::new(Config {
        num_counters: 100,
        max_cost: 2,
        buffer_items: 1,
        on_evict: Some(Arc::new(|_key, _conflict, _value, _cost| {
            panic!("callback bug");
        })),
        ..Config::default()
    })
    .expect("valid config");
    // Overflow the budget so evictions (and the panicking callback) fire.
    for i in 0..8u64 {
        cache.set(&format!("{i}"), i, 1);
        cache.wait();
    }
    // The writer survived; mutations still apply.
    cache.set(&"after".to_string(), 1, 1);
    cache.wait();
    assert!(cache.remaining_cost() >= 0);
}

#[test]
fn oversized_items_are_never_admitted() {
    let cache = small_cache(4, 1);
    assert!(cache.set(&"big".to_string(), 1, 5));
    cache.wait();
    assert_eq!(cache.get(&"big".to_string()), None);
    let metrics = cache.metrics().expect("metrics enabled");
    assert_eq!(metrics.sets_rejected, 1);
}

#[test]
fn concurrent_readers_and_writers_smoke() {
    let cache = Arc::new(small_cache(1000, 16));
    let mut handles = Vec::new();
    for t in 0..4u64 {
        let cache = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for i in 0..500u64 {
                let key = format!("{}-{}", t, i % 50);
                cache.set(&key, i, 1);
                if let Some(found) = cache.get(&key) {
                    // A hit must never observe a value from a different key.
                    assert_eq!(found % 50, i % 50);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }
    cache.wait();
    assert!(cache.remaining_cost() >= 0);
}
