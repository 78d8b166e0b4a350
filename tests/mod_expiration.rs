//! End-to-end TTL behavior. The sweep runs one five-second bucket behind the
//! clock, so these tests poll with generous deadlines instead of asserting
//! exact instants.

use fluxcache::{Cache, Config};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn expired_entries_miss_and_fire_on_evict_once() {
    let evictions = Arc::new(AtomicU64::new(0));
    let evictions_seen = Arc::clone(&evictions);
    let cache: Cache<String, u64> = Cache::new(Config {
        num_counters: 100,
        max_cost: 10,
        buffer_items: 1,
        metrics: true,
        on_evict: Some(Arc::new(move |_key, _conflict, _value, _cost| {
            evictions_seen.fetch_add(1, Ordering::Relaxed);
        })),
        ..Config::default()
    })
    .expect("valid config");

    assert!(cache.set_with_ttl(&"t".to_string(), 9, 1, Duration::from_secs(1)));
    cache.wait();
    assert_eq!(cache.get(&"t".to_string()), Some(9));

    // Lazy expiry: the lookup misses as soon as the instant passes, well
    // before the sweeper physically removes the entry.
    std::thread::sleep(Duration::from_secs(2));
    assert_eq!(cache.get(&"t".to_string()), None);

    // Physical removal is guaranteed within two bucket widths of expiry.
    let deadline = Instant::now() + Duration::from_secs(12);
    while evictions.load(Ordering::Relaxed) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(250));
    }
    assert_eq!(evictions.load(Ordering::Relaxed), 1, "expiry must evict exactly once");

    // Idempotence: nothing fires twice for the same entry.
    std::thread::sleep(Duration::from_secs(3));
    assert_eq!(evictions.load(Ordering::Relaxed), 1);
}

#[test]
fn refreshing_the_ttl_keeps_the_entry_alive() {
    let cache: Cache<String, u64> = Cache::new(Config {
        num_counters: 100,
        max_cost: 10,
        buffer_items: 1,
        ..Config::default()
    })
    .expect("valid config");

    assert!(cache.set_with_ttl(&"t".to_string(), 1, 1, Duration::from_secs(2)));
    cache.wait();
    // Push the expiration far out before the first one lands.
    assert!(cache.set_with_ttl(&"t".to_string(), 2, 1, Duration::from_secs(60)));
    cache.wait();

    std::thread::sleep(Duration::from_secs(3));
    assert_eq!(cache.get(&"t".to_string()), Some(2), "refreshed TTL must win");
}

#[test]
fn zero_ttl_never_expires() {
    let cache: Cache<String, u64> = Cache::new(Config {
        num_counters: 100,
        max_cost: 10,
        buffer_items: 1,
        ..Config::default()
    })
    .expect("valid config");

    assert!(cache.set_with_ttl(&"k".to_string(), 5, 1, Duration::ZERO));
    cache.wait();
    std::thread::sleep(Duration::from_secs(6));
    assert_eq!(cache.get(&"k".to_string()), Some(5));
}
