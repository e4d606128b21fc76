// ==============================================
// OBJECT CACHE CONCURRENCY TESTS (integration)
// ==============================================
//
// Multi-threaded alloc/free workloads against one cache: balance,
// cross-thread migration, and purging under load. These need real
// threads and cannot live inline.

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use magkit::builder::CacheBuilder;
use magkit::registry::{CacheRegistry, RegistryConfig};
use magkit::types::{AllocMode, CacheFlags, ObjRef};

fn registry(cpus: usize) -> Arc<CacheRegistry> {
    let cfg = RegistryConfig {
        cpus,
        update_interval: Duration::from_secs(3600),
        ..RegistryConfig::default()
    };
    let registry = CacheRegistry::new(cfg).unwrap();
    registry.start();
    registry
}

// ==============================================
// Balance: N alloc/free pairs leave nothing behind
// ==============================================

#[test]
fn four_threads_ten_thousand_pairs_balance() {
    let registry = registry(4);
    let cache = CacheBuilder::new("hammer", 64).build(&registry);
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                let mut stash: Vec<ObjRef> = Vec::new();
                barrier.wait();
                for _ in 0..10_000 {
                    if stash.is_empty() || (stash.len() < 32 && rng.gen_bool(0.55)) {
                        stash.push(cache.alloc(AllocMode::Sleep).unwrap());
                    } else {
                        let idx = rng.gen_range(0..stash.len());
                        cache.free(stash.swap_remove(idx));
                    }
                }
                for obj in stash {
                    cache.free(obj);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    cache.check_invariants().unwrap();
    cache.reap_now(true);
    assert_eq!(cache.bufinuse(), 0, "no leaked objects");
    cache.destroy();
}

// ==============================================
// Cross-thread migration: alloc here, free there
// ==============================================

#[test]
fn objects_freed_on_another_thread_still_balance() {
    let registry = registry(4);
    let cache = CacheBuilder::new("migrate", 128).build(&registry);

    let (tx, rx) = mpsc::channel::<ObjRef>();
    let consumer = {
        let cache = cache.clone();
        thread::spawn(move || {
            let mut freed = 0usize;
            while let Ok(obj) = rx.recv() {
                cache.free(obj);
                freed += 1;
            }
            freed
        })
    };

    let producer = {
        let cache = cache.clone();
        thread::spawn(move || {
            for _ in 0..5_000 {
                tx.send(cache.alloc(AllocMode::Sleep).unwrap()).unwrap();
            }
        })
    };

    producer.join().unwrap();
    assert_eq!(consumer.join().unwrap(), 5_000);

    cache.check_invariants().unwrap();
    cache.reap_now(true);
    assert_eq!(cache.bufinuse(), 0);
    cache.destroy();
}

// ==============================================
// Purge under load: the fast path empties and recovers
// ==============================================

#[test]
fn purge_during_steady_state_workload() {
    let registry = registry(4);
    let cache = CacheBuilder::new("purgeload", 64).build(&registry);
    let barrier = Arc::new(Barrier::new(3));

    let workers: Vec<_> = (0..2)
        .map(|t| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + t as u64);
                barrier.wait();
                for _ in 0..2_000 {
                    let burst = rng.gen_range(1..8);
                    let objs: Vec<ObjRef> = (0..burst)
                        .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
                        .collect();
                    for obj in objs {
                        cache.free(obj);
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    for _ in 0..10 {
        cache.reap_now(true);
        // Every slot is empty the instant the purge returns; workers will
        // repopulate immediately afterwards.
        thread::sleep(Duration::from_millis(1));
    }

    for h in workers {
        h.join().unwrap();
    }

    cache.check_invariants().unwrap();
    cache.reap_now(true);
    for snap in cache.cpu_snapshot() {
        assert_eq!(snap.loaded_rounds, None);
        assert_eq!(snap.previous_rounds, None);
        assert!(snap.magsize > 0);
    }
    assert_eq!(cache.bufinuse(), 0);
    cache.destroy();
}

// ==============================================
// Batch paths under concurrency
// ==============================================

#[test]
fn concurrent_batch_traffic_balances() {
    let registry = registry(4);
    let cache = CacheBuilder::new("batcher", 64)
        .flags(CacheFlags::BATCH)
        .build(&registry);
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..3)
        .map(|t| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(7 + t as u64);
                let mut batch = Vec::new();
                barrier.wait();
                for _ in 0..500 {
                    let want = rng.gen_range(1..100);
                    let got = cache.alloc_batch(want, AllocMode::Sleep, &mut batch);
                    assert_eq!(got, want, "pseudo region never runs dry");
                    assert_eq!(batch.len(), want);
                    cache.free_batch(&mut batch);
                    assert!(batch.is_empty());
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    cache.check_invariants().unwrap();
    cache.reap_now(true);
    assert_eq!(cache.bufinuse(), 0);
    cache.destroy();
}

// ==============================================
// Many caches, one registry
// ==============================================

#[test]
fn independent_caches_share_a_registry() {
    let registry = registry(2);
    let caches: Vec<_> = (0..4usize)
        .map(|i| CacheBuilder::new(format!("multi-{i}"), 64 * (i + 1)).build(&registry))
        .collect();

    let handles: Vec<_> = caches
        .iter()
        .map(|cache| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let obj = cache.alloc(AllocMode::Sleep).unwrap();
                    cache.free(obj);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    registry.update_now();
    for cache in caches {
        cache.reap_now(true);
        assert_eq!(cache.bufinuse(), 0);
        cache.destroy();
    }
    assert_eq!(registry.cache_count(), 0);
}
