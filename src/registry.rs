//! Cache registry: ownership, configuration, and periodic maintenance.
//!
//! A [`CacheRegistry`] is an explicit, injectable object — not process
//! state — so hosts and tests can run isolated allocator universes side
//! by side. It owns the list of live caches, the shared per-type magazine
//! pools, and the maintenance thread that drives each cache's periodic
//! update: working-set rollover, bufctl rescale, contention-driven
//! magazine growth, and idle-magazine reaping.
//!
//! At most one maintenance or reap episode runs system-wide at a time,
//! enforced by an atomic in-flight flag; alloc/free traffic on distinct
//! caches is never serialized against each other.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::bufctl::HASH_INITIAL_BUCKETS;
use crate::cache::ObjCache;
use crate::error::ConfigError;
use crate::magazine::{magtype_for_chunksize, MagazinePools, MAG_TYPES};
use crate::stats::{CacheStats, PoolSnapshot};
use crate::types::CacheFlags;

/// Host-tunable registry parameters.
///
/// Validated by [`CacheRegistry::new`]; use struct-update syntax over
/// [`Default`] to override a few fields:
///
/// ```
/// use magkit::registry::RegistryConfig;
///
/// let cfg = RegistryConfig {
///     cpus: 4,
///     ..RegistryConfig::default()
/// };
/// assert_eq!(cfg.cpus, 4);
/// ```
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Cpu slots per cache.
    pub cpus: usize,
    /// Period of the background maintenance tick.
    pub update_interval: Duration,
    /// Depot-lock misses per interval that trigger magazine growth.
    pub depot_contention_threshold: u64,
    /// Upper bound on bufctl bucket counts (power of two).
    pub hash_bucket_ceiling: usize,
    /// Objects at or below this size get clear-on-free automatically.
    pub clearonfree_threshold: usize,
    /// Optional cap on outstanding magazines per type; `None` is
    /// unbounded. Mostly useful for exercising degraded paths.
    pub magazine_cap: Option<usize>,
    /// Debug switch: disable magazine layers everywhere.
    pub nomagazines: bool,
    /// Boot-time switch: record audit rings on every cache.
    pub audit: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cpus: std::thread::available_parallelism().map_or(4, |n| n.get()),
            update_interval: Duration::from_secs(15),
            depot_contention_threshold: 3,
            hash_bucket_ceiling: 1 << 18,
            clearonfree_threshold: 512,
            magazine_cap: None,
            nomagazines: false,
            audit: false,
        }
    }
}

impl RegistryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cpus == 0 {
            return Err(ConfigError::new("cpus must be > 0"));
        }
        if self.update_interval.is_zero() {
            return Err(ConfigError::new("update_interval must be nonzero"));
        }
        if !self.hash_bucket_ceiling.is_power_of_two() {
            return Err(ConfigError::new("hash_bucket_ceiling must be a power of two"));
        }
        if self.hash_bucket_ceiling < HASH_INITIAL_BUCKETS {
            return Err(ConfigError::new(format!(
                "hash_bucket_ceiling must be at least {HASH_INITIAL_BUCKETS}"
            )));
        }
        if self.magazine_cap == Some(0) {
            return Err(ConfigError::new("magazine_cap must be nonzero when set"));
        }
        Ok(())
    }
}

/// Registry of caches plus the maintenance machinery.
///
/// See the crate root for a full usage example.
pub struct CacheRegistry {
    cfg: RegistryConfig,
    caches: Mutex<Vec<Arc<ObjCache>>>,
    pools: Arc<MagazinePools>,
    next_id: AtomicU64,
    started: AtomicBool,
    /// One maintenance/reap episode at a time, system-wide.
    in_flight: AtomicBool,
    maint: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
}

impl CacheRegistry {
    /// Creates a registry after validating `cfg`.
    pub fn new(cfg: RegistryConfig) -> Result<Arc<Self>, ConfigError> {
        cfg.validate()?;
        let pools = Arc::new(MagazinePools::new(cfg.magazine_cap));
        Ok(Arc::new(Self {
            cfg,
            caches: Mutex::new(Vec::new()),
            pools,
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            maint: Mutex::new(None),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
        }))
    }

    /// Creates a registry with default configuration.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(RegistryConfig::default()).expect("default registry config is valid")
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.cfg
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Arms the magazine layers of every registered cache and spawns the
    /// periodic maintenance thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for cache in self.caches.lock().iter() {
            cache.magazine_arm();
        }

        let weak = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.cfg.update_interval;
        let handle = std::thread::Builder::new()
            .name("magkit-maint".into())
            .spawn(move || {
                let (lock, cv) = &*shutdown;
                let mut stopped = lock.lock();
                loop {
                    if *stopped {
                        return;
                    }
                    let _ = cv.wait_for(&mut stopped, interval);
                    if *stopped {
                        return;
                    }
                    let Some(registry) = weak.upgrade() else {
                        return;
                    };
                    drop(stopped);
                    registry.update_now();
                    drop(registry);
                    stopped = lock.lock();
                }
            })
            .expect("failed to spawn maintenance thread");
        *self.maint.lock() = Some(handle);
        debug!("cache maintenance started (interval {:?})", interval);
    }

    /// Stops the maintenance thread. Called automatically on drop.
    pub fn stop(&self) {
        {
            let (lock, cv) = &*self.shutdown;
            *lock.lock() = true;
            cv.notify_all();
        }
        if let Some(handle) = self.maint.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Runs one maintenance pass over every cache right now, then trims
    /// the magazine pools. Skipped if another episode is in flight.
    pub fn update_now(&self) {
        if self.in_flight.swap(true, Ordering::Acquire) {
            return;
        }
        let caches: Vec<Arc<ObjCache>> = self.caches.lock().clone();
        for cache in caches {
            cache.update(self.cfg.depot_contention_threshold);
        }
        self.pools.ws_update_all();
        self.in_flight.store(false, Ordering::Release);
    }

    /// Reaps every reap-eligible cache (caches carrying
    /// [`CacheFlags::NOREDIRECT`] opt out of forced global reclaim).
    /// Skipped if another episode is in flight.
    pub fn reap_all(&self, purge: bool) {
        if self.in_flight.swap(true, Ordering::Acquire) {
            return;
        }
        let caches: Vec<Arc<ObjCache>> = self.caches.lock().clone();
        for cache in caches {
            if cache.flags().contains(CacheFlags::NOREDIRECT) {
                continue;
            }
            cache.reap_internal(purge, false);
        }
        self.in_flight.store(false, Ordering::Release);
    }

    /// Upper bound on memory the magazine layer can hold for a cache of
    /// the given chunk size: two magazines per cpu slot plus a pair of
    /// depot spares.
    pub fn magazine_max(&self, chunksize: usize) -> usize {
        let mt = &MAG_TYPES[magtype_for_chunksize(chunksize)];
        mt.magsize * chunksize * (2 * self.cfg.cpus + 2)
    }

    /// Statistics snapshot of every registered cache.
    pub fn snapshot(&self) -> Vec<CacheStats> {
        self.caches.lock().iter().map(|c| c.stats()).collect()
    }

    /// Per-type view of the shared magazine pools.
    pub fn pool_snapshot(&self) -> Vec<PoolSnapshot> {
        self.pools.snapshot()
    }

    /// Number of registered caches.
    pub fn cache_count(&self) -> usize {
        self.caches.lock().len()
    }

    pub(crate) fn next_cache_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn pools(&self) -> Arc<MagazinePools> {
        Arc::clone(&self.pools)
    }

    pub(crate) fn register(&self, cache: &Arc<ObjCache>) {
        self.caches.lock().push(Arc::clone(cache));
        if self.is_started() {
            cache.magazine_arm();
        }
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.caches.lock().retain(|c| c.id() != id);
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("caches", &self.cache_count())
            .field("started", &self.is_started())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::builder::CacheBuilder;
    use crate::types::AllocMode;

    fn quiet_config() -> RegistryConfig {
        RegistryConfig {
            cpus: 2,
            update_interval: Duration::from_secs(3600),
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let bad = RegistryConfig {
            cpus: 0,
            ..RegistryConfig::default()
        };
        assert!(CacheRegistry::new(bad).is_err());

        let bad = RegistryConfig {
            update_interval: Duration::ZERO,
            ..RegistryConfig::default()
        };
        assert!(CacheRegistry::new(bad).is_err());

        let bad = RegistryConfig {
            hash_bucket_ceiling: 100,
            ..RegistryConfig::default()
        };
        assert!(CacheRegistry::new(bad).is_err());

        let bad = RegistryConfig {
            hash_bucket_ceiling: 16,
            ..RegistryConfig::default()
        };
        assert!(CacheRegistry::new(bad).is_err());

        let bad = RegistryConfig {
            magazine_cap: Some(0),
            ..RegistryConfig::default()
        };
        assert!(CacheRegistry::new(bad).is_err());
    }

    #[test]
    fn register_and_destroy_maintain_the_list() {
        let registry = CacheRegistry::new(quiet_config()).unwrap();
        assert_eq!(registry.cache_count(), 0);

        let a = CacheBuilder::new("a", 64).build(&registry);
        let b = CacheBuilder::new("b", 64).build(&registry);
        assert_eq!(registry.cache_count(), 2);
        assert_ne!(a.id(), b.id());

        a.destroy();
        assert_eq!(registry.cache_count(), 1);
        b.destroy();
        assert_eq!(registry.cache_count(), 0);
    }

    #[test]
    fn working_set_monotonicity_across_quiet_ticks() {
        let registry = CacheRegistry::new(quiet_config()).unwrap();
        registry.start();
        let cache = CacheBuilder::new("ws", 64).build(&registry);

        // Build up depot population: overflow one slot's magazines.
        let objs: Vec<_> = (0..400)
            .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
            .collect();
        for obj in objs {
            cache.free(obj);
        }

        registry.update_now();
        let first = cache.depot_snapshot();
        registry.update_now();
        let second = cache.depot_snapshot();
        assert!(second.full.reap_limit <= first.full.min);
        assert!(second.empty.reap_limit <= first.empty.min);

        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn quiet_depot_drains_after_two_ticks() {
        let registry = CacheRegistry::new(quiet_config()).unwrap();
        registry.start();
        let cache = CacheBuilder::new("drain", 64).build(&registry);

        let objs: Vec<_> = (0..400)
            .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
            .collect();
        for obj in objs {
            cache.free(obj);
        }
        assert!(cache.depot_snapshot().full.count > 0);

        registry.update_now();
        registry.update_now();
        registry.update_now();
        assert_eq!(cache.depot_snapshot().full.count, 0);

        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn reap_all_skips_noredirect_caches() {
        let registry = CacheRegistry::new(quiet_config()).unwrap();
        registry.start();
        let normal = CacheBuilder::new("normal", 64).build(&registry);
        let pinned = CacheBuilder::new("pinned", 64)
            .flags(CacheFlags::NOREDIRECT)
            .build(&registry);

        for cache in [&normal, &pinned] {
            let objs: Vec<_> = (0..10)
                .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
                .collect();
            for obj in objs {
                cache.free(obj);
            }
        }

        registry.reap_all(true);
        assert_eq!(normal.bufinuse(), 0, "normal cache purged");
        assert_eq!(pinned.bufinuse(), 10, "noredirect cache untouched");

        pinned.reap_now(true); // per-cache reap still works
        assert_eq!(pinned.bufinuse(), 0);
        normal.destroy();
        pinned.destroy();
    }

    #[test]
    fn magazine_max_follows_the_type_table() {
        let registry = CacheRegistry::new(quiet_config()).unwrap();
        // chunk 64 -> 62 rounds; chunk 4096 -> 14 rounds; 2 cpus.
        assert_eq!(registry.magazine_max(64), 62 * 64 * 6);
        assert_eq!(registry.magazine_max(4096), 14 * 4096 * 6);
    }

    #[test]
    fn snapshot_covers_all_caches() {
        let registry = CacheRegistry::new(quiet_config()).unwrap();
        let a = CacheBuilder::new("snap-a", 64).build(&registry);
        let b = CacheBuilder::new("snap-b", 128).build(&registry);

        let stats = registry.snapshot();
        let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"snap-a"));
        assert!(names.contains(&"snap-b"));
        a.destroy();
        b.destroy();
    }

    #[test]
    fn background_thread_ticks_on_its_own() {
        let cfg = RegistryConfig {
            cpus: 2,
            update_interval: Duration::from_millis(20),
            ..RegistryConfig::default()
        };
        let registry = CacheRegistry::new(cfg).unwrap();
        registry.start();
        let cache = CacheBuilder::new("bg", 64).build(&registry);

        let objs: Vec<_> = (0..200)
            .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
            .collect();
        for obj in objs {
            cache.free(obj);
        }
        let populated = cache.depot_snapshot().full.count;
        assert!(populated > 0);

        // Give the maintenance thread a few intervals to update and reap.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(cache.depot_snapshot().full.count, 0);

        registry.stop();
        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn start_is_idempotent() {
        let registry = CacheRegistry::new(quiet_config()).unwrap();
        registry.start();
        registry.start();
        registry.stop();
    }
}
