//! The cache controller: one `ObjCache` per registered object type.
//!
//! ## Architecture
//!
//! ```text
//!   alloc ──► cpu slot ──────► depot ─────► slab provider ──► ctor
//!             loaded/previous  full/empty   raw chunks
//!   free  ◄── cpu slot ◄────── depot ◄───── slab provider ◄── dtor
//!
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ ObjCache                                                     │
//!   │                                                              │
//!   │   cpus[0] ─ Mutex ─ { loaded, previous, magsize }            │
//!   │   cpus[1] ─ Mutex ─ { loaded, previous, magsize }            │
//!   │      ⋮                                                       │
//!   │   depot ── Mutex ─ { full list │ empty list } + contention   │
//!   │   slab ─── Mutex ─ { bufctl hash │ bufinuse }                │
//!   │   resize ─ re-entrant advisory lock (purge/retype/enable)    │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fast paths touch only the calling thread's cpu slot. Underflow and
//! overflow exchange whole magazines with the depot; when the depot runs
//! dry the engine falls through to the slab provider, constructing (on
//! alloc) or deconstructing (on free) objects as they cross the slab
//! boundary. The periodic [`update`](ObjCache::update) rolls working
//! sets, rescales the bufctl table, grows magazines under contention, and
//! reaps idle depot magazines.
//!
//! Contract violations panic; resource exhaustion surfaces as `None` or a
//! short batch count. See the crate root for the full error taxonomy.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::bufctl::{BufctlTable, TxKind, HASH_INITIAL_BUCKETS};
use crate::builder::CacheSpec;
use crate::cpu::{CpuCache, CpuSlot};
use crate::depot::Depot;
use crate::ds::CpuSelector;
use crate::error::InvariantError;
use crate::magazine::{magtype_for_chunksize, Magazine, MagazinePools, MAG_TYPES};
use crate::region::{PseudoRegion, SlabObj, SlabProvider};
use crate::registry::CacheRegistry;
use crate::stats::{AuditOp, AuditRecord, CacheStats, CpuSnapshot, DepotListSnapshot, DepotSnapshot};
use crate::types::{AllocMode, CacheFlags, Ctor, Dtor, ObjRef, Reclaim, CACHE_LINE, MIN_ALIGN};

/// Position of a live object within its region, as reported by
/// [`ObjCache::get_obj_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjInfo {
    pub obj: ObjRef,
    /// Slab the object was carved from.
    pub slab: u32,
    /// Chunk index within that slab.
    pub slab_idx: u32,
    /// Logical index within the whole region.
    pub region_idx: usize,
    pub chunksize: usize,
}

fn round_up(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

// ---------------------------------------------------------------------------
// Resize lock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ResizeState {
    owner: Option<ThreadId>,
    depth: usize,
    waiters: usize,
}

/// Re-entrant advisory lock serializing magazine purge/retype/enable
/// sequences. The owning thread may re-enter; others block on a condvar
/// (or fail fast via `try_enter`) rather than spinning.
#[derive(Debug, Default)]
struct ResizeLock {
    state: Mutex<ResizeState>,
    cv: Condvar,
}

impl ResizeLock {
    fn enter(&self) {
        let me = thread::current().id();
        let mut st = self.state.lock();
        loop {
            match st.owner {
                None => {
                    st.owner = Some(me);
                    st.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    st.depth += 1;
                    return;
                }
                Some(_) => {
                    st.waiters += 1;
                    self.cv.wait(&mut st);
                    st.waiters -= 1;
                }
            }
        }
    }

    fn try_enter(&self) -> bool {
        let me = thread::current().id();
        let mut st = self.state.lock();
        match st.owner {
            None => {
                st.owner = Some(me);
                st.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                st.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    fn exit(&self) {
        let mut st = self.state.lock();
        debug_assert_eq!(st.owner, Some(thread::current().id()));
        st.depth -= 1;
        if st.depth == 0 {
            st.owner = None;
            if st.waiters > 0 {
                self.cv.notify_one();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ObjCache
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SlabLayer {
    hash: BufctlTable,
    /// Objects carved from slabs: client-held plus magazine-parked.
    bufinuse: usize,
    bufmax: usize,
    allocs: u64,
    frees: u64,
}

/// A fixed-size object cache.
///
/// Built through [`CacheBuilder`](crate::builder::CacheBuilder); lives in
/// a [`CacheRegistry`](crate::registry::CacheRegistry) until
/// [`destroy`](ObjCache::destroy).
///
/// # Example
///
/// ```
/// use magkit::builder::CacheBuilder;
/// use magkit::registry::CacheRegistry;
/// use magkit::types::AllocMode;
///
/// let registry = CacheRegistry::with_defaults();
/// registry.start();
///
/// let cache = CacheBuilder::new("example", 128).build(&registry);
/// let obj = cache.alloc(AllocMode::Sleep).unwrap();
/// let info = cache.get_obj_info(obj);
/// assert_eq!(info.obj, obj);
///
/// cache.free(obj);
/// cache.reap_now(true);
/// cache.destroy();
/// ```
pub struct ObjCache {
    name: String,
    id: u64,
    flags: CacheFlags,

    bufsize: usize,
    bufalign: usize,
    objalign: usize,
    chunksize: usize,
    objsize: usize,
    slabsize: usize,

    ctor: Option<Ctor>,
    dtor: Option<Dtor>,
    reclaim: Option<Reclaim>,

    provider: Arc<dyn SlabProvider>,
    slab: Mutex<SlabLayer>,

    cpus: Box<[CpuCache]>,
    selector: CpuSelector,

    depot: Mutex<Depot>,
    depot_contention: AtomicU64,
    depot_contention_prev: AtomicU64,

    /// Index into the magazine-type table; advances under the resize lock.
    mtype: AtomicUsize,
    pools: Arc<MagazinePools>,
    resize: ResizeLock,

    magazine_resizes: AtomicU64,
    depot_ws_reaps: AtomicU64,

    registry: Weak<CacheRegistry>,
    destroyed: AtomicBool,
}

impl ObjCache {
    pub(crate) fn create(spec: CacheSpec, registry: &Arc<CacheRegistry>) -> Arc<ObjCache> {
        let CacheSpec {
            name,
            bufsize,
            bufalign,
            mut flags,
            ctor,
            dtor,
            reclaim,
            region,
        } = spec;
        let cfg = registry.config();

        assert!(!name.is_empty(), "cache name must not be empty");
        assert!(bufsize > 0, "cache '{name}': bufsize must be nonzero");
        let bufalign = bufalign.max(MIN_ALIGN);
        assert!(
            bufalign.is_power_of_two(),
            "cache '{name}': alignment {bufalign} is not a power of two"
        );

        let chunksize = round_up(round_up(bufsize, bufalign), CACHE_LINE);

        if region.is_none() {
            flags |= CacheFlags::PSEUDO | CacheFlags::DYNAMIC | CacheFlags::CLEARONFREE;
        }
        if bufsize <= cfg.clearonfree_threshold {
            flags |= CacheFlags::CLEARONFREE;
        }
        if reclaim.is_some() {
            flags |= CacheFlags::RECLAIM;
        }
        if cfg.audit {
            flags |= CacheFlags::AUDIT;
        }
        if cfg.nomagazines {
            flags |= CacheFlags::NOMAGAZINES;
        }

        let provider: Arc<dyn SlabProvider> = match region {
            Some(r) => r,
            None => Arc::new(PseudoRegion::new(chunksize)),
        };
        let objsize = provider.object_size();
        let slabsize = provider.slab_size();
        assert!(
            chunksize <= objsize,
            "cache '{name}': chunk size {chunksize} exceeds region object size {objsize}"
        );

        let id = registry.next_cache_id();
        provider.attach(&name);

        let cache = Arc::new(ObjCache {
            selector: CpuSelector::new(cfg.cpus, id),
            cpus: (0..cfg.cpus).map(|_| CpuCache::new()).collect(),
            slab: Mutex::new(SlabLayer {
                hash: BufctlTable::new(
                    chunksize.ilog2(),
                    HASH_INITIAL_BUCKETS,
                    HASH_INITIAL_BUCKETS,
                    cfg.hash_bucket_ceiling,
                ),
                bufinuse: 0,
                bufmax: 0,
                allocs: 0,
                frees: 0,
            }),
            depot: Mutex::new(Depot::new()),
            depot_contention: AtomicU64::new(0),
            depot_contention_prev: AtomicU64::new(0),
            mtype: AtomicUsize::new(magtype_for_chunksize(chunksize)),
            pools: registry.pools(),
            resize: ResizeLock::default(),
            magazine_resizes: AtomicU64::new(0),
            depot_ws_reaps: AtomicU64::new(0),
            registry: Arc::downgrade(registry),
            destroyed: AtomicBool::new(false),
            name,
            id,
            flags,
            bufsize,
            bufalign,
            objalign: bufalign,
            chunksize,
            objsize,
            slabsize,
            ctor,
            dtor,
            reclaim,
            provider,
        });
        registry.register(&cache);
        debug!(
            "created cache '{}' (id {}, chunksize {}, magsize {})",
            cache.name,
            cache.id,
            cache.chunksize,
            cache.magsize()
        );
        cache
    }

    // -- accessors ---------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn flags(&self) -> CacheFlags {
        self.flags
    }

    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    pub fn bufalign(&self) -> usize {
        self.bufalign
    }

    pub fn objalign(&self) -> usize {
        self.objalign
    }

    pub fn chunksize(&self) -> usize {
        self.chunksize
    }

    pub fn objsize(&self) -> usize {
        self.objsize
    }

    pub fn slabsize(&self) -> usize {
        self.slabsize
    }

    /// Number of cpu slots in the fast-path layer.
    pub fn cpu_slots(&self) -> usize {
        self.cpus.len()
    }

    /// Rounds per magazine at the current magazine type (0 when the
    /// magazine layer is disabled for this cache).
    pub fn magsize(&self) -> usize {
        if self.flags.contains(CacheFlags::NOMAGAZINES) {
            0
        } else {
            MAG_TYPES[self.mtype.load(Ordering::Relaxed)].magsize
        }
    }

    /// Objects currently carved from slabs (client-held plus
    /// magazine-parked).
    pub fn bufinuse(&self) -> usize {
        self.slab.lock().bufinuse
    }

    /// Upper bound on memory the magazine layer can hold for this cache:
    /// two magazines per cpu slot plus a pair of depot spares.
    pub fn magazine_max(&self) -> usize {
        let magsize = MAG_TYPES[self.mtype.load(Ordering::Relaxed)].magsize;
        magsize * self.chunksize * (2 * self.cpus.len() + 2)
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Relaxed)
    }

    #[inline]
    fn ensure_live(&self) {
        assert!(
            !self.destroyed.load(Ordering::Relaxed),
            "cache '{}': used after destroy",
            self.name
        );
    }

    // -- allocation --------------------------------------------------------

    /// Allocates one constructed object. `None` means the slab provider
    /// (or the constructor) could not satisfy the request — a recoverable
    /// resource condition.
    pub fn alloc(&self, mode: AllocMode) -> Option<ObjRef> {
        self.ensure_live();
        let obj = match self.magazine_alloc() {
            Some(obj) => obj,
            None => self.slab_alloc_construct(mode)?,
        };
        if self.flags.contains(CacheFlags::AUDIT) {
            self.audit_record(obj, TxKind::Alloc);
        }
        Some(obj)
    }

    /// Allocates up to `want` constructed objects into `out`, returning
    /// how many were produced. A short count is a valid outcome, not an
    /// error; callers must compare it against `want`.
    ///
    /// Panics unless the cache was built with [`CacheFlags::BATCH`].
    pub fn alloc_batch(&self, want: usize, mode: AllocMode, out: &mut Vec<ObjRef>) -> usize {
        assert!(
            self.flags.contains(CacheFlags::BATCH),
            "cache '{}': batch allocation requires CacheFlags::BATCH",
            self.name
        );
        self.ensure_live();
        if want == 0 {
            return 0;
        }
        let start = out.len();
        self.magazine_alloc_batch(want, out);
        let mut got = out.len() - start;

        if got < want {
            got += self.slab_alloc_construct_batch(want - got, mode, out);
        }
        if self.flags.contains(CacheFlags::AUDIT) {
            for i in start..out.len() {
                self.audit_record(out[i], TxKind::Alloc);
            }
        }
        got
    }

    /// Frees one object. Never fails: when every caching layer is out of
    /// room the object is deconstructed and returned straight to the slab
    /// provider.
    pub fn free(&self, obj: ObjRef) {
        self.ensure_live();
        if self.flags.contains(CacheFlags::AUDIT) {
            self.audit_record(obj, TxKind::Free);
        }
        if !self.magazine_free(obj) {
            self.slab_free_destruct(obj);
        }
    }

    /// Frees a batch of objects, draining `objs`.
    ///
    /// Panics unless the cache was built with [`CacheFlags::BATCH`].
    pub fn free_batch(&self, objs: &mut Vec<ObjRef>) {
        assert!(
            self.flags.contains(CacheFlags::BATCH),
            "cache '{}': batch free requires CacheFlags::BATCH",
            self.name
        );
        self.ensure_live();
        for obj in objs.drain(..) {
            if self.flags.contains(CacheFlags::AUDIT) {
                self.audit_record(obj, TxKind::Free);
            }
            if !self.magazine_free(obj) {
                self.slab_free_destruct(obj);
            }
        }
    }

    // -- cpu layer ---------------------------------------------------------

    fn magazine_alloc(&self) -> Option<ObjRef> {
        let cpu = &self.cpus[self.selector.current_slot()];
        let mut c = cpu.lock();
        loop {
            if c.magsize == 0 {
                return None;
            }
            if let Some(obj) = c.loaded.as_mut().and_then(|m| m.pop()) {
                c.allocs += 1;
                return Some(obj);
            }
            if c.prev_rounds() > 0 {
                c.reload();
                continue;
            }
            if !self.depot_reload_full(&mut c, false) {
                return None;
            }
        }
    }

    fn magazine_alloc_batch(&self, want: usize, out: &mut Vec<ObjRef>) {
        let cpu = &self.cpus[self.selector.current_slot()];
        let mut c = cpu.lock();
        let mut got = 0;
        loop {
            if c.magsize == 0 {
                return;
            }
            while got < want {
                match c.loaded.as_mut().and_then(|m| m.pop()) {
                    Some(obj) => {
                        out.push(obj);
                        got += 1;
                        c.allocs += 1;
                    }
                    None => break,
                }
            }
            if got == want {
                return;
            }
            if c.prev_rounds() > 0 {
                c.reload();
                continue;
            }
            // When the remainder exceeds one magazine, ask for two.
            let pair = want - got > c.magsize;
            if !self.depot_reload_full(&mut c, pair) {
                return;
            }
        }
    }

    fn magazine_free(&self, obj: ObjRef) -> bool {
        let cpu = &self.cpus[self.selector.current_slot()];
        let mut c = cpu.lock();
        loop {
            if c.magsize == 0 {
                return false;
            }
            if let Some(m) = c.loaded.as_mut() {
                if !m.is_full() {
                    m.push(obj);
                    c.frees += 1;
                    return true;
                }
            }
            if c.previous.as_ref().map_or(false, |m| !m.is_full()) {
                c.reload();
                continue;
            }
            if self.depot_reload_empty(&mut c) {
                continue;
            }
            // Even the depot has no empty magazine: build a fresh one from
            // the type's own pool.
            let mtype = self.mtype.load(Ordering::Relaxed);
            match self.pools.get(mtype).alloc() {
                Some(fresh) => {
                    let mut depot = self.depot_lock();
                    if let Some(prev) = c.previous.take() {
                        Self::depot_park(&mut depot, prev);
                    }
                    drop(depot);
                    c.previous = c.loaded.take();
                    c.loaded = Some(fresh);
                }
                None => return false,
            }
        }
    }

    // -- depot layer -------------------------------------------------------

    /// Depot lock acquisition: try first, count the miss as contention
    /// telemetry for dynamic caches, then block.
    fn depot_lock(&self) -> MutexGuard<'_, Depot> {
        if let Some(guard) = self.depot.try_lock() {
            return guard;
        }
        if self.flags.contains(CacheFlags::DYNAMIC) {
            self.depot_contention.fetch_add(1, Ordering::Relaxed);
        }
        self.depot.lock()
    }

    /// Routes a retired magazine to the matching depot list.
    fn depot_park(depot: &mut Depot, mag: Magazine) {
        if mag.is_empty() {
            depot.empty.push(mag);
        } else {
            depot.full.push(mag);
        }
    }

    /// Pulls one (or, for `pair`, up to two) full magazines from the
    /// depot, retiring the slot's spent magazines in exchange.
    fn depot_reload_full(&self, c: &mut CpuSlot, pair: bool) -> bool {
        let mut depot = self.depot_lock();
        let first = match depot.full.pop() {
            Some(m) => m,
            None => return false,
        };
        if let Some(prev) = c.previous.take() {
            Self::depot_park(&mut depot, prev);
        }
        if pair {
            if let Some(loaded) = c.loaded.take() {
                Self::depot_park(&mut depot, loaded);
            }
            c.loaded = Some(first);
            c.previous = depot.full.pop();
        } else {
            c.previous = c.loaded.take();
            c.loaded = Some(first);
        }
        true
    }

    /// Pulls an empty magazine from the depot, retiring the slot's full
    /// previous magazine in exchange.
    fn depot_reload_empty(&self, c: &mut CpuSlot) -> bool {
        let mut depot = self.depot_lock();
        let empty = match depot.empty.pop() {
            Some(m) => m,
            None => return false,
        };
        if let Some(prev) = c.previous.take() {
            Self::depot_park(&mut depot, prev);
        }
        drop(depot);
        c.previous = c.loaded.take();
        c.loaded = Some(empty);
        true
    }

    fn depot_ws_zero(&self) {
        let mut depot = self.depot_lock();
        depot.ws_zero();
    }

    /// Destroys depot magazines outside the working set. Magazines are
    /// unlinked under the depot lock and destroyed after it is dropped.
    fn depot_ws_reap(&self) {
        let mut doomed: Vec<Magazine> = Vec::new();
        {
            let mut depot = self.depot_lock();
            for _ in 0..depot.full.reapable() {
                match depot.full.pop() {
                    Some(m) => doomed.push(m),
                    None => break,
                }
            }
            for _ in 0..depot.empty.reapable() {
                match depot.empty.pop() {
                    Some(m) => doomed.push(m),
                    None => break,
                }
            }
        }
        if doomed.is_empty() {
            return;
        }
        self.depot_ws_reaps.fetch_add(1, Ordering::Relaxed);
        for mag in doomed {
            self.magazine_destroy(mag);
        }
    }

    // -- slab boundary -----------------------------------------------------

    fn slab_track(&self, so: SlabObj) {
        let mut sl = self.slab.lock();
        sl.hash.insert(
            so.obj.addr(),
            so.slab,
            so.idx,
            self.flags.contains(CacheFlags::AUDIT),
        );
        sl.bufinuse += 1;
        if sl.bufinuse > sl.bufmax {
            sl.bufmax = sl.bufinuse;
        }
        sl.allocs += 1;
    }

    fn slab_alloc_construct(&self, mode: AllocMode) -> Option<ObjRef> {
        let so = self.provider.alloc(mode)?;
        self.slab_track(so);
        if let Some(ctor) = &self.ctor {
            if let Err(err) = ctor(so.obj, mode) {
                debug!("cache '{}': constructor failed: {}", self.name, err);
                self.slab_free_raw(so.obj);
                return None;
            }
        }
        Some(so.obj)
    }

    /// Raw-slab leg of the batch path: carve, construct, and on the first
    /// constructor failure return the constructed prefix while releasing
    /// the unconstructed remainder.
    fn slab_alloc_construct_batch(
        &self,
        want: usize,
        mode: AllocMode,
        out: &mut Vec<ObjRef>,
    ) -> usize {
        let mut raw = Vec::with_capacity(want);
        self.provider.batch_alloc(want, mode, &mut raw);
        let mut got = 0;
        let mut idx = 0;
        while idx < raw.len() {
            let so = raw[idx];
            idx += 1;
            self.slab_track(so);
            if let Some(ctor) = &self.ctor {
                if let Err(err) = ctor(so.obj, mode) {
                    debug!("cache '{}': constructor failed: {}", self.name, err);
                    self.slab_free_raw(so.obj);
                    break;
                }
            }
            out.push(so.obj);
            got += 1;
        }
        // Anything past the failure point never entered the hash; hand it
        // straight back.
        if idx < raw.len() {
            let rest: Vec<(u32, u32)> = raw[idx..].iter().map(|so| (so.slab, so.idx)).collect();
            self.provider
                .batch_free(&rest, self.flags.contains(CacheFlags::CLEARONFREE));
        }
        got
    }

    fn slab_free_raw(&self, obj: ObjRef) {
        let (slab, idx) = {
            let mut sl = self.slab.lock();
            let bc = sl.hash.remove(obj.addr()).unwrap_or_else(|| {
                panic!(
                    "cache '{}': object {:#x} was never allocated from this cache",
                    self.name,
                    obj.addr()
                )
            });
            sl.bufinuse -= 1;
            sl.frees += 1;
            (bc.slab, bc.idx)
        };
        self.provider
            .free(slab, idx, self.flags.contains(CacheFlags::CLEARONFREE));
    }

    fn slab_free_destruct(&self, obj: ObjRef) {
        if let Some(dtor) = &self.dtor {
            dtor(obj);
        }
        self.slab_free_raw(obj);
    }

    // -- audit -------------------------------------------------------------

    fn audit_record(&self, obj: ObjRef, kind: TxKind) {
        let mut sl = self.slab.lock();
        match sl.hash.lookup_mut(obj.addr()) {
            Some(bc) => {
                if let Some(ring) = bc.audit.as_mut() {
                    ring.record(kind);
                }
            }
            None => panic!(
                "cache '{}': object {:#x} was never allocated from this cache",
                self.name,
                obj.addr()
            ),
        }
    }

    /// Returns the recorded audit transactions for a live object, oldest
    /// first, or `None` when the cache does not run in audit mode.
    ///
    /// Panics if the pointer was never allocated from this cache, like
    /// every other lookup on a foreign pointer.
    pub fn audit_trail(&self, obj: ObjRef) -> Option<Vec<AuditRecord>> {
        self.ensure_live();
        let sl = self.slab.lock();
        let bc = sl.hash.lookup(obj.addr()).unwrap_or_else(|| {
            panic!(
                "cache '{}': object {:#x} was never allocated from this cache",
                self.name,
                obj.addr()
            )
        });
        let ring = bc.audit.as_ref()?;
        Some(
            ring.iter()
                .map(|tx| AuditRecord {
                    op: match tx.kind {
                        TxKind::Alloc => AuditOp::Alloc,
                        TxKind::Free => AuditOp::Free,
                    },
                    thread: tx.thread,
                    at: tx.at,
                    stack: tx.stack.to_string(),
                })
                .collect(),
        )
    }

    // -- object info -------------------------------------------------------

    /// Reports where a live object sits in its region.
    ///
    /// Panics if the pointer was never allocated from this cache — an
    /// object missing from the bufctl table is a caller bug, not a lookup
    /// miss.
    pub fn get_obj_info(&self, obj: ObjRef) -> ObjInfo {
        self.ensure_live();
        let sl = self.slab.lock();
        let bc = sl.hash.lookup(obj.addr()).unwrap_or_else(|| {
            panic!(
                "cache '{}': object {:#x} was never allocated from this cache",
                self.name,
                obj.addr()
            )
        });
        ObjInfo {
            obj,
            slab: bc.slab,
            slab_idx: bc.idx,
            region_idx: bc.slab as usize * self.provider.slab_chunks() + bc.idx as usize,
            chunksize: self.chunksize,
        }
    }

    // -- magazine layer control -------------------------------------------

    /// Enables the per-cpu layer at the current magazine type.
    pub(crate) fn magazine_enable(&self) {
        if self.flags.contains(CacheFlags::NOMAGAZINES) {
            return;
        }
        let magsize = MAG_TYPES[self.mtype.load(Ordering::Relaxed)].magsize;
        for cpu in self.cpus.iter() {
            cpu.lock().magsize = magsize;
        }
    }

    /// Enables the magazine layer under resize exclusivity.
    pub(crate) fn magazine_arm(&self) {
        self.resize.enter();
        self.magazine_enable();
        self.resize.exit();
    }

    /// Disables every cpu slot, destroys its magazines, and reaps the
    /// entire depot. Callers hold the resize lock.
    fn magazine_purge(&self) {
        for cpu in self.cpus.iter() {
            let (loaded, previous) = {
                let mut c = cpu.lock();
                c.magsize = 0;
                (c.loaded.take(), c.previous.take())
            };
            if let Some(mag) = loaded {
                self.magazine_destroy(mag);
            }
            if let Some(mag) = previous {
                self.magazine_destroy(mag);
            }
        }
        self.depot_ws_zero();
        self.depot_ws_reap();
    }

    /// Deconstructs every round and returns the raw objects to the slab
    /// provider, then parks the shell in its type's pool.
    fn magazine_destroy(&self, mut mag: Magazine) {
        while let Some(obj) = mag.pop() {
            if let Some(dtor) = &self.dtor {
                dtor(obj);
            }
            self.slab_free_raw(obj);
        }
        self.pools.get(mag.mtype()).free(mag);
    }

    /// One-step magazine growth under the resize lock.
    fn magazine_resize(&self) {
        self.resize.enter();
        let mt = self.mtype.load(Ordering::Relaxed);
        if self.chunksize < MAG_TYPES[mt].maxbuf && mt + 1 < MAG_TYPES.len() {
            self.magazine_purge();
            self.mtype.store(mt + 1, Ordering::Relaxed);
            // Poison the baseline one tick into the future so the next
            // update cannot re-trigger on stale counts.
            let contention = self.depot_contention.load(Ordering::Relaxed);
            self.depot_contention_prev
                .store(contention.wrapping_add(i64::MAX as u64), Ordering::Relaxed);
            self.magazine_enable();
            self.magazine_resizes.fetch_add(1, Ordering::Relaxed);
            debug!(
                "cache '{}': magazines grown to {} rounds",
                self.name,
                MAG_TYPES[mt + 1].magsize
            );
        }
        self.resize.exit();
    }

    // -- reaping & maintenance --------------------------------------------

    /// Synchronously reclaims idle depot magazines; with `purge`, also
    /// empties and re-arms the per-cpu fast path.
    pub fn reap_now(&self, purge: bool) {
        self.ensure_live();
        self.reap_internal(purge, true);
    }

    /// `wait = false` is the opportunistic variant used by registry-wide
    /// reclaim: a cache whose resize lock is busy is skipped, not waited
    /// on.
    pub(crate) fn reap_internal(&self, purge: bool, wait: bool) {
        if self.is_destroyed() {
            return;
        }
        if let Some(reclaim) = &self.reclaim {
            reclaim();
        }
        if purge {
            if wait {
                self.resize.enter();
            } else if !self.resize.try_enter() {
                return;
            }
            self.magazine_purge();
            self.magazine_enable();
            self.resize.exit();
        } else {
            self.depot_ws_zero();
            self.depot_ws_reap();
        }
    }

    /// One maintenance tick: roll working sets, rescale the bufctl table,
    /// consider magazine growth, reap idle magazines. Driven by the
    /// registry, never concurrently with itself.
    pub(crate) fn update(&self, contention_threshold: u64) {
        if self.is_destroyed() {
            return;
        }
        {
            let mut depot = self.depot_lock();
            depot.ws_update();
        }
        {
            let mut sl = self.slab.lock();
            if sl.hash.maybe_rescale() {
                log::trace!(
                    "cache '{}': bufctl table rescaled to {} buckets",
                    self.name,
                    sl.hash.bucket_count()
                );
            }
        }

        let mut resized = false;
        if self.flags.contains(CacheFlags::DYNAMIC) && !self.flags.contains(CacheFlags::NOMAGAZINES)
        {
            let mt = self.mtype.load(Ordering::Relaxed);
            let contention = self.depot_contention.load(Ordering::Relaxed);
            let prev = self.depot_contention_prev.load(Ordering::Relaxed);
            let delta = contention.wrapping_sub(prev) as i64;
            if self.chunksize < MAG_TYPES[mt].maxbuf && delta > contention_threshold as i64 {
                self.magazine_resize();
                resized = true;
            }
        }
        if !resized {
            let contention = self.depot_contention.load(Ordering::Relaxed);
            self.depot_contention_prev
                .store(contention, Ordering::Relaxed);
        }

        self.depot_ws_reap();
    }

    // -- destruction -------------------------------------------------------

    /// Unregisters the cache, purges every cached magazine, and releases
    /// the region binding.
    ///
    /// Panics if any object is still outstanding — destroying a non-empty
    /// cache is an unrecoverable caller bug.
    pub fn destroy(&self) {
        assert!(
            !self.destroyed.swap(true, Ordering::SeqCst),
            "cache '{}': destroyed twice",
            self.name
        );
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
        self.resize.enter();
        self.magazine_purge();
        self.resize.exit();

        let bufinuse = self.slab.lock().bufinuse;
        assert!(
            bufinuse == 0,
            "cache '{}': destroyed with {} objects still in use",
            self.name,
            bufinuse
        );
        assert_eq!(
            self.provider.in_use(),
            0,
            "cache '{}': slab layer not empty at destroy",
            self.name
        );
        self.provider.detach();
        debug!("destroyed cache '{}'", self.name);
    }

    // -- observability -----------------------------------------------------

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let (cpu_allocs, cpu_frees) = self.cpus.iter().fold((0u64, 0u64), |(a, f), cpu| {
            let c = cpu.lock();
            (a + c.allocs, f + c.frees)
        });
        let (slab_allocs, slab_frees, bufinuse, bufmax, hash_rescales, hash_buckets) = {
            let sl = self.slab.lock();
            (
                sl.allocs,
                sl.frees,
                sl.bufinuse,
                sl.bufmax,
                sl.hash.rescales(),
                sl.hash.bucket_count(),
            )
        };
        // Plain lock: observation must not skew contention telemetry.
        let (depot_full, depot_empty, depot_full_allocs, depot_empty_allocs) = {
            let depot = self.depot.lock();
            (
                depot.full.len(),
                depot.empty.len(),
                depot.full.allocs(),
                depot.empty.allocs(),
            )
        };
        CacheStats {
            name: self.name.clone(),
            id: self.id,
            bufsize: self.bufsize,
            chunksize: self.chunksize,
            objsize: self.objsize,
            magsize: self.magsize(),
            cpu_allocs,
            cpu_frees,
            slab_allocs,
            slab_frees,
            depot_full,
            depot_empty,
            depot_full_allocs,
            depot_empty_allocs,
            depot_contention: self.depot_contention.load(Ordering::Relaxed),
            magazine_resizes: self.magazine_resizes.load(Ordering::Relaxed),
            hash_rescales,
            hash_buckets,
            depot_ws_reaps: self.depot_ws_reaps.load(Ordering::Relaxed),
            bufinuse,
            bufmax,
        }
    }

    /// Working-set view of the depot.
    pub fn depot_snapshot(&self) -> DepotSnapshot {
        let depot = self.depot.lock();
        DepotSnapshot {
            full: DepotListSnapshot {
                count: depot.full.len(),
                min: depot.full.min(),
                reap_limit: depot.full.reap_limit(),
                allocs: depot.full.allocs(),
            },
            empty: DepotListSnapshot {
                count: depot.empty.len(),
                min: depot.empty.min(),
                reap_limit: depot.empty.reap_limit(),
                allocs: depot.empty.allocs(),
            },
        }
    }

    /// Per-slot view of the cpu layer.
    pub fn cpu_snapshot(&self) -> Vec<CpuSnapshot> {
        self.cpus
            .iter()
            .map(|cpu| {
                let c = cpu.lock();
                CpuSnapshot {
                    magsize: c.magsize,
                    loaded_rounds: c.loaded.as_ref().map(|m| m.len()),
                    previous_rounds: c.previous.as_ref().map(|m| m.len()),
                    allocs: c.allocs,
                    frees: c.frees,
                }
            })
            .collect()
    }

    /// Walks every layer verifying structural invariants. Test helper.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        for (i, cpu) in self.cpus.iter().enumerate() {
            let c = cpu.lock();
            if c.magsize == 0 {
                if c.loaded.is_some() || c.previous.is_some() {
                    return Err(InvariantError::new(format!(
                        "cpu {i}: magazines present while slot disabled"
                    )));
                }
                continue;
            }
            if c.rounds() > c.magsize {
                return Err(InvariantError::new(format!(
                    "cpu {i}: {} rounds exceed magsize {}",
                    c.rounds(),
                    c.magsize
                )));
            }
            if c.prev_rounds() > c.magsize {
                return Err(InvariantError::new(format!(
                    "cpu {i}: {} previous rounds exceed magsize {}",
                    c.prev_rounds(),
                    c.magsize
                )));
            }
        }
        let depot = self.depot.lock();
        if depot.full.min() > depot.full.len() {
            return Err(InvariantError::new("depot full: min above count"));
        }
        if depot.empty.min() > depot.empty.len() {
            return Err(InvariantError::new("depot empty: min above count"));
        }
        Ok(())
    }

    // -- test hooks --------------------------------------------------------

    #[cfg(test)]
    pub(crate) fn inject_depot_contention(&self, n: u64) {
        self.depot_contention.fetch_add(n, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn try_resize_enter(&self) -> bool {
        self.resize.try_enter()
    }

    #[cfg(test)]
    pub(crate) fn resize_exit(&self) {
        self.resize.exit();
    }
}

impl std::fmt::Debug for ObjCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjCache")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("chunksize", &self.chunksize)
            .field("objsize", &self.objsize)
            .field("magsize", &self.magsize())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::builder::CacheBuilder;
    use crate::error::CtorError;
    use crate::region::NormalRegion;
    use crate::registry::{CacheRegistry, RegistryConfig};

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            cpus: 2,
            update_interval: Duration::from_secs(3600),
            ..RegistryConfig::default()
        }
    }

    fn started_registry() -> Arc<CacheRegistry> {
        let registry = CacheRegistry::new(test_config()).unwrap();
        registry.start();
        registry
    }

    #[test]
    fn geometry_rounds_to_cache_line() {
        let registry = started_registry();
        let cache = CacheBuilder::new("geom", 48).build(&registry);
        assert_eq!(cache.chunksize(), 64);
        assert_eq!(cache.bufalign(), 8);
        assert!(cache.chunksize() <= cache.objsize());

        let cache2 = CacheBuilder::new("geom2", 100).align(32).build(&registry);
        assert_eq!(cache2.chunksize(), 128);
        cache.destroy();
        cache2.destroy();
    }

    #[test]
    fn pseudo_cache_gets_implied_flags() {
        let registry = started_registry();
        let cache = CacheBuilder::new("implied", 96).build(&registry);
        assert!(cache
            .flags()
            .contains(CacheFlags::PSEUDO | CacheFlags::DYNAMIC | CacheFlags::CLEARONFREE));
        cache.destroy();
    }

    #[test]
    fn small_objects_get_clearonfree() {
        let registry = started_registry();
        let region = Arc::new(NormalRegion::new(512, 8));
        let small = CacheBuilder::new("small", 64).region(region).build(&registry);
        assert!(small.flags().contains(CacheFlags::CLEARONFREE));
        assert!(!small.flags().contains(CacheFlags::PSEUDO));

        let region = Arc::new(NormalRegion::new(2048, 8));
        let large = CacheBuilder::new("large", 2048).region(region).build(&registry);
        assert!(!large.flags().contains(CacheFlags::CLEARONFREE));
        small.destroy();
        large.destroy();
    }

    #[test]
    #[should_panic(expected = "exceeds region object size")]
    fn chunk_larger_than_region_object_panics() {
        let registry = started_registry();
        let region = Arc::new(NormalRegion::new(64, 8));
        CacheBuilder::new("mismatch", 128).region(region).build(&registry);
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn non_power_of_two_alignment_panics() {
        let registry = started_registry();
        CacheBuilder::new("badalign", 64).align(24).build(&registry);
    }

    #[test]
    fn alloc_free_balance_and_destroy() {
        let registry = started_registry();
        let cache = CacheBuilder::new("balance", 64).build(&registry);

        let objs: Vec<ObjRef> = (0..100)
            .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
            .collect();
        assert_eq!(cache.bufinuse(), 100);

        for obj in objs {
            cache.free(obj);
        }
        cache.check_invariants().unwrap();

        // Freed objects sit in magazines until purged.
        cache.reap_now(true);
        assert_eq!(cache.bufinuse(), 0);
        cache.destroy();
    }

    #[test]
    fn lifo_warmth_on_one_slot() {
        let registry = started_registry();
        let cache = CacheBuilder::new("lifo", 64).build(&registry);

        let a = cache.alloc(AllocMode::Sleep).unwrap();
        let b = cache.alloc(AllocMode::Sleep).unwrap();
        cache.free(a);
        cache.free(b);
        // Most recently freed comes back first, then the other.
        assert_eq!(cache.alloc(AllocMode::Sleep), Some(b));
        assert_eq!(cache.alloc(AllocMode::Sleep), Some(a));

        cache.free(a);
        cache.free(b);
        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn nomagazines_cache_goes_straight_to_slab() {
        let registry = started_registry();
        let region = Arc::new(NormalRegion::new(64, 16));
        let cache = CacheBuilder::new("nomag", 64)
            .flags(CacheFlags::NOMAGAZINES)
            .region(region)
            .build(&registry);
        assert_eq!(cache.magsize(), 0);

        let obj = cache.alloc(AllocMode::Sleep).unwrap();
        cache.free(obj);
        for snap in cache.cpu_snapshot() {
            assert_eq!(snap.magsize, 0);
            assert_eq!(snap.loaded_rounds, None);
        }
        let stats = cache.stats();
        assert_eq!(stats.slab_allocs, 1);
        assert_eq!(stats.slab_frees, 1);
        assert_eq!(cache.bufinuse(), 0);
        cache.destroy();
    }

    #[test]
    fn purge_empties_every_cpu_slot_and_recovers() {
        let registry = started_registry();
        let cache = CacheBuilder::new("purge", 64).build(&registry);

        let objs: Vec<ObjRef> = (0..50)
            .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
            .collect();
        for obj in objs {
            cache.free(obj);
        }

        cache.reap_now(true);
        for snap in cache.cpu_snapshot() {
            assert_eq!(snap.loaded_rounds, None);
            assert_eq!(snap.previous_rounds, None);
            assert!(snap.magsize > 0, "fast path must be re-armed");
        }
        assert_eq!(cache.bufinuse(), 0);

        // The layer re-populates on the next cycle.
        let obj = cache.alloc(AllocMode::Sleep).unwrap();
        cache.free(obj);
        let snaps = cache.cpu_snapshot();
        assert!(snaps.iter().any(|s| s.loaded_rounds == Some(1)));
        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn get_obj_info_reports_indices() {
        let registry = started_registry();
        let region = Arc::new(NormalRegion::new(64, 8));
        let cache = CacheBuilder::new("info", 64).region(region).build(&registry);

        let objs: Vec<ObjRef> = (0..20)
            .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
            .collect();
        for &obj in &objs {
            let info = cache.get_obj_info(obj);
            assert_eq!(info.obj, obj);
            assert!((info.slab_idx as usize) < 8);
            assert_eq!(
                info.region_idx,
                info.slab as usize * 8 + info.slab_idx as usize
            );
            assert_eq!(info.chunksize, 64);
        }
        for obj in objs {
            cache.free(obj);
        }
        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    #[should_panic(expected = "never allocated from this cache")]
    fn get_obj_info_foreign_pointer_panics() {
        let registry = started_registry();
        let cache = CacheBuilder::new("foreign", 64).build(&registry);
        cache.get_obj_info(ObjRef(0xdeadbeef));
    }

    #[test]
    #[should_panic(expected = "objects still in use")]
    fn destroy_with_outstanding_objects_panics() {
        let registry = started_registry();
        let cache = CacheBuilder::new("leaky", 64).build(&registry);
        let _leaked = cache.alloc(AllocMode::Sleep).unwrap();
        cache.destroy();
    }

    #[test]
    #[should_panic(expected = "requires CacheFlags::BATCH")]
    fn batch_alloc_without_flag_panics() {
        let registry = started_registry();
        let cache = CacheBuilder::new("nobatch", 64).build(&registry);
        let mut out = Vec::new();
        cache.alloc_batch(4, AllocMode::Sleep, &mut out);
    }

    #[test]
    fn batch_roundtrip() {
        let registry = started_registry();
        let cache = CacheBuilder::new("batch", 64)
            .flags(CacheFlags::BATCH)
            .build(&registry);

        let mut out = Vec::new();
        let got = cache.alloc_batch(200, AllocMode::Sleep, &mut out);
        assert_eq!(got, 200);
        assert_eq!(out.len(), 200);
        // All distinct.
        let mut addrs: Vec<usize> = out.iter().map(|o| o.addr()).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 200);

        cache.free_batch(&mut out);
        assert!(out.is_empty());
        cache.check_invariants().unwrap();
        cache.reap_now(true);
        assert_eq!(cache.bufinuse(), 0);
        cache.destroy();
    }

    #[test]
    fn batch_alloc_reports_partial_on_exhaustion() {
        let registry = started_registry();
        let region = Arc::new(NormalRegion::bounded(64, 4, 2)); // 8 chunks total
        let cache = CacheBuilder::new("partial", 64)
            .flags(CacheFlags::BATCH)
            .region(region)
            .build(&registry);

        let mut out = Vec::new();
        let got = cache.alloc_batch(20, AllocMode::Sleep, &mut out);
        assert_eq!(got, 8);
        cache.free_batch(&mut out);
        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn ctor_failure_returns_constructed_prefix() {
        let registry = started_registry();
        let built = Arc::new(AtomicUsize::new(0));
        let built2 = built.clone();
        let cache = CacheBuilder::new("ctorfail", 64)
            .flags(CacheFlags::BATCH)
            .ctor(move |_obj, _mode| {
                if built2.fetch_add(1, Ordering::Relaxed) < 5 {
                    Ok(())
                } else {
                    Err(CtorError::new("synthetic failure"))
                }
            })
            .build(&registry);

        let mut out = Vec::new();
        let got = cache.alloc_batch(10, AllocMode::Sleep, &mut out);
        assert_eq!(got, 5);
        assert_eq!(cache.bufinuse(), 5);
        cache.free_batch(&mut out);
        cache.reap_now(true);
        assert_eq!(cache.bufinuse(), 0);
        cache.destroy();
    }

    #[test]
    fn dtor_runs_when_objects_return_to_slab() {
        let registry = started_registry();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let destroyed2 = destroyed.clone();
        let cache = CacheBuilder::new("dtor", 64)
            .dtor(move |_obj| {
                destroyed2.fetch_add(1, Ordering::Relaxed);
            })
            .build(&registry);

        let objs: Vec<ObjRef> = (0..10)
            .map(|_| cache.alloc(AllocMode::Sleep).unwrap())
            .collect();
        for obj in objs {
            cache.free(obj);
        }
        assert_eq!(destroyed.load(Ordering::Relaxed), 0); // still magazine-cached

        cache.reap_now(true);
        assert_eq!(destroyed.load(Ordering::Relaxed), 10);
        cache.destroy();
    }

    #[test]
    fn reclaim_callback_fires_on_reap() {
        let registry = started_registry();
        let reclaims = Arc::new(AtomicUsize::new(0));
        let reclaims2 = reclaims.clone();
        let cache = CacheBuilder::new("reclaim", 64)
            .reclaim(move || {
                reclaims2.fetch_add(1, Ordering::Relaxed);
            })
            .build(&registry);
        assert!(cache.flags().contains(CacheFlags::RECLAIM));

        cache.reap_now(false);
        assert_eq!(reclaims.load(Ordering::Relaxed), 1);
        cache.destroy();
    }

    #[test]
    fn contention_grows_magazines_once_per_crossing_tick() {
        let registry = started_registry();
        let region = Arc::new(NormalRegion::new(64, 32));
        let cache = CacheBuilder::new("resize", 48)
            .flags(CacheFlags::DYNAMIC)
            .region(region)
            .build(&registry);
        // chunksize 64 starts at the 62-round type.
        assert_eq!(cache.magsize(), 62);

        let expected = [94, 94, 142, 142, 254, 254, 510, 510, 510, 510];
        for &want in &expected {
            cache.inject_depot_contention(10);
            registry.update_now();
            assert_eq!(cache.magsize(), want);
        }
        // Growth stops at the table's last type and never regresses.
        assert_eq!(
            cache.stats().magazine_resizes,
            4,
            "one step per crossing tick"
        );
        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn quiet_caches_never_resize() {
        let registry = started_registry();
        let cache = CacheBuilder::new("quiet", 64).build(&registry);
        let before = cache.magsize();
        for _ in 0..5 {
            registry.update_now();
        }
        assert_eq!(cache.magsize(), before);
        assert_eq!(cache.stats().magazine_resizes, 0);
        cache.destroy();
    }

    #[test]
    fn resize_lock_is_reentrant_and_exclusive() {
        let registry = started_registry();
        let cache = CacheBuilder::new("rlock", 64).build(&registry);

        assert!(cache.try_resize_enter());
        assert!(cache.try_resize_enter()); // re-entry from the same thread
        cache.resize_exit();

        let cache2 = cache.clone();
        let other = std::thread::spawn(move || cache2.try_resize_enter());
        assert!(!other.join().unwrap(), "other threads must fail fast");

        cache.resize_exit();
        let cache3 = cache.clone();
        let other = std::thread::spawn(move || {
            let ok = cache3.try_resize_enter();
            if ok {
                cache3.resize_exit();
            }
            ok
        });
        assert!(other.join().unwrap());
        cache.destroy();
    }

    #[test]
    fn audit_mode_records_transactions() {
        let cfg = RegistryConfig {
            audit: true,
            ..test_config()
        };
        let registry = CacheRegistry::new(cfg).unwrap();
        registry.start();
        let cache = CacheBuilder::new("audited", 64).build(&registry);
        assert!(cache.flags().contains(CacheFlags::AUDIT));

        let obj = cache.alloc(AllocMode::Sleep).unwrap();
        cache.free(obj);
        let obj2 = cache.alloc(AllocMode::Sleep).unwrap();
        assert_eq!(obj2, obj); // lifo reuse keeps the same bufctl

        {
            let sl = cache.slab.lock();
            let ring = sl
                .hash
                .lookup(obj.addr())
                .unwrap()
                .audit
                .as_ref()
                .expect("audited cache must carry rings");
            assert_eq!(ring.len(), 3); // alloc, free, alloc
            assert_eq!(ring.iter().last().unwrap().kind, TxKind::Alloc);
        }

        cache.free(obj2);
        cache.reap_now(true);
        cache.destroy();
    }

    #[test]
    fn nosleep_fails_cleanly_on_exhausted_region() {
        let registry = started_registry();
        let region = Arc::new(NormalRegion::bounded(64, 4, 1));
        let cache = CacheBuilder::new("nosleep", 64)
            .flags(CacheFlags::NOMAGAZINES)
            .region(region)
            .build(&registry);

        // Nothing is carved yet, and NoSleep may not grow a slab.
        assert_eq!(cache.alloc(AllocMode::NoSleep), None);

        let mut objs = vec![cache.alloc(AllocMode::Sleep).unwrap()];
        // The slab now exists; NoSleep can carve the remaining chunks.
        for _ in 0..3 {
            objs.push(cache.alloc(AllocMode::NoSleep).unwrap());
        }
        assert_eq!(cache.alloc(AllocMode::NoSleep), None);
        assert_eq!(cache.alloc(AllocMode::Sleep), None); // region cap reached
        for obj in objs {
            cache.free(obj);
        }
        cache.destroy();
    }

    #[test]
    fn magazine_max_scales_with_geometry() {
        let registry = started_registry();
        let cache = CacheBuilder::new("magmax", 64).build(&registry);
        let bound = cache.magazine_max();
        // 62 rounds * 64 bytes * (2 slots * 2 + 2)
        assert_eq!(bound, 62 * 64 * 6);
        cache.destroy();
    }

    #[test]
    #[should_panic(expected = "used after destroy")]
    fn use_after_destroy_panics() {
        let registry = started_registry();
        let cache = CacheBuilder::new("dead", 64).build(&registry);
        cache.destroy();
        cache.alloc(AllocMode::Sleep);
    }
}
