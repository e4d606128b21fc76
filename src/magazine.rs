//! Magazines: bounded stacks of object handles, the unit of bulk transfer
//! between the per-CPU layer and the depot.
//!
//! ## Magazine types
//!
//! Capacity is not chosen per cache but from a fixed table of magazine
//! types keyed by chunk size: the larger the object, the smaller the
//! magazine, so the memory held hostage by the caching layers stays
//! roughly constant across caches. A cache starts at the type selected by
//! its chunk size and may be advanced one step at a time by the resize
//! controller when depot lock contention shows its magazines are too
//! small. Growth never reverses.
//!
//! ## Magazine pool
//!
//! Magazines are themselves cache objects: each magazine type has its own
//! [`MagazinePool`], shared by every cache in a registry, with the same
//! working-set accounting the depot uses. The composition is depth
//! bounded — pools hand out magazines from a free list or the heap and
//! never need magazines for their own bookkeeping.

use parking_lot::Mutex;

use crate::types::ObjRef;

/// One entry in the magazine-type table.
#[derive(Debug, Clone, Copy)]
pub struct MagType {
    /// Rounds per magazine of this type.
    pub magsize: usize,
    /// Chunk sizes at or below this start at a later (larger) type.
    pub minbuf: usize,
    /// A cache may grow past this type only while its chunk size is
    /// strictly below `maxbuf`; 0 ends the table.
    pub maxbuf: usize,
}

/// Magazine-type table, ordered from largest chunks / smallest magazines
/// to smallest chunks / largest magazines.
pub(crate) const MAG_TYPES: [MagType; 8] = [
    MagType { magsize: 14, minbuf: 3072, maxbuf: 65536 },
    MagType { magsize: 30, minbuf: 256, maxbuf: 32768 },
    MagType { magsize: 46, minbuf: 64, maxbuf: 16384 },
    MagType { magsize: 62, minbuf: 0, maxbuf: 8192 },
    MagType { magsize: 94, minbuf: 0, maxbuf: 4096 },
    MagType { magsize: 142, minbuf: 0, maxbuf: 2048 },
    MagType { magsize: 254, minbuf: 0, maxbuf: 1024 },
    MagType { magsize: 510, minbuf: 0, maxbuf: 0 },
];

/// Initial magazine-type index for a chunk size.
pub(crate) fn magtype_for_chunksize(chunksize: usize) -> usize {
    debug_assert!(chunksize > 0);
    let mut i = 0;
    while chunksize <= MAG_TYPES[i].minbuf {
        i += 1;
    }
    i
}

/// Fixed-capacity LIFO stack of object handles.
///
/// Owned by exactly one holder at a time: a cpu slot, a depot list, a
/// pool, or the thread moving it between them.
#[derive(Debug)]
pub(crate) struct Magazine {
    rounds: Vec<ObjRef>,
    mtype: usize,
}

impl Magazine {
    pub(crate) fn new(mtype: usize) -> Self {
        Self {
            rounds: Vec::with_capacity(MAG_TYPES[mtype].magsize),
            mtype,
        }
    }

    #[inline]
    pub(crate) fn mtype(&self) -> usize {
        self.mtype
    }

    #[inline]
    pub(crate) fn cap(&self) -> usize {
        MAG_TYPES[self.mtype].magsize
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.rounds.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.rounds.len() == self.cap()
    }

    #[inline]
    pub(crate) fn push(&mut self, obj: ObjRef) {
        debug_assert!(!self.is_full(), "push into full magazine");
        self.rounds.push(obj);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<ObjRef> {
        self.rounds.pop()
    }
}

// ---------------------------------------------------------------------------
// MagazinePool
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PoolInner {
    free: Vec<Magazine>,
    /// Magazines of this type in circulation anywhere (cpu, depot, free).
    outstanding: usize,
    min: usize,
    reap_limit: usize,
    allocs: u64,
}

/// Free pool for magazines of one type.
#[derive(Debug)]
pub(crate) struct MagazinePool {
    mtype: usize,
    cap: Option<usize>,
    inner: Mutex<PoolInner>,
}

impl MagazinePool {
    pub(crate) fn new(mtype: usize, cap: Option<usize>) -> Self {
        Self {
            mtype,
            cap,
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                outstanding: 0,
                min: 0,
                reap_limit: 0,
                allocs: 0,
            }),
        }
    }

    /// Takes an empty magazine, from the free list or freshly built.
    /// `None` only when the pool is capped and fully subscribed — callers
    /// degrade to the direct slab path, they do not fail.
    pub(crate) fn alloc(&self) -> Option<Magazine> {
        let mut inner = self.inner.lock();
        inner.allocs += 1;
        if let Some(mag) = inner.free.pop() {
            inner.min = inner.min.min(inner.free.len());
            return Some(mag);
        }
        if let Some(cap) = self.cap {
            if inner.outstanding >= cap {
                return None;
            }
        }
        inner.outstanding += 1;
        Some(Magazine::new(self.mtype))
    }

    /// Returns a drained magazine to the free list.
    pub(crate) fn free(&self, mag: Magazine) {
        debug_assert!(mag.is_empty(), "magazine freed with live rounds");
        debug_assert_eq!(mag.mtype(), self.mtype);
        self.inner.lock().free.push(mag);
    }

    /// Working-set rollover: last interval's low-water mark becomes this
    /// interval's reap ceiling.
    pub(crate) fn ws_update(&self) {
        let mut inner = self.inner.lock();
        inner.reap_limit = inner.min;
        inner.min = inner.free.len();
    }

    /// Releases idle magazines outside the working set back to the heap.
    pub(crate) fn ws_reap(&self) {
        let mut inner = self.inner.lock();
        let reap = inner.reap_limit.min(inner.min).min(inner.free.len());
        for _ in 0..reap {
            inner.free.pop();
            inner.outstanding -= 1;
            inner.min = inner.min.min(inner.free.len());
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    pub(crate) fn free_count(&self) -> usize {
        self.inner.lock().free.len()
    }

    pub(crate) fn allocs(&self) -> u64 {
        self.inner.lock().allocs
    }
}

/// One pool per magazine type; shared by every cache in a registry.
#[derive(Debug)]
pub(crate) struct MagazinePools {
    pools: Vec<MagazinePool>,
}

impl MagazinePools {
    pub(crate) fn new(cap: Option<usize>) -> Self {
        Self {
            pools: (0..MAG_TYPES.len())
                .map(|mt| MagazinePool::new(mt, cap))
                .collect(),
        }
    }

    #[inline]
    pub(crate) fn get(&self, mtype: usize) -> &MagazinePool {
        &self.pools[mtype]
    }

    pub(crate) fn ws_update_all(&self) {
        for pool in &self.pools {
            pool.ws_update();
            pool.ws_reap();
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<crate::stats::PoolSnapshot> {
        self.pools
            .iter()
            .map(|pool| crate::stats::PoolSnapshot {
                magsize: MAG_TYPES[pool.mtype].magsize,
                outstanding: pool.outstanding(),
                free: pool.free_count(),
                allocs: pool.allocs(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
