//! Slab providers: the backing-store collaborators beneath the cache.
//!
//! The cache engine never touches backing memory itself — it asks a
//! [`SlabProvider`] for raw, uninitialized, fixed-size chunks and hands
//! them back when the magazine layer lets go of them. Two providers cover
//! the closed set of region shapes the engine knows about:
//!
//! - [`NormalRegion`]: a shared region carved into multi-chunk slabs; the
//!   usual case, where the host sizes the region up front.
//! - [`PseudoRegion`]: a private single-object-per-slab region, created
//!   implicitly when a cache is built without a region. Objects come back
//!   zeroed, so clear-on-free is delegated to the allocation itself.
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────┐
//!   │  NormalRegion                                                  │
//!   │                                                                │
//!   │   slabs[0]  ┌──────┬──────┬──────┬──────┐  free: [3]          │
//!   │             │ used │ used │ used │ free │                      │
//!   │             └──────┴──────┴──────┴──────┘                      │
//!   │   slabs[1]  ┌──────┬──────┬──────┬──────┐  free: [0,1,2,3]    │
//!   │             │ free │ free │ free │ free │                      │
//!   │             └──────┴──────┴──────┴──────┘                      │
//!   │                                                                │
//!   │   free_slabs: [1, 0]   (slabs with at least one free chunk)    │
//!   │                                                                │
//!   │   alloc(Sleep):   carve from free_slabs top, or grow a slab    │
//!   │   alloc(NoSleep): carve only; growing would block              │
//!   │   free(s, i):     optionally zero chunk, push back on the      │
//!   │                   slab's free list                             │
//!   └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A chunk address is `slab_base + idx * object_size`; the engine hashes
//! that address into its bufctl table and gives the `(slab, idx)` pair
//! back on free, so providers never maintain their own address index.

use std::fmt;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::types::{AllocMode, ObjRef};

/// Raw object handed out by a provider: the chunk handle plus its position
/// in the region, which the cache records in the object's bufctl.
#[derive(Debug, Clone, Copy)]
pub struct SlabObj {
    pub obj: ObjRef,
    pub slab: u32,
    pub idx: u32,
}

/// Shape of the region behind a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Normal,
    Pseudo,
}

/// Backing-store interface consumed by the cache engine.
///
/// Providers hand out raw fixed-size chunks and take them back; they do
/// not construct, audit, or cache objects — those are the engine's job.
/// A provider binds to exactly one cache at a time via
/// [`attach`](SlabProvider::attach) / [`detach`](SlabProvider::detach).
pub trait SlabProvider: Send + Sync {
    /// Size in bytes of each backing object.
    fn object_size(&self) -> usize;

    /// Size in bytes of one slab.
    fn slab_size(&self) -> usize;

    /// Number of chunks carved from each slab.
    fn slab_chunks(&self) -> usize;

    /// Region shape.
    fn kind(&self) -> RegionKind;

    /// Binds the provider to a cache. Panics if already bound; a region
    /// serves one cache.
    fn attach(&self, cache: &str);

    /// Releases the binding.
    fn detach(&self);

    /// Number of chunks currently carved out.
    fn in_use(&self) -> usize;

    /// Carves one chunk. Returns `None` on exhaustion, or under `NoSleep`
    /// when satisfying the request would block.
    fn alloc(&self, mode: AllocMode) -> Option<SlabObj>;

    /// Returns a chunk. `clear` zeroes the backing bytes first.
    fn free(&self, slab: u32, idx: u32, clear: bool);

    /// Carves up to `want` chunks into `out`; returns how many.
    fn batch_alloc(&self, want: usize, mode: AllocMode, out: &mut Vec<SlabObj>) -> usize {
        let mut got = 0;
        while got < want {
            match self.alloc(mode) {
                Some(so) => {
                    out.push(so);
                    got += 1;
                }
                None => break,
            }
        }
        got
    }

    /// Returns a batch of chunks.
    fn batch_free(&self, chunks: &[(u32, u32)], clear: bool) {
        for &(slab, idx) in chunks {
            self.free(slab, idx, clear);
        }
    }
}

// ---------------------------------------------------------------------------
// NormalRegion
// ---------------------------------------------------------------------------

struct SlabMem {
    mem: Box<[u8]>,
    free: Vec<u32>,
    used: usize,
}

struct NormalInner {
    slabs: Vec<SlabMem>,
    /// Slab ids with at least one free chunk, most recently touched last.
    free_slabs: Vec<u32>,
    in_use: usize,
}

/// Multi-chunk slab region over owned byte slabs.
///
/// # Example
///
/// ```
/// use magkit::region::{NormalRegion, SlabProvider};
/// use magkit::types::AllocMode;
///
/// let region = NormalRegion::new(128, 8);
/// let a = region.alloc(AllocMode::Sleep).unwrap();
/// let b = region.alloc(AllocMode::Sleep).unwrap();
/// assert_ne!(a.obj.addr(), b.obj.addr());
/// assert_eq!(region.in_use(), 2);
///
/// region.free(a.slab, a.idx, false);
/// region.free(b.slab, b.idx, false);
/// assert_eq!(region.in_use(), 0);
/// ```
pub struct NormalRegion {
    object_size: usize,
    slab_chunks: usize,
    max_slabs: Option<usize>,
    bound: Mutex<Option<String>>,
    inner: Mutex<NormalInner>,
}

impl NormalRegion {
    /// Creates an unbounded region carving `slab_chunks` objects of
    /// `object_size` bytes per slab. Panics on zero sizes.
    pub fn new(object_size: usize, slab_chunks: usize) -> Self {
        Self::with_limit(object_size, slab_chunks, None)
    }

    /// Creates a region capped at `max_slabs` slabs; allocation beyond the
    /// cap reports exhaustion.
    pub fn bounded(object_size: usize, slab_chunks: usize, max_slabs: usize) -> Self {
        Self::with_limit(object_size, slab_chunks, Some(max_slabs))
    }

    fn with_limit(object_size: usize, slab_chunks: usize, max_slabs: Option<usize>) -> Self {
        assert!(object_size > 0, "region object size must be nonzero");
        assert!(slab_chunks > 0, "region slab chunk count must be nonzero");
        Self {
            object_size,
            slab_chunks,
            max_slabs,
            bound: Mutex::new(None),
            inner: Mutex::new(NormalInner {
                slabs: Vec::new(),
                free_slabs: Vec::new(),
                in_use: 0,
            }),
        }
    }

    /// Number of slabs currently backing the region.
    pub fn slab_count(&self) -> usize {
        self.inner.lock().slabs.len()
    }

    fn grow(inner: &mut NormalInner, object_size: usize, slab_chunks: usize) {
        let sid = inner.slabs.len() as u32;
        let mem = vec![0u8; object_size * slab_chunks].into_boxed_slice();
        let free = (0..slab_chunks as u32).rev().collect();
        inner.slabs.push(SlabMem { mem, free, used: 0 });
        inner.free_slabs.push(sid);
    }

    fn carve(&self, inner: &mut NormalInner) -> Option<SlabObj> {
        let &sid = inner.free_slabs.last()?;
        let slab = &mut inner.slabs[sid as usize];
        let idx = slab.free.pop().expect("free_slabs entry with no free chunk");
        slab.used += 1;
        if slab.free.is_empty() {
            inner.free_slabs.pop();
        }
        inner.in_use += 1;
        let addr = inner.slabs[sid as usize].mem.as_ptr() as usize + idx as usize * self.object_size;
        Some(SlabObj {
            obj: ObjRef(addr),
            slab: sid,
            idx,
        })
    }
}

impl SlabProvider for NormalRegion {
    fn object_size(&self) -> usize {
        self.object_size
    }

    fn slab_size(&self) -> usize {
        self.object_size * self.slab_chunks
    }

    fn slab_chunks(&self) -> usize {
        self.slab_chunks
    }

    fn kind(&self) -> RegionKind {
        RegionKind::Normal
    }

    fn attach(&self, cache: &str) {
        let mut bound = self.bound.lock();
        if let Some(owner) = bound.as_ref() {
            panic!("region already bound to cache '{owner}'");
        }
        *bound = Some(cache.to_string());
    }

    fn detach(&self) {
        *self.bound.lock() = None;
    }

    fn in_use(&self) -> usize {
        self.inner.lock().in_use
    }

    fn alloc(&self, mode: AllocMode) -> Option<SlabObj> {
        let mut inner = self.inner.lock();
        if let Some(so) = self.carve(&mut inner) {
            return Some(so);
        }
        // Carving a fresh slab stands in for blocking on backing store.
        if !mode.can_block() {
            return None;
        }
        if let Some(max) = self.max_slabs {
            if inner.slabs.len() >= max {
                return None;
            }
        }
        Self::grow(&mut inner, self.object_size, self.slab_chunks);
        self.carve(&mut inner)
    }

    fn free(&self, slab: u32, idx: u32, clear: bool) {
        let mut inner = self.inner.lock();
        let object_size = self.object_size;
        let s = inner
            .slabs
            .get_mut(slab as usize)
            .unwrap_or_else(|| panic!("free of unknown slab {slab}"));
        debug_assert!(!s.free.contains(&idx), "double free of chunk {slab}/{idx}");
        if clear {
            let start = idx as usize * object_size;
            s.mem[start..start + object_size].fill(0);
        }
        if s.free.is_empty() {
            inner.free_slabs.push(slab);
        }
        let s = &mut inner.slabs[slab as usize];
        s.free.push(idx);
        s.used -= 1;
        inner.in_use -= 1;
    }
}

impl fmt::Debug for NormalRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NormalRegion")
            .field("object_size", &self.object_size)
            .field("slab_chunks", &self.slab_chunks)
            .field("slabs", &inner.slabs.len())
            .field("in_use", &inner.in_use)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PseudoRegion
// ---------------------------------------------------------------------------

struct PseudoInner {
    live: FxHashMap<u32, Box<[u8]>>,
    next_slab: u32,
}

/// Private single-object region: every "slab" holds exactly one object,
/// allocated on demand and released on free. Fresh objects are zeroed, so
/// the clear-on-free contract is met by construction.
pub struct PseudoRegion {
    object_size: usize,
    bound: Mutex<Option<String>>,
    inner: Mutex<PseudoInner>,
}

impl PseudoRegion {
    /// Creates a pseudo region for objects of `object_size` bytes.
    pub fn new(object_size: usize) -> Self {
        assert!(object_size > 0, "region object size must be nonzero");
        Self {
            object_size,
            bound: Mutex::new(None),
            inner: Mutex::new(PseudoInner {
                live: FxHashMap::default(),
                next_slab: 0,
            }),
        }
    }
}

impl SlabProvider for PseudoRegion {
    fn object_size(&self) -> usize {
        self.object_size
    }

    fn slab_size(&self) -> usize {
        self.object_size
    }

    fn slab_chunks(&self) -> usize {
        1
    }

    fn kind(&self) -> RegionKind {
        RegionKind::Pseudo
    }

    fn attach(&self, cache: &str) {
        let mut bound = self.bound.lock();
        if let Some(owner) = bound.as_ref() {
            panic!("region already bound to cache '{owner}'");
        }
        *bound = Some(cache.to_string());
    }

    fn detach(&self) {
        *self.bound.lock() = None;
    }

    fn in_use(&self) -> usize {
        self.inner.lock().live.len()
    }

    fn alloc(&self, _mode: AllocMode) -> Option<SlabObj> {
        let mut inner = self.inner.lock();
        let sid = inner.next_slab;
        inner.next_slab = inner.next_slab.wrapping_add(1);
        let mem = vec![0u8; self.object_size].into_boxed_slice();
        let addr = mem.as_ptr() as usize;
        inner.live.insert(sid, mem);
        Some(SlabObj {
            obj: ObjRef(addr),
            slab: sid,
            idx: 0,
        })
    }

    fn free(&self, slab: u32, _idx: u32, _clear: bool) {
        let mut inner = self.inner.lock();
        inner
            .live
            .remove(&slab)
            .unwrap_or_else(|| panic!("free of unknown pseudo object {slab}"));
    }
}

impl fmt::Debug for PseudoRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PseudoRegion")
            .field("object_size", &self.object_size)
            .field("in_use", &self.inner.lock().live.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
