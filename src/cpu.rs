//! Per-CPU cache records: the loaded/previous magazine pair behind each
//! cpu slot's lock.
//!
//! The loaded magazine is consumed top-down, so the most recently freed
//! object is the next one allocated from the same slot — objects come
//! back cache-warm. `magsize == 0` disables the slot, sending traffic
//! straight to the slab layer; the resize controller uses this to park a
//! slot while magazines are being purged or retyped.

use parking_lot::{Mutex, MutexGuard};

use crate::magazine::Magazine;

/// State behind one cpu slot's lock.
#[derive(Debug, Default)]
pub(crate) struct CpuSlot {
    pub(crate) loaded: Option<Magazine>,
    pub(crate) previous: Option<Magazine>,
    /// Rounds per magazine for this slot; 0 disables the fast path.
    pub(crate) magsize: usize,
    pub(crate) allocs: u64,
    pub(crate) frees: u64,
}

impl CpuSlot {
    /// Rounds in the loaded magazine.
    #[inline]
    pub(crate) fn rounds(&self) -> usize {
        self.loaded.as_ref().map_or(0, Magazine::len)
    }

    /// Rounds in the previous magazine.
    #[inline]
    pub(crate) fn prev_rounds(&self) -> usize {
        self.previous.as_ref().map_or(0, Magazine::len)
    }

    /// Swaps the loaded and previous magazines.
    #[inline]
    pub(crate) fn reload(&mut self) {
        std::mem::swap(&mut self.loaded, &mut self.previous);
    }
}

/// One cpu slot, padded to a cache line so neighboring slots never share
/// one.
#[repr(align(64))]
#[derive(Debug, Default)]
pub(crate) struct CpuCache {
    slot: Mutex<CpuSlot>,
}

impl CpuCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, CpuSlot> {
        self.slot.lock()
    }
}
