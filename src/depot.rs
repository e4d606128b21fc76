//! Depot layer: per-cache pools of full and empty magazines.
//!
//! The depot absorbs overflow and underflow from every cpu slot behind a
//! single lock, amortizing cross-CPU traffic to whole-magazine exchanges.
//! Each list keeps working-set bookkeeping:
//!
//! ```text
//!   count ──────────────── magazines in the list right now (len)
//!   min ────────────────── low-water mark since the last tick
//!   reap_limit ─────────── previous tick's min; the reap ceiling
//! ```
//!
//! Every maintenance tick rolls `min` into `reap_limit` and resets `min`
//! to the current count; the reaper may then destroy up to
//! `min(reap_limit, min)` magazines per list. A magazine must therefore
//! sit untouched for two full ticks before it is eligible — enough
//! hysteresis to spare magazines still in rotation while bounding growth.

use crate::magazine::Magazine;

/// One depot list (full or empty) with its working-set bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct DepotList {
    mags: Vec<Magazine>,
    min: usize,
    reap_limit: usize,
    allocs: u64,
}

impl DepotList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.mags.len()
    }

    #[inline]
    pub(crate) fn min(&self) -> usize {
        self.min
    }

    #[inline]
    pub(crate) fn reap_limit(&self) -> usize {
        self.reap_limit
    }

    #[inline]
    pub(crate) fn allocs(&self) -> u64 {
        self.allocs
    }

    /// Pops a magazine, tracking the low-water mark.
    pub(crate) fn pop(&mut self) -> Option<Magazine> {
        let mag = self.mags.pop()?;
        self.min = self.min.min(self.mags.len());
        self.allocs += 1;
        Some(mag)
    }

    /// Pushes a magazine back.
    pub(crate) fn push(&mut self, mag: Magazine) {
        self.mags.push(mag);
    }

    /// Rolls the working set forward one tick.
    pub(crate) fn ws_update(&mut self) {
        self.reap_limit = self.min;
        self.min = self.mags.len();
    }

    /// Declares the whole list reapable (explicit aggressive reap).
    pub(crate) fn ws_zero(&mut self) {
        self.reap_limit = self.mags.len();
        self.min = self.mags.len();
    }

    /// Magazines currently outside the working set.
    pub(crate) fn reapable(&self) -> usize {
        self.reap_limit.min(self.min)
    }
}

/// Full + empty magazine lists, guarded by one per-cache lock.
#[derive(Debug)]
pub(crate) struct Depot {
    pub(crate) full: DepotList,
    pub(crate) empty: DepotList,
}

impl Depot {
    pub(crate) fn new() -> Self {
        Self {
            full: DepotList::new(),
            empty: DepotList::new(),
        }
    }

    pub(crate) fn ws_update(&mut self) {
        self.full.ws_update();
        self.empty.ws_update();
    }

    pub(crate) fn ws_zero(&mut self) {
        self.full.ws_zero();
        self.empty.ws_zero();
    }
}
