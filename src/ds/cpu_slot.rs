//! Deterministic thread-to-cpu-slot mapping.
//!
//! The engine has no view of real CPU ids, so the per-CPU layer is indexed
//! by a stable hash of the calling thread's id: the same thread always
//! lands on the same slot, and threads spread roughly uniformly across
//! slots. Each cache seeds its selector with its cache id so two caches do
//! not share pathological thread clustering.

use std::hash::{Hash, Hasher};
use std::thread::{self, ThreadId};

use rustc_hash::FxHasher;

/// Maps threads to cpu-slot indices in `[0, slots)`.
#[derive(Debug, PartialEq, Eq)]
pub struct CpuSelector {
    slots: usize,
    seed: u64,
}

impl CpuSelector {
    /// Creates a selector for `slots` slots with the given `seed`.
    ///
    /// The slot count is clamped to at least 1.
    pub fn new(slots: usize, seed: u64) -> Self {
        Self {
            slots: slots.max(1),
            seed,
        }
    }

    /// Returns the number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Returns the slot index for the calling thread.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.slot_for(thread::current().id())
    }

    /// Returns the slot index for an arbitrary thread id.
    pub fn slot_for(&self, tid: ThreadId) -> usize {
        let mut hasher = FxHasher::default();
        self.seed.hash(&mut hasher);
        tid.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_deterministic_per_thread() {
        let sel = CpuSelector::new(8, 42);
        let a = sel.current_slot();
        let b = sel.current_slot();
        assert_eq!(a, b);
        assert!(a < sel.slot_count());
    }

    #[test]
    fn zero_slots_clamped_to_one() {
        let sel = CpuSelector::new(0, 0);
        assert_eq!(sel.slot_count(), 1);
        assert_eq!(sel.current_slot(), 0);
    }

    #[test]
    fn other_threads_get_valid_slots() {
        let sel = std::sync::Arc::new(CpuSelector::new(4, 7));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sel = sel.clone();
                std::thread::spawn(move || {
                    let s = sel.current_slot();
                    assert!(s < 4);
                    s
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
