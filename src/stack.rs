//! # Stack Pool
//!
//! Task stacks are carved out of one statically sized word array with a
//! first-fit search over the gaps between live regions. A region belongs to
//! exactly one task from creation until deletion; the pool never hands out
//! overlapping regions.
//!
//! Regions are kept sorted by offset so the gap scan is a single pass and a
//! freed region merges with its neighbours implicitly.

use heapless::Vec;

use crate::config::{MAX_TASKS, STACK_POOL_WORDS};

/// A stack region inside the pool, in 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    offset: usize,
    words: usize,
}

impl StackRegion {
    #[inline]
    pub const fn words(&self) -> usize {
        self.words
    }

    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

/// Backing store, aligned to 8 bytes as required by the ARM AAPCS.
#[repr(align(8))]
struct PoolMemory([u32; STACK_POOL_WORDS]);

/// First-fit allocator for task stacks.
pub struct StackPool {
    memory: PoolMemory,
    /// Live regions, sorted by offset.
    regions: Vec<StackRegion, MAX_TASKS>,
}

impl StackPool {
    pub const fn new() -> Self {
        Self {
            memory: PoolMemory([0; STACK_POOL_WORDS]),
            regions: Vec::new(),
        }
    }

    /// Reserve `words` words (rounded up to an even count so every region
    /// keeps 8-byte alignment). Returns `None` if no gap is large enough.
    pub fn allocate(&mut self, words: usize) -> Option<StackRegion> {
        if words == 0 || self.regions.is_full() {
            return None;
        }
        let words = words.checked_add(1)? & !1;

        let mut cursor = 0;
        let mut insert_at = self.regions.len();
        for (i, region) in self.regions.iter().enumerate() {
            if region.offset - cursor >= words {
                insert_at = i;
                break;
            }
            cursor = region.offset + region.words;
        }
        if insert_at == self.regions.len() && STACK_POOL_WORDS - cursor < words {
            return None;
        }

        let region = StackRegion {
            offset: cursor,
            words,
        };
        self.regions.insert(insert_at, region).ok()?;
        Some(region)
    }

    /// Return a region to the pool. Returns `false` if the region is not
    /// currently allocated (double free or foreign region).
    pub fn free(&mut self, region: StackRegion) -> bool {
        match self.regions.iter().position(|r| *r == region) {
            Some(i) => {
                self.regions.remove(i);
                true
            }
            None => false,
        }
    }

    /// Release every region.
    pub fn reset(&mut self) {
        self.regions.clear();
    }

    /// Words currently handed out.
    pub fn used_words(&self) -> usize {
        self.regions.iter().map(|r| r.words).sum()
    }

    /// Memory of an allocated region.
    pub fn slice_mut(&mut self, region: StackRegion) -> &mut [u32] {
        &mut self.memory.0[region.offset..region.offset + region.words]
    }
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}
