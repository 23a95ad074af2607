// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A first-fit range allocator over a growable linear address space.
//!
//! The allocator never touches memory itself; it only hands out `(offset, size)`
//! ranges. When no free range fits, it asks its owner to grow the backing
//! storage through a callback, adds the new tail to the free set and retries.

use std::collections::BTreeMap;
use std::fmt;

/// Error produced by a growth callback.
pub type GrowthError = Box<dyn std::error::Error + Send + Sync>;

/// Called as `grow(old_capacity, new_capacity)` before the allocator uses the new tail.
pub type GrowthCallback = Box<dyn FnMut(u64, u64) -> Result<(), GrowthError>>;

/// Errors raised by [`RangeAllocator`].
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    /// Zero-sized ranges are not allocated.
    #[error("cannot allocate an empty range")]
    ZeroSize,
    /// `free` was given something that is not a live allocation.
    #[error("no live allocation of {size} units at offset {offset}")]
    UnknownAllocation {
        /// Offset passed to `free`.
        offset: u64,
        /// Size passed to `free`.
        size: u64,
    },
    /// The allocator needed more space and has no way to grow.
    #[error("out of space for {size} units and no growth callback is installed")]
    OutOfSpace {
        /// Requested size.
        size: u64,
    },
    /// The growth callback failed.
    #[error("growing backing storage from {old} to {new} units failed")]
    GrowthFailed {
        /// Capacity before growth.
        old: u64,
        /// Requested capacity.
        new: u64,
        /// Error returned by the callback.
        #[source]
        source: GrowthError,
    },
    /// The capacity would not fit in a `u64`.
    #[error("range allocator capacity overflow")]
    CapacityOverflow,
}

/// First-fit allocator with coalescing free ranges.
///
/// Invariants, held after every public call:
/// - free ranges never overlap each other or a live allocation;
/// - no two free ranges are adjacent;
/// - free ranges and live allocations together tile `[0, capacity)`.
pub struct RangeAllocator {
    capacity: u64,
    min_growth: u64,
    /// Free ranges keyed by offset.
    free: BTreeMap<u64, u64>,
    /// Live allocations keyed by offset.
    live: BTreeMap<u64, u64>,
    grow: Option<GrowthCallback>,
}

impl RangeAllocator {
    /// Creates an allocator over `[0, capacity)` that cannot grow.
    pub fn new(capacity: u64) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            min_growth: 0,
            free,
            live: BTreeMap::new(),
            grow: None,
        }
    }

    /// Creates a growable allocator.
    ///
    /// Growth adds `max(requested, capacity / 2, min_growth)` units.
    pub fn with_growth(
        capacity: u64,
        min_growth: u64,
        grow: impl FnMut(u64, u64) -> Result<(), GrowthError> + 'static,
    ) -> Self {
        Self {
            min_growth,
            grow: Some(Box::new(grow)),
            ..Self::new(capacity)
        }
    }

    /// Total managed units.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Units currently handed out.
    pub fn allocated_len(&self) -> u64 {
        self.live.values().sum()
    }

    /// Free ranges as `(offset, size)`, in offset order.
    pub fn free_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.free.iter().map(|(offset, size)| (*offset, *size))
    }

    /// Size of the largest free range, 0 when full.
    pub fn largest_free_range(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Allocates `size` contiguous units and returns their offset.
    pub fn allocate(&mut self, size: u64) -> Result<u64, RangeError> {
        if size == 0 {
            return Err(RangeError::ZeroSize);
        }
        if let Some(offset) = self.take_first_fit(size) {
            return Ok(offset);
        }

        self.grow_for(size)?;
        self.take_first_fit(size)
            .ok_or(RangeError::OutOfSpace { size })
    }

    /// Returns a live allocation to the free set.
    pub fn free(&mut self, offset: u64, size: u64) -> Result<(), RangeError> {
        match self.live.get(&offset) {
            Some(&live_size) if live_size == size => {
                self.live.remove(&offset);
                self.insert_free(offset, size);
                Ok(())
            }
            _ => Err(RangeError::UnknownAllocation { offset, size }),
        }
    }

    fn take_first_fit(&mut self, size: u64) -> Option<u64> {
        let (offset, available) = self
            .free
            .iter()
            .find(|(_, available)| **available >= size)
            .map(|(offset, available)| (*offset, *available))?;

        self.free.remove(&offset);
        if available > size {
            self.free.insert(offset + size, available - size);
        }
        self.live.insert(offset, size);
        Some(offset)
    }

    fn grow_for(&mut self, size: u64) -> Result<(), RangeError> {
        let Some(grow) = self.grow.as_mut() else {
            return Err(RangeError::OutOfSpace { size });
        };

        let additional = size.max(self.capacity / 2).max(self.min_growth);
        let old = self.capacity;
        let new = old
            .checked_add(additional)
            .ok_or(RangeError::CapacityOverflow)?;

        grow(old, new).map_err(|source| RangeError::GrowthFailed { old, new, source })?;
        log::debug!("Range allocator grew from {old} to {new} units");

        self.capacity = new;
        self.insert_free(old, additional);
        Ok(())
    }

    /// Inserts a free range, merging it with adjacent free neighbours.
    fn insert_free(&mut self, mut offset: u64, mut size: u64) {
        if let Some((&prev_offset, &prev_size)) = self.free.range(..offset).next_back() {
            if prev_offset + prev_size == offset {
                self.free.remove(&prev_offset);
                offset = prev_offset;
                size += prev_size;
            }
        }
        if let Some(next_size) = self.free.remove(&(offset + size)) {
            size += next_size;
        }
        self.free.insert(offset, size);
    }
}

impl fmt::Debug for RangeAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeAllocator")
            .field("capacity", &self.capacity)
            .field("min_growth", &self.min_growth)
            .field("free", &self.free)
            .field("live", &self.live.len())
            .field("growable", &self.grow.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn assert_invariants(allocator: &RangeAllocator) {
        let mut spans: Vec<(u64, u64, bool)> = allocator
            .free
            .iter()
            .map(|(o, s)| (*o, *s, true))
            .chain(allocator.live.iter().map(|(o, s)| (*o, *s, false)))
            .collect();
        spans.sort_unstable();

        let mut cursor = 0;
        let mut previous_free = false;
        for (offset, size, is_free) in spans {
            assert_eq!(offset, cursor, "gap or overlap at {offset}");
            assert!(size > 0);
            assert!(!(is_free && previous_free), "adjacent free ranges at {offset}");
            previous_free = is_free;
            cursor = offset + size;
        }
        assert_eq!(cursor, allocator.capacity);
    }

    #[test]
    fn merged_free_range_is_reused_without_growth() {
        let growths = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&growths);
        let mut allocator = RangeAllocator::with_growth(96, 0, move |old, new| {
            log.borrow_mut().push((old, new));
            Ok(())
        });

        assert_eq!(allocator.allocate(32).unwrap(), 0);
        assert_eq!(allocator.allocate(32).unwrap(), 32);
        assert_eq!(allocator.allocate(32).unwrap(), 64);
        allocator.free(0, 32).unwrap();
        allocator.free(32, 32).unwrap();
        assert_eq!(allocator.free_ranges().collect::<Vec<_>>(), vec![(0, 64)]);

        assert_eq!(allocator.allocate(64).unwrap(), 0);
        assert!(growths.borrow().is_empty());
        assert_eq!(allocator.capacity(), 96);
        assert_invariants(&allocator);
    }

    #[test]
    fn growth_extends_the_tail_and_coalesces() {
        let growths = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&growths);
        let mut allocator = RangeAllocator::with_growth(100, 16, move |old, new| {
            log.borrow_mut().push((old, new));
            Ok(())
        });

        assert_eq!(allocator.allocate(90).unwrap(), 0);
        // 10 units left at the tail; the new 50 units merge with them.
        assert_eq!(allocator.allocate(30).unwrap(), 90);
        assert_eq!(*growths.borrow(), vec![(100, 150)]);
        assert_invariants(&allocator);
    }

    #[test]
    fn growth_covers_large_requests() {
        let mut allocator = RangeAllocator::with_growth(8, 4, |_, _| Ok(()));
        assert_eq!(allocator.allocate(1000).unwrap(), 0);
        assert!(allocator.capacity() >= 1000);
        assert_invariants(&allocator);
    }

    #[test]
    fn failing_growth_is_reported() {
        let mut allocator =
            RangeAllocator::with_growth(4, 4, |_, _| Err("device lost".into()));
        assert!(matches!(
            allocator.allocate(8),
            Err(RangeError::GrowthFailed { old: 4, .. })
        ));
        assert_eq!(allocator.capacity(), 4);
        assert_invariants(&allocator);
    }

    #[test]
    fn fixed_allocator_runs_out() {
        let mut allocator = RangeAllocator::new(16);
        allocator.allocate(16).unwrap();
        assert!(matches!(
            allocator.allocate(1),
            Err(RangeError::OutOfSpace { size: 1 })
        ));
    }

    #[test]
    fn freeing_unknown_ranges_fails() {
        let mut allocator = RangeAllocator::new(64);
        let offset = allocator.allocate(16).unwrap();
        assert!(matches!(
            allocator.free(offset, 8),
            Err(RangeError::UnknownAllocation { .. })
        ));
        assert!(matches!(
            allocator.free(40, 16),
            Err(RangeError::UnknownAllocation { .. })
        ));
        allocator.free(offset, 16).unwrap();
        assert!(allocator.free(offset, 16).is_err());
        assert!(matches!(allocator.allocate(0), Err(RangeError::ZeroSize)));
    }

    #[test]
    fn invariants_hold_over_mixed_sequences() {
        let mut allocator = RangeAllocator::with_growth(64, 32, |_, _| Ok(()));
        let mut live = Vec::new();

        // Deterministic pseudo-random walk.
        let mut state = 0x2545_f491_u32;
        for step in 0..400 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if live.is_empty() || state % 3 != 0 {
                let size = u64::from(state % 24 + 1);
                let offset = allocator.allocate(size).unwrap();
                live.push((offset, size));
            } else {
                let index = (state as usize / 3) % live.len();
                let (offset, size) = live.swap_remove(index);
                allocator.free(offset, size).unwrap();
            }
            assert_invariants(&allocator);
            if step % 50 == 0 {
                assert_eq!(
                    allocator.allocated_len(),
                    live.iter().map(|(_, s)| s).sum::<u64>()
                );
            }
        }

        for (offset, size) in live.drain(..) {
            allocator.free(offset, size).unwrap();
        }
        assert_eq!(
            allocator.free_ranges().collect::<Vec<_>>(),
            vec![(0, allocator.capacity())]
        );
        assert_eq!(allocator.largest_free_range(), allocator.capacity());
    }
}
