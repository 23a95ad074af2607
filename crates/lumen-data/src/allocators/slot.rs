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

//! Stable entity handles mapped onto a dense, gap-free offset range.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::NonZeroU32;

/// Stable external identity of a drawable entity. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(NonZeroU32);

impl EntityHandle {
    /// Wraps a raw handle value; `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// The raw 32-bit value.
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One relocation produced by compaction: the element at `from` moves to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotMove {
    /// Source offset (always the tail of the live range at the time of the move).
    pub from: u32,
    /// Destination offset, freed by a deletion.
    pub to: u32,
}

impl From<(u32, u32)> for SlotMove {
    fn from((from, to): (u32, u32)) -> Self {
        Self { from, to }
    }
}

/// Errors raised by [`SlotAllocator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// The handle is not live (never issued, freed, or pending deletion).
    #[error("entity {0} is not live")]
    UnknownEntity(EntityHandle),
    /// Every non-zero 32-bit handle is live or pending deletion.
    #[error("entity handle space is exhausted")]
    HandlesExhausted,
}

/// Bookkeeping between entity handles and dense offsets.
///
/// Deletions are deferred: [`free_entity`](Self::free_entity) only marks a
/// handle, and [`compact`](Self::compact) later fills every hole with the
/// entity currently at the tail, returning the moves every attribute buffer
/// has to replay.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    /// Live handles to their offset. Pending deletions are not in here.
    offsets: HashMap<EntityHandle, u32>,
    /// Offset to handle, pending deletions included until compaction.
    dense: Vec<EntityHandle>,
    /// Offsets freed since the last compaction.
    pending: Vec<u32>,
    /// Handles freed since the last compaction; still reserved for issuance.
    pending_handles: HashSet<EntityHandle>,
    last_issued: u32,
}

impl SlotAllocator {
    /// Creates an empty allocator. The first handle issued is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next unused handle and appends it at the end of the dense range.
    pub fn new_entity(&mut self) -> Result<EntityHandle, SlotError> {
        let handle = self.next_free_handle()?;
        let offset = self.dense.len() as u32;
        self.dense.push(handle);
        self.offsets.insert(handle, offset);
        Ok(handle)
    }

    /// Marks `handle` for removal at the next [`compact`](Self::compact).
    pub fn free_entity(&mut self, handle: EntityHandle) -> Result<(), SlotError> {
        let offset = self
            .offsets
            .remove(&handle)
            .ok_or(SlotError::UnknownEntity(handle))?;
        self.pending.push(offset);
        self.pending_handles.insert(handle);
        Ok(())
    }

    /// Current offset of a live handle.
    pub fn offset_of(&self, handle: EntityHandle) -> Result<u32, SlotError> {
        self.offsets
            .get(&handle)
            .copied()
            .ok_or(SlotError::UnknownEntity(handle))
    }

    /// Whether `handle` is live.
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.offsets.contains_key(&handle)
    }

    /// Number of live entities, not counting pending deletions.
    pub fn live_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    /// Length of the dense range, pending deletions included.
    ///
    /// Attribute buffers must hold at least this many elements until the next
    /// compaction.
    pub fn dense_len(&self) -> u32 {
        self.dense.len() as u32
    }

    /// Number of deletions waiting for compaction.
    pub fn pending_deletions(&self) -> usize {
        self.pending.len()
    }

    /// Handle stored at `offset`, if that offset is live.
    pub fn handle_at(&self, offset: u32) -> Option<EntityHandle> {
        let handle = *self.dense.get(offset as usize)?;
        self.contains(handle).then_some(handle)
    }

    /// Iterates live handles with their offsets, in offset order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, u32)> + '_ {
        self.dense
            .iter()
            .enumerate()
            .filter(|(_, handle)| self.offsets.contains_key(handle))
            .map(|(offset, handle)| (*handle, offset as u32))
    }

    /// Removes every pending deletion by swapping the tail into each hole.
    ///
    /// Holes are filled from the highest offset down, so the tail is always a
    /// live entity when it is moved. The returned moves must be replayed in
    /// order.
    pub fn compact(&mut self) -> Vec<SlotMove> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_unstable_by(|a, b| b.cmp(a));

        let mut moves = Vec::with_capacity(pending.len());
        for hole in pending {
            let Some(tail) = self.dense.pop() else {
                break;
            };
            let last = self.dense.len() as u32;
            if hole == last {
                continue;
            }
            debug_assert!(
                !self.pending_handles.contains(&tail),
                "compaction moved a pending entity"
            );
            self.dense[hole as usize] = tail;
            self.offsets.insert(tail, hole);
            moves.push(SlotMove {
                from: last,
                to: hole,
            });
        }
        self.pending_handles.clear();

        if !moves.is_empty() {
            log::debug!(
                "Compacted entity slots: {} moves, {} live",
                moves.len(),
                self.dense.len()
            );
        }
        moves
    }

    fn next_free_handle(&mut self) -> Result<EntityHandle, SlotError> {
        let reserved = self.offsets.len() + self.pending_handles.len();
        if reserved >= u32::MAX as usize {
            return Err(SlotError::HandlesExhausted);
        }
        loop {
            self.last_issued = self.last_issued.wrapping_add(1);
            let Some(handle) = EntityHandle::new(self.last_issued) else {
                continue;
            };
            if !self.offsets.contains_key(&handle) && !self.pending_handles.contains(&handle) {
                return Ok(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u32) -> EntityHandle {
        EntityHandle::new(raw).unwrap()
    }

    #[test]
    fn handles_start_at_one_and_offsets_are_dense() {
        let mut slots = SlotAllocator::new();
        for expected in 1..=4 {
            let h = slots.new_entity().unwrap();
            assert_eq!(h.get(), expected);
            assert_eq!(slots.offset_of(h).unwrap(), expected - 1);
        }
        assert_eq!(slots.live_count(), 4);
    }

    #[test]
    fn deleting_a_middle_entity_moves_the_tail() {
        let mut slots = SlotAllocator::new();
        for _ in 0..4 {
            slots.new_entity().unwrap();
        }

        slots.free_entity(handle(2)).unwrap();
        let moves = slots.compact();

        assert_eq!(moves, vec![SlotMove { from: 3, to: 1 }]);
        assert_eq!(slots.offset_of(handle(4)).unwrap(), 1);
        assert_eq!(slots.offset_of(handle(3)).unwrap(), 2);
        assert_eq!(slots.offset_of(handle(1)).unwrap(), 0);
        assert_eq!(slots.live_count(), 3);
        assert_eq!(
            slots.offset_of(handle(2)),
            Err(SlotError::UnknownEntity(handle(2)))
        );
    }

    #[test]
    fn deleting_the_tail_produces_no_move() {
        let mut slots = SlotAllocator::new();
        for _ in 0..3 {
            slots.new_entity().unwrap();
        }
        slots.free_entity(handle(3)).unwrap();
        assert!(slots.compact().is_empty());
        assert_eq!(slots.dense_len(), 2);
    }

    #[test]
    fn deleting_everything_empties_the_range() {
        let mut slots = SlotAllocator::new();
        let handles: Vec<_> = (0..5).map(|_| slots.new_entity().unwrap()).collect();
        for h in &handles {
            slots.free_entity(*h).unwrap();
        }
        assert!(slots.compact().is_empty());
        assert_eq!(slots.live_count(), 0);
        assert_eq!(slots.dense_len(), 0);
    }

    #[test]
    fn mixed_deletions_leave_no_gaps() {
        let mut slots = SlotAllocator::new();
        let handles: Vec<_> = (0..10).map(|_| slots.new_entity().unwrap()).collect();
        for raw in [1, 4, 5, 9, 10] {
            slots.free_entity(handle(raw)).unwrap();
        }
        let moves = slots.compact();

        let mut offsets: Vec<u32> = handles
            .iter()
            .filter_map(|h| slots.offset_of(*h).ok())
            .collect();
        offsets.sort_unstable();
        assert_eq!(offsets, (0..slots.live_count()).collect::<Vec<_>>());
        assert!(moves.iter().all(|m| m.from > m.to));
        for (h, offset) in slots.iter() {
            assert_eq!(slots.handle_at(offset), Some(h));
        }
    }

    #[test]
    fn replaying_moves_reproduces_the_new_layout() {
        let mut slots = SlotAllocator::new();
        let handles: Vec<_> = (0..8).map(|_| slots.new_entity().unwrap()).collect();
        let mut mirror: Vec<u32> = handles.iter().map(|h| h.get()).collect();

        for raw in [2, 3, 7] {
            slots.free_entity(handle(raw)).unwrap();
        }
        for m in slots.compact() {
            mirror[m.to as usize] = mirror[m.from as usize];
        }
        mirror.truncate(slots.live_count() as usize);

        for (h, offset) in slots.iter() {
            assert_eq!(mirror[offset as usize], h.get());
        }
    }

    #[test]
    fn double_free_and_unknown_handles_fail() {
        let mut slots = SlotAllocator::new();
        let h = slots.new_entity().unwrap();
        slots.free_entity(h).unwrap();
        assert_eq!(slots.free_entity(h), Err(SlotError::UnknownEntity(h)));
        assert_eq!(
            slots.free_entity(handle(99)),
            Err(SlotError::UnknownEntity(handle(99)))
        );
    }

    #[test]
    fn issuance_wraps_and_skips_zero_and_live_handles() {
        let mut slots = SlotAllocator::new();
        let first = slots.new_entity().unwrap();
        assert_eq!(first.get(), 1);

        slots.last_issued = u32::MAX - 1;
        assert_eq!(slots.new_entity().unwrap().get(), u32::MAX);
        // Wraps past zero and past the still-live handle 1.
        assert_eq!(slots.new_entity().unwrap().get(), 2);
    }

    #[test]
    fn pending_handles_are_not_reissued_before_compaction() {
        let mut slots = SlotAllocator::new();
        let h = slots.new_entity().unwrap();
        slots.free_entity(h).unwrap();
        slots.last_issued = 0;
        assert_ne!(slots.new_entity().unwrap(), h);
    }
}
