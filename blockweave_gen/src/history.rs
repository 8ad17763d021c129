// Bounded undo log for the collapse loop.
//
// Every collapse pushes a `HistoryItem` recording the collapsed slot and, for
// each slot that lost candidates as a side effect, exactly which modules were
// removed. Undo pops items and restores those sets.
//
// The log is a fixed-capacity ring: pushing onto a full buffer evicts the
// oldest item and hands it back, and the map then "forgets" that item's slot
// (see `Slot::forget`). Collapses older than the window are permanent.

use crate::module_set::ModuleSet;
use crate::types::Coord;
use std::collections::{BTreeMap, VecDeque};

/// One undo record.
#[derive(Clone, Debug)]
pub struct HistoryItem {
    /// The slot that was collapsed.
    pub slot: Coord,
    /// Modules removed from each slot while this item was on top.
    pub removed: BTreeMap<Coord, ModuleSet>,
    /// Set once the collapse's propagation finished without contradiction.
    /// Undoing an uncommitted item restores candidates but emits no event.
    pub(crate) committed: bool,
}

impl HistoryItem {
    pub fn new(slot: Coord) -> Self {
        Self {
            slot,
            removed: BTreeMap::new(),
            committed: false,
        }
    }

    /// Record that `modules` left the candidate set at `position`.
    pub fn record_removal(&mut self, position: Coord, modules: &ModuleSet) {
        match self.removed.get_mut(&position) {
            Some(set) => set.union_with(modules),
            None => {
                self.removed.insert(position, modules.clone());
            }
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

/// Fixed-capacity FIFO that evicts its oldest element when full.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A buffer holding at most `capacity` items. A zero capacity is raised
    /// to one so a push always has somewhere to land.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push `item` as the newest entry, returning the evicted oldest entry if
    /// the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove and return the newest entry.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.items.back_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
