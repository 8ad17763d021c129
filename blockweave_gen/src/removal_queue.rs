// Deferred candidate removals, flushed iteratively.
//
// When propagation makes a module impossible at some neighbor, the removal is
// queued here instead of applied recursively. The map drains the queue front
// to back; applying one entry may queue more. Repeated requests for a position
// that is still waiting merge into its pending set, so each position is
// processed once per wave no matter how many neighbors touched it.

use crate::module_set::ModuleSet;
use crate::types::{Coord, ModuleIndex};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct RemovalQueue {
    order: VecDeque<Coord>,
    pending: FxHashMap<Coord, ModuleSet>,
}

impl RemovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `module` for removal at `position`. `capacity` sizes the pending
    /// set the first time the position is seen.
    pub fn push(&mut self, position: Coord, module: ModuleIndex, capacity: usize) {
        let set = self.pending.entry(position).or_insert_with(|| {
            self.order.push_back(position);
            ModuleSet::empty(capacity)
        });
        set.insert(module);
    }

    /// Take the oldest queued position and everything pending for it.
    pub fn pop_front(&mut self) -> Option<(Coord, ModuleSet)> {
        let position = self.order.pop_front()?;
        let set = self.pending.remove(&position)?;
        Some((position, set))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }
}
