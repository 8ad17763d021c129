// Fixed-universe bitset over catalog module indices.
//
// A `ModuleSet` is sized once, from the catalog it belongs to, and never
// grows. Membership operations are O(1) bit twiddles on `u64` words; the
// member count is maintained incrementally so entropy-by-count is free.
// Iteration is in ascending module index, which the weighted collapse relies
// on for deterministic selection.
//
// Sets from different catalogs must not be mixed; the binary operations
// `debug_assert!` on matching capacity.

use crate::types::ModuleIndex;
use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSet {
    words: Vec<u64>,
    capacity: usize,
    len: usize,
}

impl ModuleSet {
    /// An empty set able to hold indices `0..capacity`.
    pub fn empty(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            len: 0,
        }
    }

    /// A set containing every index in `0..capacity`.
    pub fn full(capacity: usize) -> Self {
        let mut words = vec![u64::MAX; capacity.div_ceil(WORD_BITS)];
        let tail = capacity % WORD_BITS;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self {
            words,
            capacity,
            len: capacity,
        }
    }

    pub fn from_indices(capacity: usize, indices: impl IntoIterator<Item = ModuleIndex>) -> Self {
        let mut set = Self::empty(capacity);
        for index in indices {
            set.insert(index);
        }
        set
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, index: ModuleIndex) -> bool {
        let i = index.as_usize();
        i < self.capacity && self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0
    }

    /// Add `index`. Returns `true` if it was not already present.
    pub fn insert(&mut self, index: ModuleIndex) -> bool {
        let i = index.as_usize();
        debug_assert!(i < self.capacity, "module index {i} out of range");
        let word = &mut self.words[i / WORD_BITS];
        let bit = 1 << (i % WORD_BITS);
        if *word & bit != 0 {
            return false;
        }
        *word |= bit;
        self.len += 1;
        true
    }

    /// Remove `index`. Returns `true` if it was present.
    pub fn remove(&mut self, index: ModuleIndex) -> bool {
        let i = index.as_usize();
        if i >= self.capacity {
            return false;
        }
        let word = &mut self.words[i / WORD_BITS];
        let bit = 1 << (i % WORD_BITS);
        if *word & bit == 0 {
            return false;
        }
        *word &= !bit;
        self.len -= 1;
        true
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.len = 0;
    }

    /// Add every member of `other`.
    pub fn union_with(&mut self, other: &ModuleSet) {
        debug_assert_eq!(self.capacity, other.capacity);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
        self.recount();
    }

    /// Remove every member of `other`.
    pub fn subtract(&mut self, other: &ModuleSet) {
        debug_assert_eq!(self.capacity, other.capacity);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= !*b;
        }
        self.recount();
    }

    /// Remove every member not in `other`.
    pub fn intersect_with(&mut self, other: &ModuleSet) {
        debug_assert_eq!(self.capacity, other.capacity);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
        self.recount();
    }

    /// Lowest member, if any.
    pub fn first(&self) -> Option<ModuleIndex> {
        self.iter().next()
    }

    /// Members in ascending index order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    fn recount(&mut self) {
        self.len = self.words.iter().map(|w| w.count_ones() as usize).sum();
    }
}

impl<'a> IntoIterator for &'a ModuleSet {
    type Item = ModuleIndex;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator over the members of a `ModuleSet`.
pub struct Iter<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for Iter<'_> {
    type Item = ModuleIndex;

    fn next(&mut self) -> Option<ModuleIndex> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(ModuleIndex((self.word_index * WORD_BITS + bit) as u32));
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}
