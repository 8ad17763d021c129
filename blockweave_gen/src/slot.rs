// One cell of the collapse grid.
//
// A slot owns its candidate `ModuleSet` and a per-direction "module health"
// table: `health[d][m]` is how many candidates of the neighbor in direction
// `d` still accept `m` next to them. Propagation decrements these counts as
// neighbors lose candidates; a count reaching zero means `m` has become
// impossible here. Keeping the counts makes each removal O(neighbors of the
// removed module) instead of re-checking whole neighbor domains.
//
// The slot also caches the weight sum and Σ p·ln(p) of its candidates so the
// Shannon entropy is available without walking the set.
//
// Slots hold no reference to their map. All operations that touch neighbors
// (removal, restore, collapse) live on `CollapseMap` in `map.rs`; this file
// only manages the slot's own state.
//
// Lifecycle: created on first access from either the full catalog or a
// template slot (see `boundary.rs`), narrowed by propagation, collapsed, and
// eventually "forgotten" once its collapse falls out of the undo window, which
// releases the candidate set and health table.

use crate::catalog::ModuleCatalog;
use crate::module_set::ModuleSet;
use crate::types::{Coord, Direction, ModuleIndex};
use serde::{Deserialize, Serialize};

/// How the collapse loop ranks uncollapsed slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyMetric {
    /// Number of remaining candidates.
    #[default]
    CandidateCount,
    /// Shannon entropy of the candidates' selection weights.
    Shannon,
}

/// Live candidate state. Absent once the slot has been forgotten.
#[derive(Clone, Debug)]
pub(crate) struct SlotDomain {
    pub(crate) candidates: ModuleSet,
    /// Flattened `[direction][module]`.
    pub(crate) health: Box<[u16]>,
    weight_sum: f64,
    plogp_sum: f64,
}

impl SlotDomain {
    fn full(catalog: &ModuleCatalog) -> Self {
        Self {
            candidates: catalog.full_set(),
            health: catalog.initial_health().into(),
            weight_sum: catalog.modules().iter().map(|m| m.probability).sum(),
            plogp_sum: catalog.modules().iter().map(|m| m.plogp).sum(),
        }
    }

    pub(crate) fn health_index(&self, direction: Direction, module: ModuleIndex) -> usize {
        direction.index() * self.candidates.capacity() + module.as_usize()
    }

    /// Add a candidate and its weight. Returns `false` if already present.
    pub(crate) fn insert(&mut self, catalog: &ModuleCatalog, module: ModuleIndex) -> bool {
        if !self.candidates.insert(module) {
            return false;
        }
        let m = catalog.module(module);
        self.weight_sum += m.probability;
        self.plogp_sum += m.plogp;
        true
    }

    /// Remove every member of `modules` (which must all be candidates).
    pub(crate) fn remove_all(&mut self, catalog: &ModuleCatalog, modules: &ModuleSet) {
        for module in modules {
            let m = catalog.module(module);
            self.weight_sum -= m.probability;
            self.plogp_sum -= m.plogp;
        }
        self.candidates.subtract(modules);
        if self.candidates.is_empty() {
            self.weight_sum = 0.0;
            self.plogp_sum = 0.0;
        }
    }
}

/// A grid cell: candidates, health, and collapse state.
#[derive(Clone, Debug)]
pub struct Slot {
    position: Coord,
    pub(crate) domain: Option<SlotDomain>,
    pub(crate) module: Option<ModuleIndex>,
    /// Opaque handle the consumer may attach to whatever it spawned for this
    /// slot. The generator never reads it.
    pub spawn_handle: Option<u64>,
}

impl Slot {
    /// A slot with every catalog module as a candidate.
    pub fn new(position: Coord, catalog: &ModuleCatalog) -> Self {
        Self {
            position,
            domain: Some(SlotDomain::full(catalog)),
            module: None,
            spawn_handle: None,
        }
    }

    /// A slot at `position` with the candidates and health of `template`.
    pub fn from_template(position: Coord, template: &Slot) -> Self {
        Self {
            position,
            domain: template.domain.clone(),
            module: None,
            spawn_handle: None,
        }
    }

    pub fn position(&self) -> Coord {
        self.position
    }

    /// The chosen module, once collapsed.
    pub fn module(&self) -> Option<ModuleIndex> {
        self.module
    }

    pub fn is_collapsed(&self) -> bool {
        self.module.is_some()
    }

    /// A forgotten slot has released its candidate set and health table. It is
    /// always collapsed and can no longer be undone.
    pub fn is_forgotten(&self) -> bool {
        self.domain.is_none()
    }

    /// Remaining candidates, or `None` once forgotten.
    pub fn candidates(&self) -> Option<&ModuleSet> {
        self.domain.as_ref().map(|d| &d.candidates)
    }

    pub fn candidate_count(&self) -> usize {
        match (&self.domain, self.module) {
            (Some(domain), _) => domain.candidates.len(),
            (None, Some(_)) => 1,
            (None, None) => 0,
        }
    }

    pub fn contains(&self, module: ModuleIndex) -> bool {
        match &self.domain {
            Some(domain) => domain.candidates.contains(module),
            None => self.module == Some(module),
        }
    }

    /// Health of `module` as seen from the neighbor in `direction`.
    pub fn health(&self, direction: Direction, module: ModuleIndex) -> Option<u16> {
        let domain = self.domain.as_ref()?;
        domain.health.get(domain.health_index(direction, module)).copied()
    }

    /// Entropy under `metric`. Lower means more constrained.
    pub fn entropy(&self, metric: EntropyMetric) -> f64 {
        let Some(domain) = &self.domain else {
            return 0.0;
        };
        match metric {
            EntropyMetric::CandidateCount => domain.candidates.len() as f64,
            EntropyMetric::Shannon => {
                if domain.candidates.len() <= 1 || domain.weight_sum <= 0.0 {
                    return 0.0;
                }
                domain.weight_sum.ln() - domain.plogp_sum / domain.weight_sum
            }
        }
    }

    /// Total selection weight of the remaining candidates.
    pub fn weight_sum(&self) -> f64 {
        self.domain.as_ref().map_or(0.0, |d| d.weight_sum)
    }

    pub(crate) fn forget(&mut self) {
        debug_assert!(self.is_collapsed(), "only collapsed slots are forgotten");
        self.domain = None;
    }
}
