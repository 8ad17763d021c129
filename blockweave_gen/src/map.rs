// The collapse engine: slot storage, constraint propagation, undo, and the
// backtracking collapse loop.
//
// A `CollapseMap` owns every slot of one world, the bounded undo history, the
// deferred removal queue, and the session's single `WorldRng`. Two shapes are
// supported (see `MapShape`): an unbounded map whose slots are created on
// first touch, seeded from a boundary-constrained template column, and a
// tiling map whose slots all exist up front and which wraps around in X and Z.
//
// Propagation: removing module `r` from slot `X` walks each direction `d`,
// creating the neighbor `N` if needed, and decrements `N.health[-d][p]` for
// every `p` that `r` accepted in direction `d`. A count that drops from 1 to 0
// for a module `N` still holds queues that module for removal at `N`. The
// queue is then drained front to back, so propagation depth never touches the
// call stack. A slot whose candidates run out yields `CollapseFailed`, which
// the collapse loop answers by backtracking.
//
// Removals made while a collapse propagates are recorded in that collapse's
// history item, so `undo` can restore candidates and health exactly. Removals
// made by constraints (walkways, boundary layers) are never recorded: they
// are permanent, and a walkway additionally bans its blocked modules at the
// slot so no undo can bring them back. Restored candidates that lost all
// support to a permanent removal are dropped again after each undo step. When
// the history ring overflows, the evicted item's slot is forgotten and its
// collapse becomes permanent.
//
// The collapse loop can run to completion (`collapse`) or cooperatively in
// batches (`begin_collapse` + `collapse_step`) so a driver can interleave
// generation with other work. Cancellation is honored between attempts, when
// every history item is either committed or already undone.
//
// See also: `boundary.rs` for template-column constraints, `world.rs` which
// feeds `MapEvent`s into the room graph, `worker.rs` for the chunked
// background driver.

use crate::catalog::ModuleCatalog;
use crate::config::{BacktrackPolicy, GenerationConfig, MapShape};
use crate::error::{CollapseFailed, GenerationError, Result};
use crate::history::{HistoryItem, RingBuffer};
use crate::module_set::ModuleSet;
use crate::prng::WorldRng;
use crate::removal_queue::RemovalQueue;
use crate::slot::{EntropyMetric, Slot};
use crate::types::{Coord, Direction, ModuleIndex};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Notification for consumers that instantiate or destroy content per slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapEvent {
    SlotCollapsed(Coord),
    SlotCollapseUndone(Coord),
}

/// Snapshot passed to a progress callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// Uncollapsed slots left in the work area.
    pub remaining: usize,
    /// Size of the work area when the collapse began.
    pub total: usize,
    pub collapsed: usize,
    pub backtracks: usize,
}

impl Progress {
    /// Fraction of the initial work area that is done, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        1.0 - (self.remaining.min(self.total) as f64 / self.total as f64)
    }
}

/// Per-call knobs for the collapse loop.
#[derive(Default)]
pub struct CollapseOptions<'a> {
    /// Checked before every attempt. Setting it ends the collapse with
    /// `GenerationError::Cancelled`.
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<&'a mut dyn FnMut(Progress)>,
    /// Overrides the configured progress interval.
    pub progress_interval: Option<usize>,
}

impl CollapseOptions<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Outcome of a finished collapse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollapseReport {
    /// Collapses committed during the call, including re-collapses after
    /// backtracking.
    pub collapsed: usize,
    pub backtracks: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollapseStatus {
    InProgress { remaining: usize },
    Complete(CollapseReport),
}

/// State of a collapse between `begin_collapse` and completion.
#[derive(Debug)]
struct ActiveCollapse {
    work_area: BTreeSet<Coord>,
    total: usize,
    report: CollapseReport,
}

pub struct CollapseMap {
    catalog: Arc<ModuleCatalog>,
    shape: MapShape,
    slots: FxHashMap<Coord, Slot>,
    /// Seed slots for new columns of an unbounded map, indexed by Y.
    pub(crate) template: Option<Vec<Slot>>,
    history: RingBuffer<HistoryItem>,
    /// Set while a collapse propagates; only then are removals recorded.
    recording: bool,
    /// Modules excluded for good at a position by walkway constraints.
    banned: FxHashMap<Coord, ModuleSet>,
    queue: RemovalQueue,
    rng: WorldRng,
    policy: BacktrackPolicy,
    entropy_metric: EntropyMetric,
    progress_interval: usize,
    active: Option<ActiveCollapse>,
    events: VecDeque<MapEvent>,
    total_collapsed: usize,
    backtrack_barrier: usize,
    backtrack_amount: u32,
    full_unwinds: u32,
}

impl CollapseMap {
    /// Build a map from a validated config, applying its boundary
    /// constraints.
    pub fn new(catalog: Arc<ModuleCatalog>, config: &GenerationConfig) -> Result<Self> {
        config.validate()?;
        let mut map = Self::with_shape(catalog, config, config.shape.clone());
        if !config.boundary_constraints.is_empty() {
            map.apply_boundary_constraints(&config.boundary_constraints)?;
        }
        Ok(map)
    }

    /// Build without validation or constraints. Tiling maps materialize
    /// every slot here.
    pub(crate) fn with_shape(
        catalog: Arc<ModuleCatalog>,
        config: &GenerationConfig,
        shape: MapShape,
    ) -> Self {
        let mut slots = FxHashMap::default();
        if let MapShape::Tiling {
            size_x,
            height,
            size_z,
        } = shape
        {
            for x in 0..size_x {
                for y in 0..height {
                    for z in 0..size_z {
                        let pos = Coord::new(x, y, z);
                        slots.insert(pos, Slot::new(pos, &catalog));
                    }
                }
            }
        }
        Self {
            catalog,
            shape,
            slots,
            template: None,
            history: RingBuffer::new(config.history_size),
            recording: false,
            banned: FxHashMap::default(),
            queue: RemovalQueue::new(),
            rng: WorldRng::new(config.seed),
            policy: config.backtrack.clone(),
            entropy_metric: config.entropy_metric,
            progress_interval: config.progress_interval.max(1),
            active: None,
            events: VecDeque::new(),
            total_collapsed: 0,
            backtrack_barrier: 0,
            backtrack_amount: config.backtrack.initial,
            full_unwinds: 0,
        }
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    pub fn shape(&self) -> &MapShape {
        &self.shape
    }

    pub fn height(&self) -> i32 {
        self.shape.height()
    }

    // -----------------------------------------------------------------------
    // Slot access
    // -----------------------------------------------------------------------

    /// The storage position for `pos`: wrapped in X and Z on a tiling map,
    /// `None` outside the vertical bounds or at the edge of the coordinate
    /// range.
    pub fn canonicalize(&self, pos: Coord) -> Option<Coord> {
        if pos.y < 0 || pos.y >= self.shape.height() {
            return None;
        }
        match self.shape {
            // A slot at the i32 limits would have unrepresentable neighbors.
            MapShape::Unbounded { .. } => {
                let inner = i32::MIN + 1..i32::MAX;
                (inner.contains(&pos.x) && inner.contains(&pos.z)).then_some(pos)
            }
            MapShape::Tiling { size_x, size_z, .. } => Some(Coord::new(
                pos.x.rem_euclid(size_x),
                pos.y,
                pos.z.rem_euclid(size_z),
            )),
        }
    }

    pub fn get_slot(&self, pos: Coord) -> Option<&Slot> {
        self.slots.get(&self.canonicalize(pos)?)
    }

    pub fn slot_mut(&mut self, pos: Coord) -> Option<&mut Slot> {
        let pos = self.canonicalize(pos)?;
        self.slots.get_mut(&pos)
    }

    /// The slot at `pos`, created if it lies in the map's domain. Returns
    /// `None` outside the height bounds or beyond the range limit.
    pub fn get_or_create_slot(&mut self, pos: Coord) -> Option<&Slot> {
        let pos = self.ensure_slot(pos)?;
        self.slots.get(&pos)
    }

    /// Materialize the slot at `pos` if needed and return its canonical
    /// position.
    pub(crate) fn ensure_slot(&mut self, pos: Coord) -> Option<Coord> {
        let pos = self.canonicalize(pos)?;
        if self.slots.contains_key(&pos) {
            return Some(pos);
        }
        let MapShape::Unbounded {
            range_limit,
            range_center,
            ..
        } = self.shape
        else {
            return None;
        };
        if range_limit.is_some_and(|limit| pos.distance(range_center) > limit) {
            return None;
        }
        let template = self
            .template
            .as_ref()
            .and_then(|column| column.get(pos.y as usize));
        let slot = match template {
            Some(template) => Slot::from_template(pos, template),
            None => Slot::new(pos, &self.catalog),
        };
        self.slots.insert(pos, slot);
        Some(pos)
    }

    /// The collapsed module at `pos`, if any.
    pub fn module_at(&self, pos: Coord) -> Option<ModuleIndex> {
        self.get_slot(pos)?.module()
    }

    /// Every materialized slot, in no particular order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    /// Every collapsed slot's module, in position order.
    pub fn collapsed_modules(&self) -> BTreeMap<Coord, ModuleIndex> {
        self.slots
            .values()
            .filter_map(|slot| Some((slot.position(), slot.module()?)))
            .collect()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently collapsed by this map (undone collapses excluded).
    pub fn total_collapsed(&self) -> usize {
        self.total_collapsed
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_collapsing(&self) -> bool {
        self.active.is_some()
    }

    /// Take all queued collapse/undo notifications, oldest first.
    pub fn drain_events(&mut self) -> Vec<MapEvent> {
        self.events.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------------

    /// Remove `modules` from the candidates at `pos` and update the health of
    /// every neighbor, queueing modules that lose their last supporter.
    /// Modules that are not candidates are ignored.
    pub(crate) fn remove_modules(
        &mut self,
        pos: Coord,
        modules: &ModuleSet,
    ) -> std::result::Result<(), CollapseFailed> {
        let catalog = Arc::clone(&self.catalog);
        let Some(domain) = self.slots.get(&pos).and_then(|s| s.domain.as_ref()) else {
            return Ok(());
        };
        let mut removed = modules.clone();
        removed.intersect_with(&domain.candidates);
        if removed.is_empty() {
            return Ok(());
        }
        if self.recording {
            if let Some(item) = self.history.peek_mut() {
                item.record_removal(pos, &removed);
            }
        }

        for d in Direction::ALL {
            let Some(npos) = pos.checked_offset(d).and_then(|n| self.ensure_slot(n)) else {
                continue;
            };
            let Some(neighbor) = self.slots.get_mut(&npos).and_then(|s| s.domain.as_mut())
            else {
                continue;
            };
            let back = d.opposite();
            for module in &removed {
                for &supported in catalog.module(module).neighbor_list(d) {
                    let index = neighbor.health_index(back, supported);
                    let still_candidate = neighbor.candidates.contains(supported);
                    let health = &mut neighbor.health[index];
                    if *health == 1 && still_candidate {
                        self.queue.push(npos, supported, catalog.len());
                    }
                    debug_assert!(*health > 0, "health underflow at {npos} {back}");
                    *health = health.saturating_sub(1);
                }
            }
        }

        let Some(domain) = self.slots.get_mut(&pos).and_then(|s| s.domain.as_mut()) else {
            return Ok(());
        };
        domain.remove_all(&catalog, &removed);
        if domain.candidates.is_empty() {
            return Err(CollapseFailed { slot: pos });
        }
        Ok(())
    }

    /// Drain the removal queue. Collapsed slots are skipped: their remaining
    /// candidate is already supported by every live neighbor.
    pub(crate) fn finish_removal_queue(&mut self) -> std::result::Result<(), CollapseFailed> {
        while let Some((pos, modules)) = self.queue.pop_front() {
            if self.slots.get(&pos).is_none_or(|s| s.is_collapsed()) {
                continue;
            }
            self.remove_modules(pos, &modules)?;
        }
        Ok(())
    }

    /// Remove and fully propagate. On contradiction the queue is cleared and
    /// the map is left as far as propagation got.
    pub(crate) fn remove_and_propagate(
        &mut self,
        pos: Coord,
        modules: &ModuleSet,
    ) -> std::result::Result<(), CollapseFailed> {
        let outcome = self
            .remove_modules(pos, modules)
            .and_then(|()| self.finish_removal_queue());
        if outcome.is_err() {
            self.queue.clear();
        }
        outcome
    }

    /// Inverse of `remove_modules` for undo: re-add `modules` at `pos` and
    /// give their support back to every live neighbor.
    fn restore_modules(&mut self, pos: Coord, modules: &ModuleSet) {
        let catalog = Arc::clone(&self.catalog);
        for module in modules {
            if self.banned.get(&pos).is_some_and(|b| b.contains(module)) {
                continue;
            }
            let already = self
                .slots
                .get(&pos)
                .and_then(|s| s.candidates())
                .is_none_or(|c| c.contains(module));
            if already {
                continue;
            }
            for d in Direction::ALL {
                let Some(npos) = pos.checked_offset(d).and_then(|n| self.canonicalize(n)) else {
                    continue;
                };
                let Some(neighbor) = self.slots.get_mut(&npos).and_then(|s| s.domain.as_mut())
                else {
                    continue;
                };
                let back = d.opposite();
                for &supported in catalog.module(module).neighbor_list(d) {
                    let index = neighbor.health_index(back, supported);
                    neighbor.health[index] = neighbor.health[index].saturating_add(1);
                }
            }
            if let Some(domain) = self.slots.get_mut(&pos).and_then(|s| s.domain.as_mut()) {
                domain.insert(&catalog, module);
            }
        }
    }

    /// Remove restored candidates left without support in some direction.
    /// Only a permanent removal made while their history item was on the
    /// stack can cause this, so the removal is not recorded either.
    fn drop_unsupported(&mut self, restored: &BTreeMap<Coord, ModuleSet>) {
        let len = self.catalog.len();
        for (&pos, modules) in restored {
            let Some(slot) = self.slots.get(&pos) else {
                continue;
            };
            if slot.is_collapsed() {
                continue;
            }
            let Some(domain) = slot.domain.as_ref() else {
                continue;
            };
            for module in modules {
                let unsupported = domain.candidates.contains(module)
                    && Direction::ALL
                        .iter()
                        .any(|&d| domain.health[domain.health_index(d, module)] == 0);
                if unsupported {
                    self.queue.push(pos, module, len);
                }
            }
        }
        if let Err(failed) = self.finish_removal_queue() {
            self.queue.clear();
            debug!(slot = %failed.slot, "undo left a slot without candidates");
        }
    }

    // -----------------------------------------------------------------------
    // Collapse and undo
    // -----------------------------------------------------------------------

    /// Collapse `pos` to `module` and propagate. On failure the pushed history
    /// item stays on top, uncommitted, for the caller to undo.
    fn collapse_slot(
        &mut self,
        pos: Coord,
        module: ModuleIndex,
    ) -> std::result::Result<(), CollapseFailed> {
        if let Some(evicted) = self.history.push(HistoryItem::new(pos)) {
            if let Some(slot) = self.slots.get_mut(&evicted.slot) {
                if slot.is_collapsed() {
                    slot.forget();
                }
            }
        }
        let Some(slot) = self.slots.get_mut(&pos) else {
            return Err(CollapseFailed { slot: pos });
        };
        slot.module = Some(module);
        let mut others = slot
            .candidates()
            .cloned()
            .unwrap_or_else(|| self.catalog.empty_set());
        others.remove(module);
        self.recording = true;
        let outcome = self.remove_and_propagate(pos, &others);
        self.recording = false;
        outcome?;

        if let Some(item) = self.history.peek_mut() {
            item.committed = true;
        }
        self.total_collapsed += 1;
        if let Some(active) = &mut self.active {
            active.work_area.remove(&pos);
            active.report.collapsed += 1;
        }
        self.events.push_back(MapEvent::SlotCollapsed(pos));
        Ok(())
    }

    /// Weighted random choice among the candidates at `pos`.
    fn collapse_random(&mut self, pos: Coord) -> std::result::Result<(), CollapseFailed> {
        let candidates: Vec<ModuleIndex> = self
            .slots
            .get(&pos)
            .and_then(|s| s.candidates())
            .map(|c| c.iter().collect())
            .unwrap_or_default();
        let weights: Vec<f64> = candidates
            .iter()
            .map(|&m| self.catalog.module(m).probability)
            .collect();
        let Some(choice) = self.rng.pick_weighted(&weights) else {
            return Err(CollapseFailed { slot: pos });
        };
        self.collapse_slot(pos, candidates[choice])
    }

    /// Collapse `pos` to a specific candidate, outside of or during a
    /// collapse loop. A contradiction is undone before returning.
    pub fn collapse_slot_to(&mut self, pos: Coord, module: ModuleIndex) -> Result<()> {
        let invalid = |msg: String| {
            warn!("collapse_slot_to: {msg}");
            Err(GenerationError::InvalidOperation(msg))
        };
        let Some(pos) = self.ensure_slot(pos) else {
            return invalid(format!("no slot at {pos}"));
        };
        let Some(slot) = self.slots.get(&pos) else {
            return invalid(format!("no slot at {pos}"));
        };
        if slot.is_collapsed() {
            return invalid(format!("slot {pos} is already collapsed"));
        }
        if !slot.contains(module) {
            return invalid(format!("module {} is not a candidate at {pos}", module.0));
        }
        if let Err(failed) = self.collapse_slot(pos, module) {
            self.undo(1);
            return Err(GenerationError::Contradiction { slot: failed.slot });
        }
        Ok(())
    }

    /// Pop up to `steps` history items, restoring the candidates they removed
    /// and un-collapsing their slots. Returns how many were undone.
    pub fn undo(&mut self, steps: usize) -> usize {
        let mut undone = 0;
        while undone < steps {
            let Some(item) = self.history.pop() else {
                break;
            };
            for (pos, modules) in &item.removed {
                self.restore_modules(*pos, modules);
            }
            self.drop_unsupported(&item.removed);
            if let Some(slot) = self.slots.get_mut(&item.slot) {
                slot.module = None;
            }
            if item.committed {
                self.total_collapsed = self.total_collapsed.saturating_sub(1);
                self.events.push_back(MapEvent::SlotCollapseUndone(item.slot));
            }
            if let Some(active) = &mut self.active {
                active.work_area.insert(item.slot);
            }
            undone += 1;
        }
        undone
    }

    // -----------------------------------------------------------------------
    // Collapse loop
    // -----------------------------------------------------------------------

    /// Start a cooperative collapse of `targets`. Positions outside the
    /// domain and already-collapsed slots are dropped. Replaces any collapse
    /// already in progress.
    pub fn begin_collapse(&mut self, targets: impl IntoIterator<Item = Coord>) {
        self.queue.clear();
        let mut work_area = BTreeSet::new();
        for target in targets {
            let Some(pos) = self.ensure_slot(target) else {
                continue;
            };
            if self.slots.get(&pos).is_some_and(|s| !s.is_collapsed()) {
                work_area.insert(pos);
            }
        }
        self.active = Some(ActiveCollapse {
            total: work_area.len(),
            work_area,
            report: CollapseReport::default(),
        });
    }

    /// Run up to `max_attempts` collapse attempts (successes or backtracks)
    /// of the collapse started by `begin_collapse`.
    pub fn collapse_step(
        &mut self,
        max_attempts: usize,
        options: &mut CollapseOptions<'_>,
    ) -> Result<CollapseStatus> {
        if self.active.is_none() {
            return Err(GenerationError::InvalidOperation(
                "collapse_step called without begin_collapse".into(),
            ));
        }
        let interval = options
            .progress_interval
            .unwrap_or(self.progress_interval)
            .max(1);
        for _ in 0..max_attempts {
            if options.is_cancelled() {
                self.active = None;
                info!("collapse cancelled");
                return Err(GenerationError::Cancelled);
            }
            let Some(pos) = self.select_min_entropy() else {
                return Ok(self.finish_collapse());
            };
            if let Err(failed) = self.collapse_random(pos) {
                self.backtrack(failed)?;
                continue;
            }
            let snapshot = self.active.as_ref().map(|active| Progress {
                remaining: active.work_area.len(),
                total: active.total,
                collapsed: active.report.collapsed,
                backtracks: active.report.backtracks,
            });
            if let (Some(progress), Some(snapshot)) = (options.progress.as_deref_mut(), snapshot) {
                if snapshot.collapsed % interval == 0 {
                    progress(snapshot);
                }
            }
        }
        match &self.active {
            Some(active) if !active.work_area.is_empty() => Ok(CollapseStatus::InProgress {
                remaining: active.work_area.len(),
            }),
            _ => Ok(self.finish_collapse()),
        }
    }

    /// Collapse every slot in `targets`, backtracking as needed.
    pub fn collapse(
        &mut self,
        targets: impl IntoIterator<Item = Coord>,
        options: &mut CollapseOptions<'_>,
    ) -> Result<CollapseReport> {
        self.begin_collapse(targets);
        loop {
            if let CollapseStatus::Complete(report) = self.collapse_step(usize::MAX, options)? {
                return Ok(report);
            }
        }
    }

    /// Collapse the axis-aligned box starting at `origin` with extent `size`.
    pub fn collapse_box(
        &mut self,
        origin: Coord,
        size: Coord,
        options: &mut CollapseOptions<'_>,
    ) -> Result<CollapseReport> {
        self.collapse(box_positions(origin, size), options)
    }

    fn select_min_entropy(&self) -> Option<Coord> {
        let active = self.active.as_ref()?;
        let mut best = None;
        let mut best_entropy = f64::INFINITY;
        for pos in &active.work_area {
            let Some(slot) = self.slots.get(pos) else {
                continue;
            };
            let entropy = slot.entropy(self.entropy_metric);
            if best.is_none() || entropy < best_entropy {
                best = Some(*pos);
                best_entropy = entropy;
            }
        }
        best
    }

    fn finish_collapse(&mut self) -> CollapseStatus {
        let report = self.active.take().map(|a| a.report).unwrap_or_default();
        info!(
            collapsed = report.collapsed,
            backtracks = report.backtracks,
            "collapse complete"
        );
        CollapseStatus::Complete(report)
    }

    /// Undo enough history to get past `failed`. The amount resets to the
    /// policy's initial value whenever the map has collapsed more slots than
    /// at the previous failure, and escalates otherwise.
    fn backtrack(&mut self, failed: CollapseFailed) -> Result<()> {
        self.queue.clear();
        if self.total_collapsed > self.backtrack_barrier {
            self.backtrack_barrier = self.total_collapsed;
            self.backtrack_amount = self.policy.initial;
            self.full_unwinds = 0;
        } else {
            self.backtrack_amount = self.policy.escalation.apply(self.backtrack_amount);
        }
        let amount = self.backtrack_amount as usize;
        debug!(
            history = self.history.len(),
            amount,
            slot = %failed.slot,
            "backtracking"
        );
        if amount > self.history.capacity() && self.history.len() == self.history.capacity() {
            warn!(
                amount,
                capacity = self.history.capacity(),
                "backtrack exceeds the undo window; older collapses are permanent"
            );
        }
        self.undo(amount);
        if let Some(active) = &mut self.active {
            active.report.backtracks += 1;
        }
        if self.history.is_empty() {
            self.full_unwinds += 1;
            if self.full_unwinds > self.policy.max_full_unwinds {
                warn!(slot = %failed.slot, unwinds = self.full_unwinds, "undo history exhausted");
                self.active = None;
                self.full_unwinds = 0;
                return Err(GenerationError::HistoryExhausted {
                    slot: Some(failed.slot),
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Walkways
    // -----------------------------------------------------------------------

    /// Ban every module at `pos` whose face toward `direction` is not
    /// walkable, removing those that are still candidates. The ban outlives
    /// any undo.
    pub fn enforce_walkway(&mut self, pos: Coord, direction: Direction) -> Result<()> {
        let Some(pos) = self.ensure_slot(pos) else {
            return Err(GenerationError::InvalidOperation(format!(
                "no slot at {pos} for walkway"
            )));
        };
        let catalog = Arc::clone(&self.catalog);
        let blocked = ModuleSet::from_indices(
            catalog.len(),
            catalog
                .modules()
                .iter()
                .filter(|m| !m.face(direction).walkable())
                .map(|m| m.index),
        );
        if let Some(module) = self.module_at(pos) {
            if blocked.contains(module) {
                return Err(GenerationError::Contradiction { slot: pos });
            }
        }
        self.banned
            .entry(pos)
            .or_insert_with(|| catalog.empty_set())
            .union_with(&blocked);
        self.remove_and_propagate(pos, &blocked)
            .map_err(|failed| GenerationError::Contradiction { slot: failed.slot })
    }

    /// Require a walkable connection between two adjacent positions, on both
    /// sides of the shared face.
    pub fn enforce_walkway_between(&mut self, from: Coord, to: Coord) -> Result<()> {
        let Some(direction) = Direction::between(from, to) else {
            return Err(GenerationError::InvalidOperation(format!(
                "{from} and {to} are not adjacent"
            )));
        };
        self.enforce_walkway(from, direction)?;
        self.enforce_walkway(to, direction.opposite())
    }

    /// Whether the map has state that boundary constraints would no longer
    /// reach consistently.
    pub(crate) fn has_generated(&self) -> bool {
        self.total_collapsed > 0 || !self.history.is_empty()
    }

    pub(crate) fn take_slot(&mut self, pos: Coord) -> Option<Slot> {
        self.slots.remove(&pos)
    }
}

/// Every position in the box `origin .. origin + size`, in X-Y-Z order.
pub fn box_positions(origin: Coord, size: Coord) -> Vec<Coord> {
    let mut positions = Vec::new();
    for x in 0..size.x.max(0) {
        for y in 0..size.y.max(0) {
            for z in 0..size.z.max(0) {
                positions.push(origin + Coord::new(x, y, z));
            }
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FaceDetails, ModuleDef, demo_catalog};
    use crate::config::Escalation;
    use crate::test_catalogs;

    fn config(shape: MapShape, seed: u64) -> GenerationConfig {
        GenerationConfig {
            seed,
            shape,
            ..GenerationConfig::default()
        }
    }

    fn unbounded(height: i32) -> MapShape {
        MapShape::Unbounded {
            height,
            range_limit: None,
            range_center: Coord::ZERO,
        }
    }

    fn demo_map(seed: u64) -> CollapseMap {
        CollapseMap::new(Arc::new(demo_catalog().unwrap()), &config(unbounded(4), seed)).unwrap()
    }

    /// Health invariant: every live candidate is supported from every side.
    fn assert_healthy(map: &CollapseMap) {
        for slot in map.slots() {
            let Some(candidates) = slot.candidates() else {
                continue;
            };
            if slot.is_collapsed() {
                continue;
            }
            for m in candidates {
                for d in Direction::ALL {
                    assert!(
                        slot.health(d, m).unwrap() >= 1,
                        "candidate {} at {} has zero health toward {d}",
                        m.0,
                        slot.position()
                    );
                }
            }
        }
    }

    fn assert_compatible(map: &CollapseMap) {
        let catalog = map.catalog().clone();
        for (pos, module) in map.collapsed_modules() {
            for d in Direction::ALL {
                if let Some(other) = map.module_at(pos.offset(d)) {
                    assert!(
                        catalog.module(module).possible_neighbors(d).contains(other),
                        "{} at {pos} cannot sit next to {} toward {d}",
                        catalog.module(module).name,
                        catalog.module(other).name
                    );
                }
            }
        }
    }

    #[test]
    fn box_collapse_is_complete_and_compatible() {
        let mut map = demo_map(42);
        let report = map
            .collapse_box(Coord::ZERO, Coord::new(4, 4, 4), &mut CollapseOptions::default())
            .unwrap();
        assert!(report.collapsed >= 64);
        for pos in box_positions(Coord::ZERO, Coord::new(4, 4, 4)) {
            assert!(map.module_at(pos).is_some(), "{pos} not collapsed");
        }
        assert_compatible(&map);
        assert_healthy(&map);
        assert!(!map.is_collapsing());
    }

    #[test]
    fn propagation_creates_neighbors_lazily() {
        let mut map = demo_map(1);
        map.collapse([Coord::new(0, 1, 0)], &mut CollapseOptions::default())
            .unwrap();
        // The collapsed slot plus its six neighbors, minus none out of range
        // vertically (height 4, y = 1).
        assert!(map.get_slot(Coord::new(1, 1, 0)).is_some());
        assert!(map.get_slot(Coord::new(0, 0, 0)).is_some());
        assert!(map.get_slot(Coord::new(5, 1, 5)).is_none());
        assert_healthy(&map);
    }

    #[test]
    fn single_undo_restores_pre_collapse_state() {
        let mut map = demo_map(3);
        let pos = Coord::new(0, 1, 0);
        map.get_or_create_slot(pos);
        let mut before = BTreeMap::new();
        for d in Direction::ALL {
            map.get_or_create_slot(pos.offset(d));
        }
        for slot in map.slots() {
            before.insert(slot.position(), slot.candidates().cloned());
        }

        map.collapse([pos], &mut CollapseOptions::default()).unwrap();
        assert_eq!(map.history_len(), 1);
        assert_eq!(map.undo(1), 1);

        let slot = map.get_slot(pos).unwrap();
        assert!(!slot.is_collapsed());
        for (p, candidates) in before {
            assert_eq!(map.get_slot(p).unwrap().candidates().cloned(), candidates, "at {p}");
        }
        assert_eq!(map.total_collapsed(), 0);
        assert_eq!(
            map.drain_events(),
            vec![MapEvent::SlotCollapsed(pos), MapEvent::SlotCollapseUndone(pos)]
        );
    }

    #[test]
    fn same_seed_same_world() {
        let run = |seed| {
            let mut map = demo_map(seed);
            map.collapse_box(Coord::new(-2, 0, -2), Coord::new(5, 4, 5), &mut CollapseOptions::default())
                .unwrap();
            map.collapsed_modules()
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn tiling_map_wraps_horizontally() {
        let catalog = Arc::new(demo_catalog().unwrap());
        let shape = MapShape::Tiling {
            size_x: 3,
            height: 2,
            size_z: 3,
        };
        let mut map = CollapseMap::new(catalog, &config(shape, 5)).unwrap();
        assert_eq!(map.slot_count(), 18);
        assert_eq!(map.canonicalize(Coord::new(-1, 1, 3)), Some(Coord::new(2, 1, 0)));
        assert_eq!(map.canonicalize(Coord::new(0, 2, 0)), None);
        map.collapse_box(Coord::ZERO, Coord::new(3, 2, 3), &mut CollapseOptions::default())
            .unwrap();
        // Wrap-around neighbors must also be compatible.
        assert_compatible(&map);
        assert_eq!(map.total_collapsed(), 18);
    }

    #[test]
    fn range_limit_refuses_far_slots() {
        let catalog = Arc::new(demo_catalog().unwrap());
        let shape = MapShape::Unbounded {
            height: 2,
            range_limit: Some(3.0),
            range_center: Coord::ZERO,
        };
        let mut map = CollapseMap::new(catalog, &config(shape, 0)).unwrap();
        assert!(map.get_or_create_slot(Coord::new(3, 0, 0)).is_some());
        assert!(map.get_or_create_slot(Coord::new(3, 0, 1)).is_none());
        assert!(map.get_or_create_slot(Coord::new(0, -1, 0)).is_none());
    }

    fn small_disc(radius: f64) -> MapShape {
        MapShape::Unbounded {
            height: 1,
            range_limit: Some(radius),
            range_center: Coord::ZERO,
        }
    }

    #[test]
    fn collapse_slot_to_rejects_invalid_requests() {
        let catalog = Arc::new(test_catalogs::two_isolated());
        let mut map = CollapseMap::new(catalog.clone(), &config(small_disc(2.0), 0)).unwrap();
        let pos = Coord::ZERO;
        let a = catalog.find("a").unwrap();
        let b = catalog.find("b").unwrap();
        map.collapse_slot_to(pos, a).unwrap();
        assert!(matches!(
            map.collapse_slot_to(pos, a),
            Err(GenerationError::InvalidOperation(_))
        ));
        // The neighbor can no longer hold `b`.
        assert!(matches!(
            map.collapse_slot_to(Coord::new(1, 0, 0), b),
            Err(GenerationError::InvalidOperation(_))
        ));
        assert!(matches!(
            map.collapse_slot_to(Coord::new(0, 5, 0), a),
            Err(GenerationError::InvalidOperation(_))
        ));
        assert!(map.collapse_slot_to(Coord::new(1, 0, 0), a).is_ok());
    }

    #[test]
    fn incompatible_pair_never_adjacent() {
        let catalog = Arc::new(test_catalogs::two_isolated());
        let a = catalog.find("a").unwrap();
        let b = catalog.find("b").unwrap();
        for seed in 0..40 {
            let mut map = CollapseMap::new(catalog.clone(), &config(small_disc(1.0), seed)).unwrap();
            map.collapse([Coord::ZERO, Coord::new(1, 0, 0)], &mut CollapseOptions::default())
                .unwrap();
            let left = map.module_at(Coord::ZERO).unwrap();
            let right = map.module_at(Coord::new(1, 0, 0)).unwrap();
            assert!(left == right, "seed {seed}: got {left:?} next to {right:?}");
            assert!(left == a || left == b);
        }
    }

    #[test]
    fn isolated_slot_picks_either_module_evenly() {
        let catalog = Arc::new(test_catalogs::two_isolated());
        let a = catalog.find("a").unwrap();
        // A disc of radius zero holds exactly one slot.
        let mut map = CollapseMap::new(catalog, &config(small_disc(0.0), 11)).unwrap();
        let trials = 2000;
        let mut a_count = 0;
        for _ in 0..trials {
            map.collapse([Coord::ZERO], &mut CollapseOptions::default())
                .unwrap();
            if map.module_at(Coord::ZERO) == Some(a) {
                a_count += 1;
            }
            assert_eq!(map.undo(1), 1);
        }
        assert_eq!(map.slot_count(), 1);
        let share = a_count as f64 / trials as f64;
        assert!((0.45..0.55).contains(&share), "share of a = {share}");
    }

    #[test]
    fn odd_ring_exhausts_history() {
        let catalog = Arc::new(test_catalogs::alternating());
        let shape = MapShape::Tiling {
            size_x: 3,
            height: 1,
            size_z: 1,
        };
        let mut map = CollapseMap::new(catalog, &config(shape, 2)).unwrap();
        let err = map
            .collapse_box(Coord::ZERO, Coord::new(3, 1, 1), &mut CollapseOptions::default())
            .unwrap_err();
        assert!(matches!(err, GenerationError::HistoryExhausted { slot: Some(_) }));
        assert!(!map.is_collapsing());
    }

    #[test]
    fn even_ring_alternates() {
        let catalog = Arc::new(test_catalogs::alternating());
        let shape = MapShape::Tiling {
            size_x: 4,
            height: 1,
            size_z: 1,
        };
        let mut map = CollapseMap::new(catalog, &config(shape, 2)).unwrap();
        map.collapse_box(Coord::ZERO, Coord::new(4, 1, 1), &mut CollapseOptions::default())
            .unwrap();
        let modules: Vec<_> = (0..4).map(|x| map.module_at(Coord::new(x, 0, 0)).unwrap()).collect();
        assert_ne!(modules[0], modules[1]);
        assert_eq!(modules[0], modules[2]);
        assert_eq!(modules[1], modules[3]);
    }

    #[test]
    fn cancellation_stops_between_attempts() {
        let mut map = demo_map(4);
        let flag = Arc::new(AtomicBool::new(true));
        let mut options = CollapseOptions {
            cancel: Some(flag),
            ..CollapseOptions::default()
        };
        let err = map
            .collapse_box(Coord::ZERO, Coord::new(3, 3, 3), &mut options)
            .unwrap_err();
        assert_eq!(err, GenerationError::Cancelled);
        assert_eq!(map.total_collapsed(), 0);
        assert!(!map.is_collapsing());
    }

    #[test]
    fn stepping_reports_progress() {
        let mut map = demo_map(8);
        let mut seen = Vec::new();
        let mut record = |p: Progress| seen.push(p);
        let mut options = CollapseOptions {
            progress: Some(&mut record),
            progress_interval: Some(5),
            ..CollapseOptions::default()
        };
        map.begin_collapse(box_positions(Coord::ZERO, Coord::new(3, 4, 3)));
        let mut steps = 0;
        loop {
            steps += 1;
            match map.collapse_step(4, &mut options).unwrap() {
                CollapseStatus::InProgress { remaining } => assert!(remaining > 0),
                CollapseStatus::Complete(report) => {
                    assert!(report.collapsed >= 36);
                    break;
                }
            }
        }
        drop(options);
        assert!(steps > 1);
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| p.collapsed % 5 == 0 && p.fraction() <= 1.0));
    }

    #[test]
    fn history_eviction_forgets_slots() {
        let catalog = Arc::new(demo_catalog().unwrap());
        let mut cfg = config(unbounded(2), 6);
        cfg.history_size = 4;
        let mut map = CollapseMap::new(catalog, &cfg).unwrap();
        map.collapse_box(Coord::ZERO, Coord::new(3, 2, 3), &mut CollapseOptions::default())
            .unwrap();
        assert_eq!(map.history_len(), 4);
        let forgotten = map.slots().filter(|s| s.is_forgotten()).count();
        assert_eq!(forgotten, 18 - 4);
        assert_compatible(&map);
        // Undo can only reach the window.
        assert_eq!(map.undo(100), 4);
        assert_eq!(map.total_collapsed(), 14);
    }

    #[test]
    fn walkway_removes_blocked_candidates() {
        let catalog = Arc::new(demo_catalog().unwrap());
        let mut map = CollapseMap::new(catalog.clone(), &config(unbounded(3), 0)).unwrap();
        let from = Coord::new(0, 1, 0);
        let to = Coord::new(1, 1, 0);
        map.enforce_walkway_between(from, to).unwrap();
        for pos in [from, to] {
            let candidates = map.get_slot(pos).unwrap().candidates().unwrap().clone();
            assert!(!candidates.is_empty());
            for m in &candidates {
                assert!(catalog.module(m).is_interior, "{} kept", catalog.module(m).name);
            }
        }
        assert!(matches!(
            map.enforce_walkway_between(from, Coord::new(3, 1, 0)),
            Err(GenerationError::InvalidOperation(_))
        ));
    }

    fn assert_walkable(map: &CollapseMap, pos: Coord, direction: Direction) {
        let catalog = map.catalog().clone();
        let candidates = map.get_slot(pos).unwrap().candidates().unwrap();
        assert!(!candidates.is_empty(), "no candidates left at {pos}");
        for m in candidates {
            assert!(
                catalog.module(m).face(direction).walkable(),
                "{} at {pos} blocks {direction}",
                catalog.module(m).name
            );
        }
    }

    #[test]
    fn walkway_survives_undo_of_an_earlier_collapse() {
        let mut map = demo_map(0);
        let from = Coord::new(0, 1, 0);
        let to = Coord::new(1, 1, 0);
        map.collapse([Coord::new(20, 1, 20)], &mut CollapseOptions::default())
            .unwrap();
        map.enforce_walkway_between(from, to).unwrap();
        assert_eq!(map.undo(1), 1);
        assert_walkable(&map, from, Direction::PosX);
        assert_walkable(&map, to, Direction::NegX);
        assert_healthy(&map);
    }

    #[test]
    fn undo_next_to_a_walkway_keeps_it_and_stays_healthy() {
        let from = Coord::new(0, 1, 0);
        let to = Coord::new(1, 1, 0);
        let mut checked = 0;
        for seed in 0..10 {
            let mut map = demo_map(seed);
            // Its propagation narrows `to`, so undo restores candidates there.
            map.collapse([Coord::new(1, 1, 1)], &mut CollapseOptions::default())
                .unwrap();
            if map.enforce_walkway_between(from, to).is_err() {
                continue;
            }
            assert_eq!(map.undo(1), 1);
            assert_walkable(&map, from, Direction::PosX);
            assert_walkable(&map, to, Direction::NegX);
            assert_healthy(&map);
            checked += 1;
        }
        assert!(checked > 0);
    }

    #[test]
    fn dead_end_past_the_undo_window_exhausts_history() {
        // `a` and `b` alternate along X and are walkable. `c` only sits next
        // to `c` along X and is not walkable.
        let x_faces = |name: &str, pos: i32, neg: i32| {
            ModuleDef::uniform(name, 9)
                .face(Direction::PosX, FaceDetails::horizontal(pos))
                .face(Direction::NegX, FaceDetails::horizontal(neg))
        };
        let catalog = Arc::new(
            ModuleCatalog::build(&[
                x_faces("a", 1, 2).walkable(),
                x_faces("b", 2, 1).walkable(),
                x_faces("c", 3, 3),
            ])
            .unwrap(),
        );
        let c = catalog.find("c").unwrap();
        let shape = MapShape::Tiling {
            size_x: 5,
            height: 1,
            size_z: 2,
        };
        let mut cfg = config(shape, 3);
        cfg.history_size = 2;
        let mut map = CollapseMap::new(catalog, &cfg).unwrap();

        // Row z = 1 collapses to `c`; three of its collapses leave the window.
        map.collapse_slot_to(Coord::new(0, 0, 1), c).unwrap();
        map.collapse_box(Coord::new(0, 0, 1), Coord::new(5, 1, 1), &mut CollapseOptions::default())
            .unwrap();
        assert_eq!(map.history_len(), 2);
        assert_eq!(map.slots().filter(|s| s.is_forgotten()).count(), 3);

        // Without `c`, row z = 0 is an odd ring of `a`/`b`.
        map.enforce_walkway(Coord::ZERO, Direction::PosX).unwrap();
        let err = map
            .collapse_box(Coord::ZERO, Coord::new(5, 1, 1), &mut CollapseOptions::default())
            .unwrap_err();
        assert!(matches!(err, GenerationError::HistoryExhausted { slot: Some(_) }));
        assert!(!map.is_collapsing());
        assert!(map.total_collapsed() >= 3);
        for x in 0..5 {
            assert!(map.module_at(Coord::new(x, 0, 0)).is_none());
        }
    }

    #[test]
    fn coordinate_limits_are_outside_an_unbounded_map() {
        let mut map = demo_map(2);
        assert!(map.get_or_create_slot(Coord::new(i32::MAX, 1, 0)).is_none());
        assert!(map.get_or_create_slot(Coord::new(0, 1, i32::MIN)).is_none());
        let edge = Coord::new(i32::MAX - 1, 1, i32::MIN + 1);
        map.collapse([edge], &mut CollapseOptions::default())
            .unwrap();
        assert!(map.module_at(edge).is_some());
        assert_healthy(&map);
    }

    #[test]
    fn walkway_on_unwalkable_catalog_is_contradiction() {
        let catalog = Arc::new(ModuleCatalog::build(&[ModuleDef::uniform("solid", 0)]).unwrap());
        let mut map = CollapseMap::new(catalog, &config(unbounded(1), 0)).unwrap();
        assert_eq!(
            map.enforce_walkway(Coord::ZERO, Direction::PosX),
            Err(GenerationError::Contradiction { slot: Coord::ZERO })
        );
    }

    #[test]
    fn shannon_metric_still_completes() {
        let catalog = Arc::new(demo_catalog().unwrap());
        let mut cfg = config(unbounded(4), 12);
        cfg.entropy_metric = EntropyMetric::Shannon;
        cfg.backtrack.escalation = Escalation::Multiply(2);
        let mut map = CollapseMap::new(catalog, &cfg).unwrap();
        map.collapse_box(Coord::ZERO, Coord::new(3, 4, 3), &mut CollapseOptions::default())
            .unwrap();
        assert_eq!(map.total_collapsed(), 36);
        assert_compatible(&map);
    }
}
