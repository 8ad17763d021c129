// A generation session: the collapse map plus everything derived from it.
//
// `World` owns the `CollapseMap`, the `RoomGraph` built over its collapsed
// slots, and the queue of spawn events for whatever instantiates content
// (a renderer, a mesh builder, a test). Every mutating call runs the map and
// then synchronizes: the map's `MapEvent`s since the last sync are reduced
// to the set of changed positions, and the room graph is updated for that
// set in one coalesced pass (remove every changed slot, re-add
// those that are collapsed now, then rebuild outdated slots). A slot that
// collapsed and was undone within one call therefore never reaches the graph.
//
// Spawn events are coalesced the same way, per position in coordinate order:
// a slot whose spawnable module changed gets a `Despawn` for the old one
// and a `Spawn` for the new one. Modules with `spawn` unset never appear.
//
// See also: `map.rs` for the collapse engine, `rooms.rs` for the graph,
// `worker.rs` which moves a `World` onto a background thread.
//
// **Critical constraint: determinism.** Given the same catalog, config and
// call sequence, the spawn events and the room graph are identical.

use crate::catalog::ModuleCatalog;
use crate::config::GenerationConfig;
use crate::error::Result;
use crate::geometry::{Frustum, Vec3};
use crate::map::{CollapseMap, CollapseOptions, CollapseReport, CollapseStatus, MapEvent};
use crate::rooms::{RoomGraph, VisibleSet};
use crate::types::{Coord, ModuleIndex};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Instruction for the consumer that builds content for collapsed slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnEvent {
    Spawn { position: Coord, module: ModuleIndex },
    Despawn { position: Coord, module: ModuleIndex },
}

pub struct World {
    config: GenerationConfig,
    map: CollapseMap,
    rooms: RoomGraph,
    spawned: BTreeMap<Coord, ModuleIndex>,
    spawn_events: VecDeque<SpawnEvent>,
}

impl World {
    pub fn new(catalog: Arc<ModuleCatalog>, config: GenerationConfig) -> Result<Self> {
        let map = CollapseMap::new(Arc::clone(&catalog), &config)?;
        let rooms = RoomGraph::new(catalog, &config.visibility);
        Ok(Self {
            config,
            map,
            rooms,
            spawned: BTreeMap::new(),
            spawn_events: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        self.map.catalog()
    }

    pub fn map(&self) -> &CollapseMap {
        &self.map
    }

    /// Direct access to the map. Call `sync` afterwards if anything
    /// collapsed or was undone.
    pub fn map_mut(&mut self) -> &mut CollapseMap {
        &mut self.map
    }

    pub fn rooms(&self) -> &RoomGraph {
        &self.rooms
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    pub fn collapse(
        &mut self,
        targets: impl IntoIterator<Item = Coord>,
        options: &mut CollapseOptions<'_>,
    ) -> Result<CollapseReport> {
        let result = self.map.collapse(targets, options);
        self.sync();
        result
    }

    pub fn collapse_box(
        &mut self,
        origin: Coord,
        size: Coord,
        options: &mut CollapseOptions<'_>,
    ) -> Result<CollapseReport> {
        let result = self.map.collapse_box(origin, size, options);
        self.sync();
        result
    }

    pub fn begin_collapse(&mut self, targets: impl IntoIterator<Item = Coord>) {
        self.map.begin_collapse(targets);
    }

    pub fn collapse_step(
        &mut self,
        max_attempts: usize,
        options: &mut CollapseOptions<'_>,
    ) -> Result<CollapseStatus> {
        let result = self.map.collapse_step(max_attempts, options);
        self.sync();
        result
    }

    pub fn collapse_slot_to(&mut self, pos: Coord, module: ModuleIndex) -> Result<()> {
        let result = self.map.collapse_slot_to(pos, module);
        self.sync();
        result
    }

    pub fn undo(&mut self, steps: usize) -> usize {
        let undone = self.map.undo(steps);
        self.sync();
        undone
    }

    pub fn enforce_walkway_between(&mut self, from: Coord, to: Coord) -> Result<()> {
        self.map.enforce_walkway_between(from, to)
    }

    // -----------------------------------------------------------------------
    // Consumers
    // -----------------------------------------------------------------------

    /// Take the spawn events accumulated since the last call, oldest first.
    /// Within one sync a `Despawn` precedes the `Spawn` that replaces it.
    pub fn drain_spawn_events(&mut self) -> Vec<SpawnEvent> {
        self.spawn_events.drain(..).collect()
    }

    /// Attach a consumer handle to the slot at `pos`. Returns false if there
    /// is no such slot.
    pub fn set_spawn_handle(&mut self, pos: Coord, handle: Option<u64>) -> bool {
        let Some(pos) = self.map.canonicalize(pos) else {
            return false;
        };
        match self.map.slot_mut(pos) {
            Some(slot) => {
                slot.spawn_handle = handle;
                true
            }
            None => false,
        }
    }

    pub fn visible_set(&self, camera: Vec3, frustum: &Frustum) -> VisibleSet {
        self.rooms.visible_set(camera, frustum)
    }

    /// Bring spawn events and the room graph up to date with the map.
    pub fn sync(&mut self) {
        let events = self.map.drain_events();
        if events.is_empty() {
            return;
        }
        let changed: BTreeSet<Coord> = events
            .into_iter()
            .map(|event| match event {
                MapEvent::SlotCollapsed(pos) | MapEvent::SlotCollapseUndone(pos) => pos,
            })
            .collect();
        for &pos in &changed {
            self.sync_spawn(pos);
            self.rooms.remove_slot(pos);
        }
        for &pos in &changed {
            if let Some(module) = self.map.module_at(pos) {
                self.rooms.add_slot(pos, module);
            }
        }
        self.rooms.clear_outdated_slots();
    }

    fn sync_spawn(&mut self, pos: Coord) {
        let now = self
            .map
            .module_at(pos)
            .filter(|&m| self.map.catalog().module(m).spawn);
        let before = self.spawned.get(&pos).copied();
        if now == before {
            return;
        }
        if let Some(module) = before {
            self.spawned.remove(&pos);
            self.spawn_events.push_back(SpawnEvent::Despawn {
                position: pos,
                module,
            });
        }
        if let Some(module) = now {
            self.spawned.insert(pos, module);
            self.spawn_events.push_back(SpawnEvent::Spawn {
                position: pos,
                module,
            });
        }
    }
}
