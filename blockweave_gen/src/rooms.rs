// Room and portal graph over collapsed slots, with portal-frustum visibility.
//
// Interior slots group into rooms: two adjacent collapsed interior slots join
// when both touching faces are walkable and neither is an occlusion portal.
// Exterior slots are bucketed into cubic "exterior chunks" instead. Portals
// sit on faces that separate what the renderer may need to cull across: any
// face flagged as an occlusion portal, and any face between an interior slot
// and a collapsed slot it is not joined to. A face between an interior slot
// and a slot that has not collapsed yet is not a portal.
//
// Storage is arena-style (`Vec<Option<Room>>`, `Vec<Option<Portal>>` with
// free lists), so merging or dissolving rooms only rewrites ids. The
// position-to-room index is a hash map and is never iterated. A portal is
// stored once per face, keyed by its canonical `(position, direction)` with
// the direction in `-X, -Y, -Z`; lookups in a positive direction shift the
// position and flip the direction first.
//
// Updates are incremental. `add_slot` merges the rooms of joined neighbors
// (the larger room absorbs the smaller) and re-evaluates the slot's six faces.
// `remove_slot` dissolves the slot's room outright: its portals are destroyed
// and its other members are marked outdated, to be re-added by
// `clear_outdated_slots`. Rebuilding is simpler than splitting a room in place
// and converges on the same graph.
//
// Visibility (`visible_set`) walks from the camera's room through portals that
// face the camera and intersect the current frustum, narrowing the frustum at
// each one. Each portal is traversed at most once per query, and a direction
// bitmask forbids stepping back against any direction already travelled.
//
// The graph reads only module faces from the catalog. It knows nothing about
// the collapse map; `world.rs` feeds it.

use crate::catalog::{Module, ModuleCatalog};
use crate::config::VisibilityConfig;
use crate::geometry::{Aabb, FaceQuad, Frustum, Vec3, cell_at, dot, sub};
use crate::types::{Coord, Direction, ModuleIndex, PortalId, RoomId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

/// A connected set of interior slots.
#[derive(Clone, Debug)]
pub struct Room {
    pub id: RoomId,
    slots: BTreeSet<Coord>,
    portals: BTreeSet<PortalId>,
    min: Coord,
    max: Coord,
}

impl Room {
    fn new(id: RoomId, first: Coord) -> Self {
        Self {
            id,
            slots: BTreeSet::from([first]),
            portals: BTreeSet::new(),
            min: first,
            max: first,
        }
    }

    fn insert(&mut self, pos: Coord) {
        self.slots.insert(pos);
        self.min = Coord::new(
            self.min.x.min(pos.x),
            self.min.y.min(pos.y),
            self.min.z.min(pos.z),
        );
        self.max = Coord::new(
            self.max.x.max(pos.x),
            self.max.y.max(pos.y),
            self.max.z.max(pos.z),
        );
    }

    /// Slot positions making up the room. These are what a renderer shows
    /// when the room is visible.
    pub fn slots(&self) -> &BTreeSet<Coord> {
        &self.slots
    }

    pub fn portals(&self) -> &BTreeSet<PortalId> {
        &self.portals
    }

    pub fn bounds(&self, block_size: f32) -> Aabb {
        Aabb::for_cells(self.min, self.max, block_size)
    }
}

/// A culling boundary on one face between two slots.
#[derive(Clone, Debug)]
pub struct Portal {
    pub id: PortalId,
    /// Canonical position; the face is on this slot's `direction` side.
    pub position: Coord,
    /// One of `-X`, `-Y`, `-Z`.
    pub direction: Direction,
    /// Room at `position` and at `position.offset(direction)`. `None` is the
    /// exterior.
    pub rooms: [Option<RoomId>; 2],
    pub quad: FaceQuad,
}

impl Portal {
    /// The two slots this portal separates, in `rooms` order.
    pub fn sides(&self) -> [Coord; 2] {
        [self.position, self.position.offset(self.direction)]
    }
}

/// Exterior slots bucketed by chunk.
#[derive(Clone, Debug)]
pub struct ExteriorChunk {
    pub coord: Coord,
    pub slots: BTreeSet<Coord>,
    pub bounds: Aabb,
}

/// Result of a visibility query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibleSet {
    pub rooms: BTreeSet<RoomId>,
    /// Chunk coordinates (see `RoomGraph::exterior_chunk`).
    pub exterior_chunks: BTreeSet<Coord>,
    pub portals_traversed: usize,
}

/// Canonical storage key for the face of `pos` toward `direction`.
pub fn canonical_face(pos: Coord, direction: Direction) -> (Coord, Direction) {
    if direction.is_negative() {
        (pos, direction)
    } else {
        (pos.offset(direction), direction.opposite())
    }
}

pub struct RoomGraph {
    catalog: Arc<ModuleCatalog>,
    block_size: f32,
    chunk_size: i32,
    cells: BTreeMap<Coord, ModuleIndex>,
    room_of: FxHashMap<Coord, RoomId>,
    rooms: Vec<Option<Room>>,
    free_rooms: Vec<RoomId>,
    portals: Vec<Option<Portal>>,
    free_portals: Vec<PortalId>,
    portal_index: BTreeMap<(Coord, Direction), PortalId>,
    chunks: BTreeMap<Coord, ExteriorChunk>,
    outdated: BTreeSet<Coord>,
}

impl RoomGraph {
    pub fn new(catalog: Arc<ModuleCatalog>, config: &VisibilityConfig) -> Self {
        Self {
            catalog,
            block_size: config.block_size,
            chunk_size: config.chunk_size.max(1),
            cells: BTreeMap::new(),
            room_of: FxHashMap::default(),
            rooms: Vec::new(),
            free_rooms: Vec::new(),
            portals: Vec::new(),
            free_portals: Vec::new(),
            portal_index: BTreeMap::new(),
            chunks: BTreeMap::new(),
            outdated: BTreeSet::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn room_at(&self, pos: Coord) -> Option<RoomId> {
        self.room_of.get(&pos).copied()
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(id.0 as usize)?.as_ref()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter().flatten()
    }

    pub fn portal(&self, id: PortalId) -> Option<&Portal> {
        self.portals.get(id.0 as usize)?.as_ref()
    }

    pub fn portals(&self) -> impl Iterator<Item = &Portal> {
        self.portals.iter().flatten()
    }

    /// The portal on the face of `pos` toward `direction`, if that face is
    /// one. Both sides of a face return the same portal.
    pub fn portal_at(&self, pos: Coord, direction: Direction) -> Option<PortalId> {
        self.portal_index
            .get(&canonical_face(pos, direction))
            .copied()
    }

    /// The chunk coordinate holding `pos`.
    pub fn exterior_chunk_coord(&self, pos: Coord) -> Coord {
        pos.div_floor(self.chunk_size)
    }

    pub fn exterior_chunk(&self, chunk: Coord) -> Option<&ExteriorChunk> {
        self.chunks.get(&chunk)
    }

    pub fn exterior_chunks(&self) -> impl Iterator<Item = &ExteriorChunk> {
        self.chunks.values()
    }

    /// Whether `pos` is a collapsed slot known to the graph.
    pub fn contains_slot(&self, pos: Coord) -> bool {
        self.cells.contains_key(&pos)
    }

    pub fn outdated_count(&self) -> usize {
        self.outdated.len()
    }

    fn module_at(&self, pos: Coord) -> Option<&Module> {
        self.cells.get(&pos).map(|&m| self.catalog.module(m))
    }

    fn room_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(id.0 as usize)?.as_mut()
    }

    // -----------------------------------------------------------------------
    // Connectivity rules
    // -----------------------------------------------------------------------

    /// Whether the collapsed slots at `pos` and its `direction` neighbor
    /// belong to the same room.
    fn joined(&self, pos: Coord, direction: Direction) -> bool {
        let (Some(a), Some(b)) = (self.module_at(pos), self.module_at(pos.offset(direction)))
        else {
            return false;
        };
        let fa = a.face(direction);
        let fb = b.face(direction.opposite());
        a.is_interior
            && b.is_interior
            && fa.walkable()
            && fb.walkable()
            && !fa.occlusion_portal()
            && !fb.occlusion_portal()
    }

    fn is_portal(&self, pos: Coord, direction: Direction) -> bool {
        let a = self.module_at(pos);
        let b = self.module_at(pos.offset(direction));
        let flagged_a = a.is_some_and(|m| m.face(direction).occlusion_portal());
        let flagged_b = b.is_some_and(|m| m.face(direction.opposite()).occlusion_portal());
        if flagged_a || flagged_b {
            return true;
        }
        match (a, b) {
            (Some(a), Some(b)) => {
                (a.is_interior || b.is_interior) && !self.joined(pos, direction)
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Register a collapsed slot. Re-adding a slot with a different module
    /// replaces it.
    pub fn add_slot(&mut self, pos: Coord, module: ModuleIndex) {
        match self.cells.get(&pos) {
            Some(&existing) if existing == module => return,
            Some(_) => self.remove_slot(pos),
            None => {}
        }
        self.cells.insert(pos, module);
        self.outdated.remove(&pos);
        if self.catalog.module(module).is_interior {
            self.place_in_room(pos);
        } else {
            self.add_to_chunk(pos);
        }
        self.refresh_faces(pos);
    }

    /// Forget a slot that is no longer collapsed.
    pub fn remove_slot(&mut self, pos: Coord) {
        let Some(module) = self.cells.remove(&pos) else {
            return;
        };
        self.outdated.remove(&pos);
        if self.catalog.module(module).is_interior {
            if let Some(room) = self.room_of.remove(&pos) {
                self.dissolve_room(room, pos);
            }
        } else {
            let chunk = self.exterior_chunk_coord(pos);
            if let Some(entry) = self.chunks.get_mut(&chunk) {
                entry.slots.remove(&pos);
                if entry.slots.is_empty() {
                    self.chunks.remove(&chunk);
                }
            }
        }
        self.refresh_faces(pos);
    }

    /// Re-add every slot left without a room by a dissolved room.
    pub fn clear_outdated_slots(&mut self) {
        let outdated = std::mem::take(&mut self.outdated);
        for pos in outdated {
            if self.cells.contains_key(&pos) && !self.room_of.contains_key(&pos) {
                self.place_in_room(pos);
                self.refresh_faces(pos);
            }
        }
    }

    fn place_in_room(&mut self, pos: Coord) {
        let mut neighbors: SmallVec<[RoomId; 6]> = SmallVec::new();
        for d in Direction::ALL {
            if !self.joined(pos, d) {
                continue;
            }
            if let Some(room) = self.room_at(pos.offset(d)) {
                if !neighbors.contains(&room) {
                    neighbors.push(room);
                }
            }
        }
        let room = match neighbors.split_first() {
            None => self.create_room(pos),
            Some((&first, rest)) => {
                let mut survivor = first;
                for &other in rest {
                    survivor = self.merge_rooms(survivor, other);
                }
                if let Some(room) = self.room_mut(survivor) {
                    room.insert(pos);
                }
                survivor
            }
        };
        self.room_of.insert(pos, room);
    }

    fn create_room(&mut self, first: Coord) -> RoomId {
        let id = self
            .free_rooms
            .pop()
            .unwrap_or(RoomId(self.rooms.len() as u32));
        let room = Some(Room::new(id, first));
        match self.rooms.get_mut(id.0 as usize) {
            Some(entry) => *entry = room,
            None => self.rooms.push(room),
        }
        id
    }

    /// Merge two rooms; the one with more slots survives (lower id on a tie).
    fn merge_rooms(&mut self, a: RoomId, b: RoomId) -> RoomId {
        let size = |graph: &Self, id| graph.room(id).map_or(0, |r| r.slots.len());
        let (keep, absorb) = match size(self, a).cmp(&size(self, b)) {
            std::cmp::Ordering::Less => (b, a),
            std::cmp::Ordering::Greater => (a, b),
            std::cmp::Ordering::Equal => (a.min(b), a.max(b)),
        };
        let Some(absorbed) = self.rooms.get_mut(absorb.0 as usize).and_then(Option::take) else {
            return keep;
        };
        self.free_rooms.push(absorb);
        trace!(
            keep = keep.0,
            absorb = absorb.0,
            slots = absorbed.slots.len(),
            "merging rooms"
        );
        for pos in &absorbed.slots {
            self.room_of.insert(*pos, keep);
        }
        for &portal_id in &absorbed.portals {
            if let Some(portal) = self.portals.get_mut(portal_id.0 as usize).and_then(Option::as_mut) {
                for side in &mut portal.rooms {
                    if *side == Some(absorb) {
                        *side = Some(keep);
                    }
                }
            }
        }
        if let Some(room) = self.room_mut(keep) {
            for pos in &absorbed.slots {
                room.insert(*pos);
            }
            room.portals.extend(absorbed.portals.iter().copied());
        }
        keep
    }

    /// Destroy `id` and its portals. Members other than `removed` become
    /// outdated.
    fn dissolve_room(&mut self, id: RoomId, removed: Coord) {
        let Some(room) = self.rooms.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        self.free_rooms.push(id);
        for &portal in &room.portals {
            self.destroy_portal(portal);
        }
        for pos in room.slots {
            if pos != removed {
                self.room_of.remove(&pos);
                self.outdated.insert(pos);
            }
        }
    }

    fn add_to_chunk(&mut self, pos: Coord) {
        let coord = self.exterior_chunk_coord(pos);
        let size = self.chunk_size;
        let block_size = self.block_size;
        let chunk = self.chunks.entry(coord).or_insert_with(|| {
            let min = Coord::new(coord.x * size, coord.y * size, coord.z * size);
            let max = min + Coord::new(size - 1, size - 1, size - 1);
            ExteriorChunk {
                coord,
                slots: BTreeSet::new(),
                bounds: Aabb::for_cells(min, max, block_size),
            }
        });
        chunk.slots.insert(pos);
    }

    fn refresh_faces(&mut self, pos: Coord) {
        for d in Direction::ALL {
            self.refresh_face(pos, d);
        }
    }

    /// Create, update, or destroy the portal on one face to match the
    /// current state of both sides.
    fn refresh_face(&mut self, pos: Coord, direction: Direction) {
        let key = canonical_face(pos, direction);
        let existing = self.portal_index.get(&key).copied();
        if !self.is_portal(pos, direction) {
            if let Some(id) = existing {
                self.destroy_portal(id);
            }
            return;
        }
        let sides = [key.0, key.0.offset(key.1)];
        let rooms = sides.map(|p| self.room_at(p));
        let id = match existing {
            Some(id) => id,
            None => self.create_portal(key.0, key.1),
        };
        let old = self.portal(id).map(|p| p.rooms).unwrap_or_default();
        for room in old.into_iter().flatten() {
            if !rooms.contains(&Some(room)) {
                if let Some(r) = self.room_mut(room) {
                    r.portals.remove(&id);
                }
            }
        }
        for room in rooms.into_iter().flatten() {
            if let Some(r) = self.room_mut(room) {
                r.portals.insert(id);
            }
        }
        if let Some(portal) = self.portals.get_mut(id.0 as usize).and_then(Option::as_mut) {
            portal.rooms = rooms;
        }
    }

    fn create_portal(&mut self, position: Coord, direction: Direction) -> PortalId {
        let id = self
            .free_portals
            .pop()
            .unwrap_or(PortalId(self.portals.len() as u32));
        let portal = Some(Portal {
            id,
            position,
            direction,
            rooms: [None, None],
            quad: FaceQuad::new(position, direction, self.block_size),
        });
        match self.portals.get_mut(id.0 as usize) {
            Some(entry) => *entry = portal,
            None => self.portals.push(portal),
        }
        self.portal_index.insert((position, direction), id);
        id
    }

    fn destroy_portal(&mut self, id: PortalId) {
        let Some(portal) = self.portals.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        self.portal_index.remove(&(portal.position, portal.direction));
        for room in portal.rooms.into_iter().flatten() {
            if let Some(r) = self.room_mut(room) {
                r.portals.remove(&id);
            }
        }
        self.free_portals.push(id);
    }

    // -----------------------------------------------------------------------
    // Visibility
    // -----------------------------------------------------------------------

    /// Rooms and exterior chunks visible from `camera` within `frustum`.
    pub fn visible_set(&self, camera: Vec3, frustum: &Frustum) -> VisibleSet {
        let mut walk = Walk {
            graph: self,
            camera,
            visited: BTreeSet::new(),
            out: VisibleSet::default(),
        };
        match self.room_at(cell_at(camera, self.block_size)) {
            Some(room) => walk.room(room, frustum, 0),
            None => walk.exterior(frustum, 0),
        }
        walk.out
    }
}

/// Bit for a travel direction in the traversal mask.
fn direction_bit(direction: Direction) -> u8 {
    1 << direction.index()
}

/// State of one visibility query.
struct Walk<'a> {
    graph: &'a RoomGraph,
    camera: Vec3,
    visited: BTreeSet<PortalId>,
    out: VisibleSet,
}

impl Walk<'_> {
    fn room(&mut self, id: RoomId, frustum: &Frustum, mask: u8) {
        self.out.rooms.insert(id);
        let graph = self.graph;
        let Some(room) = graph.room(id) else {
            return;
        };
        for &portal_id in &room.portals {
            let Some(portal) = graph.portal(portal_id) else {
                continue;
            };
            // Travel away from the side this room is on.
            let (travel, far) = if portal.rooms[0] == Some(id) {
                (portal.direction, portal.rooms[1])
            } else {
                (portal.direction.opposite(), portal.rooms[0])
            };
            if far == Some(id) {
                continue;
            }
            self.through(portal, travel, far, frustum, mask);
        }
    }

    fn exterior(&mut self, frustum: &Frustum, mask: u8) {
        let graph = self.graph;
        for chunk in graph.chunks.values() {
            if frustum.intersects(&chunk.bounds) {
                self.out.exterior_chunks.insert(chunk.coord);
            }
        }
        for portal in graph.portals() {
            let (travel, far) = match portal.rooms {
                [None, Some(room)] => (portal.direction, Some(room)),
                [Some(room), None] => (portal.direction.opposite(), Some(room)),
                _ => continue,
            };
            self.through(portal, travel, far, frustum, mask);
        }
    }

    fn through(
        &mut self,
        portal: &Portal,
        travel: Direction,
        far: Option<RoomId>,
        frustum: &Frustum,
        mask: u8,
    ) {
        if self.visited.contains(&portal.id) {
            return;
        }
        if mask & direction_bit(travel.opposite()) != 0 {
            return;
        }
        // The portal must lie ahead of the camera in the travel direction.
        let v = travel.vector();
        let ahead = dot(
            sub(portal.quad.center, self.camera),
            [v.x as f32, v.y as f32, v.z as f32],
        );
        if ahead <= 0.0 || !frustum.intersects(&portal.quad.bounds) {
            return;
        }
        self.visited.insert(portal.id);
        self.out.portals_traversed += 1;
        let narrowed = frustum.narrow_to_portal(self.camera, &portal.quad, travel);
        let mask = mask | direction_bit(travel);
        match far {
            Some(room) => self.room(room, &narrowed, mask),
            None => self.exterior(&narrowed, mask),
        }
    }
}
