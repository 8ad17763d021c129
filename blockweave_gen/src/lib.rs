// blockweave_gen: backtracking wave function collapse over a 3D block grid.
//
// This crate fills a grid of slots with modules from a catalog so that every
// pair of touching faces is compatible, backtracking out of contradictions
// through a bounded undo history. Collapsed slots are grouped into rooms and
// portals for visibility culling. It has no rendering dependencies; whatever
// instantiates content consumes `SpawnEvent`s and visibility queries.
//
// Module overview:
// - `types.rs`:         Coord, Direction, and the compact id newtypes.
// - `module_set.rs`:    Fixed-capacity bitset over module indices.
// - `catalog.rs`:       Module definitions, face compatibility, neighbor sets, demo catalog.
// - `slot.rs`:          Per-position candidates, health counts, and entropy.
// - `history.rs`:       Undo history items and the ring buffer that bounds them.
// - `removal_queue.rs`: Deferred, coalesced propagation work.
// - `map.rs`:           CollapseMap: propagation, undo, backtracking collapse loop.
// - `boundary.rs`:      Per-layer connector constraints and the template column.
// - `geometry.rs`:      Boxes, planes, portal quads, frusta.
// - `rooms.rs`:         RoomGraph: rooms, portals, exterior chunks, visibility.
// - `world.rs`:         World: map + room graph + spawn events, kept in sync.
// - `worker.rs`:        ChunkDriver and the background GenerationWorker.
// - `config.rs`:        GenerationConfig, every tunable, JSON-loadable.
// - `error.rs`:         CatalogError, ConfigError, GenerationError.
// - `prng`:             Re-exported from `blockweave_prng`: xoshiro256++ with SplitMix64 seeding.
//
// **Critical constraint: determinism.** A generation run is a pure function
// of `(catalog, config, calls)`. All randomness comes from the map's seeded
// PRNG; nothing reads system time or OS entropy. Slot storage is an
// `FxHashMap` for speed (fixed hasher, so still reproducible); anything the
// engine iterates to make a decision is a `BTreeMap`/`BTreeSet` or a FIFO.

pub mod boundary;
pub mod catalog;
pub mod config;
pub mod error;
pub mod geometry;
pub mod history;
pub mod map;
pub mod module_set;
pub use blockweave_prng as prng;
pub mod removal_queue;
pub mod rooms;
pub mod slot;
#[cfg(test)]
mod test_catalogs;
pub mod types;
pub mod world;
pub mod worker;

pub use catalog::{ModuleCatalog, ModuleDef};
pub use config::GenerationConfig;
pub use error::{GenerationError, Result};
pub use map::{CollapseMap, CollapseOptions, CollapseReport};
pub use world::{SpawnEvent, World};
