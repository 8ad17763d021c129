// End-to-end generation tests against the public API.
//
// Each test builds a world from a catalog and a config the way a consumer
// would, runs a collapse, and checks a whole-map property: face compatibility
// of every collapsed pair, exact health counts, reproducibility from the
// seed, boundary layers, room graph consistency, and the background worker.
// Catalogs are either the built-in demo catalog or small ones built inline.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use blockweave_gen::boundary::{BoundaryConstraint, ConstraintFaces, ConstraintMode};
use blockweave_gen::catalog::demo_connectors::{BEDROCK, OPEN};
use blockweave_gen::catalog::{FaceDetails, ModuleCatalog, ModuleDef, demo_catalog};
use blockweave_gen::config::{DriverConfig, GenerationConfig, MapShape};
use blockweave_gen::error::GenerationError;
use blockweave_gen::geometry::{Frustum, cell_center};
use blockweave_gen::map::{CollapseMap, CollapseOptions};
use blockweave_gen::types::{Coord, Direction};
use blockweave_gen::worker::{ChunkDriver, GenerationWorker, WorkerEvent};
use blockweave_gen::world::World;

fn demo() -> Arc<ModuleCatalog> {
    Arc::new(demo_catalog().unwrap())
}

fn unbounded(height: i32) -> MapShape {
    MapShape::Unbounded {
        height,
        range_limit: None,
        range_center: Coord::ZERO,
    }
}

fn layered_config(seed: u64, height: i32) -> GenerationConfig {
    GenerationConfig {
        seed,
        shape: unbounded(height),
        boundary_constraints: vec![
            BoundaryConstraint {
                relative_y: 0,
                faces: ConstraintFaces::Down,
                mode: ConstraintMode::Enforce,
                connector: BEDROCK,
            },
            BoundaryConstraint {
                relative_y: -1,
                faces: ConstraintFaces::Up,
                mode: ConstraintMode::Enforce,
                connector: OPEN,
            },
        ],
        ..GenerationConfig::default()
    }
}

fn collapse_box(world: &mut World, size: Coord) {
    world
        .collapse_box(Coord::ZERO, size, &mut CollapseOptions::default())
        .unwrap();
}

#[test]
fn collapsed_neighbors_are_compatible() {
    let catalog = demo();
    let mut world = World::new(catalog.clone(), layered_config(1, 5)).unwrap();
    collapse_box(&mut world, Coord::new(8, 5, 8));
    let modules = world.map().collapsed_modules();
    assert_eq!(modules.len(), 8 * 5 * 8);
    for (&pos, &module) in &modules {
        for d in Direction::ALL {
            let Some(&other) = modules.get(&pos.offset(d)) else {
                continue;
            };
            assert!(
                catalog.module(module).possible_neighbors(d).contains(other),
                "{} at {pos} cannot have {} on its {d} side",
                catalog.module(module).name,
                catalog.module(other).name
            );
        }
    }
}

#[test]
fn health_counts_are_exact_after_collapse_and_undo() {
    let catalog = demo();
    let config = GenerationConfig {
        seed: 9,
        shape: unbounded(4),
        ..GenerationConfig::default()
    };
    let mut map = CollapseMap::new(catalog.clone(), &config).unwrap();
    map.collapse_box(Coord::ZERO, Coord::new(5, 4, 5), &mut CollapseOptions::default())
        .unwrap();
    map.undo(30);

    let full = catalog.full_set();
    for slot in map.slots() {
        assert!(!slot.is_forgotten());
        for d in Direction::ALL {
            let neighbor = map
                .canonicalize(slot.position().offset(d))
                .and_then(|n| map.get_slot(n))
                .and_then(|n| n.candidates());
            let support = neighbor.unwrap_or(&full);
            for m in catalog.modules() {
                let expected = support
                    .iter()
                    .filter(|&p| m.possible_neighbors(d).contains(p))
                    .count();
                assert_eq!(
                    slot.health(d, m.index),
                    Some(expected as u16),
                    "{} toward {d} at {}",
                    m.name,
                    slot.position()
                );
            }
        }
    }
}

#[test]
fn same_seed_same_world() {
    let run = |seed| {
        let mut world = World::new(demo(), layered_config(seed, 4)).unwrap();
        collapse_box(&mut world, Coord::new(6, 4, 6));
        world.map().collapsed_modules()
    };
    assert_eq!(run(42), run(42));
    assert_ne!(run(42), run(43));
}

#[test]
fn boundary_layers_hold_across_the_box() {
    let catalog = demo();
    let mut world = World::new(catalog.clone(), layered_config(7, 4)).unwrap();
    collapse_box(&mut world, Coord::new(6, 4, 6));
    for (pos, module) in world.map().collapsed_modules() {
        let module = catalog.module(module);
        if pos.y == 0 {
            assert!(module.fits_connector(Direction::NegY, BEDROCK), "{}", module.name);
        }
        if pos.y == 3 {
            assert!(module.fits_connector(Direction::PosY, OPEN), "{}", module.name);
        }
    }
}

#[test]
fn portals_are_stored_once_per_face() {
    let config = GenerationConfig {
        seed: 5,
        shape: MapShape::Tiling {
            size_x: 6,
            height: 3,
            size_z: 6,
        },
        ..GenerationConfig::default()
    };
    let mut world = World::new(demo(), config).unwrap();
    collapse_box(&mut world, Coord::new(6, 3, 6));
    let rooms = world.rooms();
    let mut faces = BTreeSet::new();
    for portal in rooms.portals() {
        assert!(portal.direction.is_negative());
        assert!(faces.insert((portal.position, portal.direction)));
        let [near, far] = portal.sides();
        assert_eq!(rooms.portal_at(near, portal.direction), Some(portal.id));
        assert_eq!(rooms.portal_at(far, portal.direction.opposite()), Some(portal.id));
        for (side, room) in portal.sides().into_iter().zip(portal.rooms) {
            assert_eq!(rooms.room_at(side), room);
        }
    }
    for room in rooms.rooms() {
        for &portal in room.portals() {
            let portal = rooms.portal(portal).unwrap();
            assert!(portal.rooms.contains(&Some(room.id)));
        }
    }
}

#[test]
fn camera_inside_a_room_sees_it() {
    let mut world = World::new(demo(), layered_config(3, 4)).unwrap();
    collapse_box(&mut world, Coord::new(8, 4, 8));
    let Some(room) = world.rooms().rooms().next() else {
        return;
    };
    let inside = *room.slots().iter().next().unwrap();
    let camera = cell_center(inside, world.config().visibility.block_size);
    let seen = world.visible_set(camera, &Frustum::everything());
    assert!(seen.rooms.contains(&room.id));
}

#[test]
fn unsatisfiable_ring_exhausts_history() {
    let x_faces = |name: &str, pos: i32, neg: i32| {
        ModuleDef::uniform(name, 9)
            .face(Direction::PosX, FaceDetails::horizontal(pos))
            .face(Direction::NegX, FaceDetails::horizontal(neg))
    };
    let catalog =
        ModuleCatalog::build(&[x_faces("east", 1, 2), x_faces("west", 2, 1)]).unwrap();
    let config = GenerationConfig {
        shape: MapShape::Tiling {
            size_x: 3,
            height: 1,
            size_z: 1,
        },
        ..GenerationConfig::default()
    };
    let mut world = World::new(Arc::new(catalog), config).unwrap();
    let result = world.collapse_box(Coord::ZERO, Coord::new(3, 1, 1), &mut CollapseOptions::default());
    assert!(matches!(
        result,
        Err(GenerationError::HistoryExhausted { slot: Some(_) })
    ));
    assert!(world.rooms().rooms().next().is_none());
}

#[test]
fn config_from_json_drives_a_tiling_world() {
    let json = r#"{
        "seed": 12,
        "shape": { "kind": "tiling", "size_x": 4, "height": 3, "size_z": 4 },
        "backtrack": { "initial": 3, "escalation": { "multiply": 2 } },
        "entropy_metric": "shannon",
        "boundary_constraints": [
            { "relative_y": 0, "faces": "down", "mode": "enforce", "connector": 1 }
        ]
    }"#;
    let config = GenerationConfig::from_json(json).unwrap();
    let mut world = World::new(demo(), config).unwrap();
    collapse_box(&mut world, Coord::new(4, 3, 4));
    assert_eq!(world.map().total_collapsed(), 48);
    let spawned = world.drain_spawn_events().len();
    let air = world.catalog().find("air").unwrap();
    let visible = world
        .map()
        .collapsed_modules()
        .values()
        .filter(|&&m| m != air)
        .count();
    assert_eq!(spawned, visible);
}

#[test]
fn background_worker_reports_chunks() {
    let config = GenerationConfig {
        seed: 2,
        driver: DriverConfig {
            chunk_size: 4,
            radius: 0,
            batch_size: 8,
            event_capacity: 2,
        },
        ..layered_config(2, 3)
    };
    let world = World::new(demo(), config).unwrap();
    let driver = ChunkDriver::for_world(&world);
    let worker = GenerationWorker::spawn(world, driver);
    match worker.recv_timeout(Duration::from_secs(30)) {
        Some(WorkerEvent::ChunkCompleted { chunk, slots }) => {
            assert_eq!(chunk, Coord::ZERO);
            assert_eq!(slots.len(), 4 * 3 * 4);
        }
        other => panic!("unexpected worker event: {other:?}"),
    }
    assert!(worker.focus(Coord::new(9, 0, 0)));
    match worker.recv_timeout(Duration::from_secs(30)) {
        Some(WorkerEvent::ChunkCompleted { chunk, .. }) => assert_eq!(chunk, Coord::new(2, 0, 0)),
        other => panic!("unexpected worker event: {other:?}"),
    }
    let world = worker.stop().unwrap();
    assert!(world.map().total_collapsed() >= 2 * 4 * 3 * 4);
}
