// Small catalogs shared by unit tests across modules.

use crate::catalog::{FaceDetails, ModuleCatalog, ModuleDef};
use crate::types::Direction;

/// `a` (connector 0, walkable) and `b` (connector 1): each only fits itself.
pub fn two_isolated() -> ModuleCatalog {
    ModuleCatalog::build(&[ModuleDef::uniform("a", 0).walkable(), ModuleDef::uniform("b", 1)])
        .unwrap()
}

/// Two modules that must alternate along X: `a` has `+X = 1, -X = 2`, `b` has
/// `+X = 2, -X = 1`. Every other face is connector 9. Odd-length rings in X
/// are unsatisfiable.
pub fn alternating() -> ModuleCatalog {
    let x_faces = |pos: i32, neg: i32, name: &str| {
        ModuleDef::uniform(name, 9)
            .face(Direction::PosX, FaceDetails::horizontal(pos))
            .face(Direction::NegX, FaceDetails::horizontal(neg))
    };
    ModuleCatalog::build(&[x_faces(1, 2, "a"), x_faces(2, 1, "b")]).unwrap()
}

/// An interior room module (`room`, walkable), a room module whose `+X` face
/// is an occlusion portal (`door`), a non-walkable interior module
/// (`closet`), and an exterior module (`rock`). All faces share one
/// connector, so any arrangement is legal.
pub fn rooms() -> ModuleCatalog {
    let portal = FaceDetails::horizontal(0)
        .with_walkable(true)
        .with_occlusion_portal(true);
    ModuleCatalog::build(&[
        ModuleDef::uniform("room", 0).interior().walkable(),
        ModuleDef::uniform("door", 0)
            .interior()
            .walkable()
            .face(Direction::PosX, portal),
        ModuleDef::uniform("closet", 0).interior(),
        ModuleDef::uniform("rock", 0),
    ])
    .unwrap()
}
