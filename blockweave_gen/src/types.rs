// Core types shared across the generator.
//
// Defines grid positions (`Coord`), the six face directions (`Direction`),
// and the compact integer ids used to address catalog modules and the arenas
// of the room graph. All types derive `Serialize` and `Deserialize` so that
// catalogs, configs, and worker notifications can cross process or thread
// boundaries as plain data.
//
// Direction indices follow the convention the whole crate relies on:
// `0 = -X, 1 = -Y, 2 = -Z, 3 = +X, 4 = +Y, 5 = +Z`, so the opposite of
// direction `d` is always `(d + 3) % 6`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position in the 3D slot grid, in slot units.
///
/// Y is up. Ordering is lexicographic on `(x, y, z)` so `Coord` can key
/// `BTreeMap`s with a stable iteration order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    pub const ZERO: Coord = Coord::new(0, 0, 0);

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The face-adjacent position in `direction`.
    pub fn offset(self, direction: Direction) -> Self {
        self + direction.vector()
    }

    /// Like `offset`, but `None` where a component would overflow.
    pub fn checked_offset(self, direction: Direction) -> Option<Self> {
        let v = direction.vector();
        Some(Self::new(
            self.x.checked_add(v.x)?,
            self.y.checked_add(v.y)?,
            self.z.checked_add(v.z)?,
        ))
    }

    /// Euclidean distance between two positions.
    pub fn distance(self, other: Self) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        let dz = (self.z - other.z) as f64;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Component-wise floor division, used to bucket positions into chunks.
    pub fn div_floor(self, size: i32) -> Self {
        Self::new(
            self.x.div_euclid(size),
            self.y.div_euclid(size),
            self.z.div_euclid(size),
        )
    }
}

impl Add for Coord {
    type Output = Coord;
    fn add(self, rhs: Coord) -> Coord {
        Coord::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Coord {
    type Output = Coord;
    fn sub(self, rhs: Coord) -> Coord {
        Coord::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One of the six face directions of a slot.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Direction {
    NegX = 0,
    NegY = 1,
    NegZ = 2,
    PosX = 3,
    PosY = 4,
    PosZ = 5,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::NegX,
        Direction::NegY,
        Direction::NegZ,
        Direction::PosX,
        Direction::PosY,
        Direction::PosZ,
    ];

    pub const HORIZONTAL: [Direction; 4] = [
        Direction::NegX,
        Direction::NegZ,
        Direction::PosX,
        Direction::PosZ,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Inverse of `index()`. Returns `None` for values outside 0..6.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn opposite(self) -> Self {
        Self::ALL[(self.index() + 3) % 6]
    }

    pub fn is_horizontal(self) -> bool {
        !matches!(self, Direction::NegY | Direction::PosY)
    }

    /// Axis index: 0 for X, 1 for Y, 2 for Z.
    pub fn axis(self) -> usize {
        self.index() % 3
    }

    /// `true` for the three negative directions, which are the canonical
    /// directions for portal storage.
    pub fn is_negative(self) -> bool {
        self.index() < 3
    }

    pub fn vector(self) -> Coord {
        match self {
            Direction::NegX => Coord::new(-1, 0, 0),
            Direction::NegY => Coord::new(0, -1, 0),
            Direction::NegZ => Coord::new(0, 0, -1),
            Direction::PosX => Coord::new(1, 0, 0),
            Direction::PosY => Coord::new(0, 1, 0),
            Direction::PosZ => Coord::new(0, 0, 1),
        }
    }

    /// Direction from `from` to the face-adjacent `to`, or `None` if the two
    /// positions are not face neighbors.
    pub fn between(from: Coord, to: Coord) -> Option<Self> {
        let delta = to - from;
        Self::ALL.into_iter().find(|d| d.vector() == delta)
    }

    /// Rotate a horizontal direction by `quarter_turns` about +Y. Vertical
    /// directions are returned unchanged.
    ///
    /// One quarter turn maps `-X -> -Z -> +X -> +Z -> -X`.
    pub fn rotate(self, quarter_turns: u8) -> Self {
        let Some(pos) = Self::HORIZONTAL.iter().position(|d| *d == self) else {
            return self;
        };
        Self::HORIZONTAL[(pos + quarter_turns as usize) % 4]
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::NegX => "-X",
            Direction::NegY => "-Y",
            Direction::NegZ => "-Z",
            Direction::PosX => "+X",
            Direction::PosY => "+Y",
            Direction::PosZ => "+Z",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Compact ids
// ---------------------------------------------------------------------------

/// Index of a module in its `ModuleCatalog`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ModuleIndex(pub u32);

impl ModuleIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Arena id of a room in the `RoomGraph`. Ids are recycled after a room is
/// dissolved, so holding one across graph mutations is not meaningful.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RoomId(pub u32);

/// Arena id of a portal in the `RoomGraph`. Recycled like `RoomId`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PortalId(pub u32);
