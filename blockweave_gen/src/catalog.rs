// Module catalog: the immutable tile vocabulary of a map.
//
// A catalog is built once from a list of `ModuleDef`s (typically loaded from
// JSON) and shared by `Arc` across every slot and map that uses it. Building
// does all of the expensive, order-sensitive work up front:
//
// 1. Validate the definitions (weights, names, face kinds, rotations).
// 2. Expand definitions flagged `rotations` into four quarter-turn variants.
//    Rotation permutes the horizontal faces about +Y and adds the turn count
//    to each vertical face's rotation.
// 3. Compute `possible_neighbors[d]` for every module and direction from the
//    face fit rule, minus explicitly excluded neighbor pairs. The fit rule is
//    symmetric in its arguments, so `b` is a `d`-neighbor of `a` iff `a` is an
//    `opposite(d)`-neighbor of `b`.
// 4. Compute the initial health table: `initial_health[d][m]` is the number of
//    modules that accept `m` when sitting in direction `d` of it. A zero entry
//    means the module can never be placed next to anything in that direction,
//    which is rejected as `CatalogError::UnreachableModule` before any map is
//    built.
//
// See also: `slot.rs`, which copies the initial health table into every new
// slot, and `map.rs`, whose propagation walks `neighbor_list()`.

use crate::error::CatalogError;
use crate::module_set::ModuleSet;
use crate::types::{Direction, ModuleIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Faces
// ---------------------------------------------------------------------------

/// Connector description of one face of a module.
///
/// Horizontal faces (`±X`, `±Z`) carry chirality (`symmetric`/`flipped`);
/// vertical faces (`±Y`) carry a rotation about Y (`invariant`/`rotation`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaceDetails {
    Horizontal {
        connector: i32,
        #[serde(default)]
        walkable: bool,
        #[serde(default)]
        occlusion_portal: bool,
        #[serde(default = "default_true")]
        symmetric: bool,
        #[serde(default)]
        flipped: bool,
    },
    Vertical {
        connector: i32,
        #[serde(default)]
        walkable: bool,
        #[serde(default)]
        occlusion_portal: bool,
        #[serde(default = "default_true")]
        invariant: bool,
        #[serde(default)]
        rotation: u8,
    },
}

fn default_true() -> bool {
    true
}

impl FaceDetails {
    /// A symmetric horizontal face with the given connector.
    pub fn horizontal(connector: i32) -> Self {
        FaceDetails::Horizontal {
            connector,
            walkable: false,
            occlusion_portal: false,
            symmetric: true,
            flipped: false,
        }
    }

    /// A rotation-invariant vertical face with the given connector.
    pub fn vertical(connector: i32) -> Self {
        FaceDetails::Vertical {
            connector,
            walkable: false,
            occlusion_portal: false,
            invariant: true,
            rotation: 0,
        }
    }

    /// The natural face kind for a direction and connector.
    pub fn for_direction(direction: Direction, connector: i32) -> Self {
        if direction.is_horizontal() {
            Self::horizontal(connector)
        } else {
            Self::vertical(connector)
        }
    }

    pub fn connector(&self) -> i32 {
        match *self {
            FaceDetails::Horizontal { connector, .. } | FaceDetails::Vertical { connector, .. } => {
                connector
            }
        }
    }

    pub fn walkable(&self) -> bool {
        match *self {
            FaceDetails::Horizontal { walkable, .. } | FaceDetails::Vertical { walkable, .. } => {
                walkable
            }
        }
    }

    pub fn occlusion_portal(&self) -> bool {
        match *self {
            FaceDetails::Horizontal {
                occlusion_portal, ..
            }
            | FaceDetails::Vertical {
                occlusion_portal, ..
            } => occlusion_portal,
        }
    }

    pub fn with_walkable(mut self, value: bool) -> Self {
        match &mut self {
            FaceDetails::Horizontal { walkable, .. } | FaceDetails::Vertical { walkable, .. } => {
                *walkable = value
            }
        }
        self
    }

    pub fn with_occlusion_portal(mut self, value: bool) -> Self {
        match &mut self {
            FaceDetails::Horizontal {
                occlusion_portal, ..
            }
            | FaceDetails::Vertical {
                occlusion_portal, ..
            } => *occlusion_portal = value,
        }
        self
    }

    /// Whether two faces touching each other are compatible.
    pub fn fits(&self, other: &FaceDetails) -> bool {
        match (*self, *other) {
            (
                FaceDetails::Horizontal {
                    connector: c1,
                    symmetric: s1,
                    flipped: f1,
                    ..
                },
                FaceDetails::Horizontal {
                    connector: c2,
                    symmetric: s2,
                    flipped: f2,
                    ..
                },
            ) => c1 == c2 && (s1 || s2 || f1 != f2),
            (
                FaceDetails::Vertical {
                    connector: c1,
                    invariant: i1,
                    rotation: r1,
                    ..
                },
                FaceDetails::Vertical {
                    connector: c2,
                    invariant: i2,
                    rotation: r2,
                    ..
                },
            ) => c1 == c2 && (i1 || i2 || r1 == r2),
            _ => false,
        }
    }

    fn rotated(self, quarter_turns: u8) -> Self {
        match self {
            FaceDetails::Vertical {
                connector,
                walkable,
                occlusion_portal,
                invariant,
                rotation,
            } => FaceDetails::Vertical {
                connector,
                walkable,
                occlusion_portal,
                invariant,
                rotation: (rotation + quarter_turns) % 4,
            },
            horizontal => horizontal,
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions (input)
// ---------------------------------------------------------------------------

/// One module as authored. Faces are indexed by `Direction::index()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    pub faces: [FaceDetails; 6],
    /// Selection weight. Must be positive and finite.
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default)]
    pub is_interior: bool,
    /// Whether the consumer should instantiate anything for this module.
    #[serde(default = "default_true")]
    pub spawn: bool,
    /// Names of definitions that may never sit next to this one, in any
    /// direction. Applies to every rotation of either side.
    #[serde(default)]
    pub excluded_neighbors: Vec<String>,
    /// Expand into four quarter-turn variants.
    #[serde(default)]
    pub rotations: bool,
}

fn default_probability() -> f64 {
    1.0
}

impl ModuleDef {
    /// A definition whose faces are plain connectors (symmetric horizontal,
    /// invariant vertical), indexed by direction.
    pub fn with_connectors(name: impl Into<String>, connectors: [i32; 6]) -> Self {
        Self {
            name: name.into(),
            faces: std::array::from_fn(|i| {
                FaceDetails::for_direction(Direction::ALL[i], connectors[i])
            }),
            probability: 1.0,
            is_interior: false,
            spawn: true,
            excluded_neighbors: Vec::new(),
            rotations: false,
        }
    }

    /// Same connector on every face.
    pub fn uniform(name: impl Into<String>, connector: i32) -> Self {
        Self::with_connectors(name, [connector; 6])
    }

    pub fn probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    pub fn interior(mut self) -> Self {
        self.is_interior = true;
        self
    }

    pub fn face(mut self, direction: Direction, face: FaceDetails) -> Self {
        self.faces[direction.index()] = face;
        self
    }

    /// Mark every face walkable.
    pub fn walkable(mut self) -> Self {
        for face in &mut self.faces {
            *face = face.with_walkable(true);
        }
        self
    }

    /// Nothing is instantiated for this module when it collapses.
    pub fn hidden(mut self) -> Self {
        self.spawn = false;
        self
    }

    pub fn rotated_variants(mut self) -> Self {
        self.rotations = true;
        self
    }

    pub fn excluding(mut self, neighbor: impl Into<String>) -> Self {
        self.excluded_neighbors.push(neighbor.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Built catalog
// ---------------------------------------------------------------------------

/// A catalog entry. Immutable once the catalog is built.
#[derive(Clone, Debug)]
pub struct Module {
    pub index: ModuleIndex,
    /// Unique name; rotated variants are suffixed `_r1`..`_r3`.
    pub name: String,
    /// Name of the definition this module was expanded from.
    pub prototype: String,
    pub rotation: u8,
    pub faces: [FaceDetails; 6],
    pub probability: f64,
    /// `probability * ln(probability)`, summed by slots for Shannon entropy.
    pub plogp: f64,
    pub is_interior: bool,
    pub spawn: bool,
    def_index: usize,
    possible_neighbors: [ModuleSet; 6],
    neighbor_lists: [Vec<ModuleIndex>; 6],
}

impl Module {
    pub fn face(&self, direction: Direction) -> &FaceDetails {
        &self.faces[direction.index()]
    }

    /// Modules that may sit adjacent in `direction`.
    pub fn possible_neighbors(&self, direction: Direction) -> &ModuleSet {
        &self.possible_neighbors[direction.index()]
    }

    /// Same as `possible_neighbors`, as a dense ascending list for the
    /// propagation inner loop.
    pub fn neighbor_list(&self, direction: Direction) -> &[ModuleIndex] {
        &self.neighbor_lists[direction.index()]
    }

    pub fn fits_connector(&self, direction: Direction, connector: i32) -> bool {
        self.face(direction).connector() == connector
    }
}

/// The full module vocabulary plus the derived initial health table.
#[derive(Debug)]
pub struct ModuleCatalog {
    modules: Vec<Module>,
    /// Flattened `[direction][module]` counts, `len() * 6` entries.
    initial_health: Vec<u16>,
}

impl ModuleCatalog {
    /// Build and validate a catalog.
    pub fn build(defs: &[ModuleDef]) -> Result<Self, CatalogError> {
        if defs.is_empty() {
            return Err(CatalogError::Empty);
        }
        validate_defs(defs)?;

        let mut modules = expand_rotations(defs);
        if modules.len() > u16::MAX as usize {
            return Err(CatalogError::TooManyModules(modules.len()));
        }
        let exclusions = resolve_exclusions(defs)?;
        let n = modules.len();

        for a in 0..n {
            for d in Direction::ALL {
                let mut set = ModuleSet::empty(n);
                for b in 0..n {
                    let pair = (modules[a].def_index, modules[b].def_index);
                    if modules_fit(&modules[a], d, &modules[b]) && !exclusions.contains(&pair) {
                        set.insert(ModuleIndex(b as u32));
                    }
                }
                modules[a].neighbor_lists[d.index()] = set.iter().collect();
                modules[a].possible_neighbors[d.index()] = set;
            }
        }

        let initial_health = compute_initial_health(&modules)?;
        Ok(Self {
            modules,
            initial_health,
        })
    }

    /// Parse a JSON array of `ModuleDef`s and build the catalog.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let defs: Vec<ModuleDef> = serde_json::from_str(json)?;
        Self::build(&defs)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module(&self, index: ModuleIndex) -> &Module {
        &self.modules[index.as_usize()]
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn find(&self, name: &str) -> Option<ModuleIndex> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.index)
    }

    /// The health table a slot starts with when every catalog module is still
    /// a candidate around it. Flattened as `[direction][module]`.
    pub fn initial_health(&self) -> &[u16] {
        &self.initial_health
    }

    pub fn full_set(&self) -> ModuleSet {
        ModuleSet::full(self.modules.len())
    }

    pub fn empty_set(&self) -> ModuleSet {
        ModuleSet::empty(self.modules.len())
    }
}

fn validate_defs(defs: &[ModuleDef]) -> Result<(), CatalogError> {
    let mut names = BTreeSet::new();
    for def in defs {
        if !def.probability.is_finite() || def.probability <= 0.0 {
            return Err(CatalogError::InvalidProbability {
                name: def.name.clone(),
                probability: def.probability,
            });
        }
        if !names.insert(def.name.as_str()) {
            return Err(CatalogError::DuplicateName(def.name.clone()));
        }
        for direction in Direction::ALL {
            let face = &def.faces[direction.index()];
            match (direction.is_horizontal(), face) {
                (true, FaceDetails::Horizontal { .. }) => {}
                (false, FaceDetails::Vertical { rotation, .. }) => {
                    if *rotation > 3 {
                        return Err(CatalogError::InvalidRotation {
                            name: def.name.clone(),
                            direction,
                            rotation: *rotation,
                        });
                    }
                }
                _ => {
                    return Err(CatalogError::FaceKindMismatch {
                        name: def.name.clone(),
                        direction,
                    });
                }
            }
        }
    }
    Ok(())
}

fn expand_rotations(defs: &[ModuleDef]) -> Vec<Module> {
    let mut modules = Vec::new();
    for (def_index, def) in defs.iter().enumerate() {
        let turns = if def.rotations { 4 } else { 1 };
        for rotation in 0..turns {
            let mut faces = def.faces;
            for direction in Direction::ALL {
                faces[direction.rotate(rotation).index()] =
                    def.faces[direction.index()].rotated(rotation);
            }
            let name = if rotation == 0 {
                def.name.clone()
            } else {
                format!("{}_r{}", def.name, rotation)
            };
            modules.push(Module {
                index: ModuleIndex(modules.len() as u32),
                name,
                prototype: def.name.clone(),
                rotation,
                faces,
                probability: def.probability,
                plogp: def.probability * def.probability.ln(),
                is_interior: def.is_interior,
                spawn: def.spawn,
                def_index,
                possible_neighbors: std::array::from_fn(|_| ModuleSet::empty(0)),
                neighbor_lists: Default::default(),
            });
        }
    }
    modules
}

/// Symmetric set of excluded `(definition, definition)` index pairs.
fn resolve_exclusions(defs: &[ModuleDef]) -> Result<BTreeSet<(usize, usize)>, CatalogError> {
    let by_name: BTreeMap<&str, usize> = defs
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();
    let mut pairs = BTreeSet::new();
    for (i, def) in defs.iter().enumerate() {
        for neighbor in &def.excluded_neighbors {
            let Some(&j) = by_name.get(neighbor.as_str()) else {
                return Err(CatalogError::UnknownNeighbor {
                    name: def.name.clone(),
                    neighbor: neighbor.clone(),
                });
            };
            pairs.insert((i, j));
            pairs.insert((j, i));
        }
    }
    Ok(pairs)
}

/// Whether `b` may sit in `direction` of `a`.
fn modules_fit(a: &Module, direction: Direction, b: &Module) -> bool {
    a.face(direction).fits(b.face(direction.opposite()))
}

fn compute_initial_health(modules: &[Module]) -> Result<Vec<u16>, CatalogError> {
    let n = modules.len();
    let mut health = vec![0u16; n * 6];
    for d in Direction::ALL {
        for module in modules {
            for neighbor in module.neighbor_list(d.opposite()) {
                health[d.index() * n + neighbor.as_usize()] += 1;
            }
        }
    }
    for d in Direction::ALL {
        for module in modules {
            if health[d.index() * n + module.index.as_usize()] == 0 {
                return Err(CatalogError::UnreachableModule {
                    module: module.name.clone(),
                    direction: d,
                });
            }
        }
    }
    Ok(health)
}

// ---------------------------------------------------------------------------
// Built-in demo catalog
// ---------------------------------------------------------------------------

/// Connector ids used by `demo_defs()`.
pub mod demo_connectors {
    pub const OPEN: i32 = 0;
    pub const BEDROCK: i32 = 1;
    pub const PILLAR: i32 = 2;
}

/// A small, always-satisfiable catalog with interior halls, glass partitions
/// that split rooms, bedrock/ground layers, and stacked pillars. Used by the
/// `generate` binary when no catalog file is given, and by tests and benches.
pub fn demo_defs() -> Vec<ModuleDef> {
    use crate::types::Direction::*;
    use demo_connectors::*;

    let glass = FaceDetails::horizontal(OPEN)
        .with_walkable(true)
        .with_occlusion_portal(true);

    vec![
        ModuleDef::uniform("air", OPEN).probability(4.0).hidden(),
        ModuleDef::uniform("bedrock", OPEN)
            .face(NegY, FaceDetails::vertical(BEDROCK))
            .face(PosY, FaceDetails::vertical(BEDROCK)),
        ModuleDef::uniform("ground", OPEN)
            .face(NegY, FaceDetails::vertical(BEDROCK))
            .face(PosY, FaceDetails::vertical(OPEN).with_walkable(true)),
        ModuleDef::uniform("hall", OPEN).probability(2.0).interior().walkable(),
        ModuleDef::uniform("glass_hall", OPEN)
            .interior()
            .walkable()
            .face(NegX, glass)
            .face(PosX, glass)
            .rotated_variants(),
        ModuleDef::uniform("pillar", OPEN)
            .probability(0.5)
            .face(NegY, FaceDetails::vertical(PILLAR))
            .face(PosY, FaceDetails::vertical(PILLAR)),
        ModuleDef::uniform("pillar_base", OPEN)
            .probability(0.5)
            .face(PosY, FaceDetails::vertical(PILLAR)),
        ModuleDef::uniform("pillar_cap", OPEN)
            .probability(0.5)
            .face(NegY, FaceDetails::vertical(PILLAR)),
    ]
}

pub fn demo_catalog() -> Result<ModuleCatalog, CatalogError> {
    ModuleCatalog::build(&demo_defs())
}
