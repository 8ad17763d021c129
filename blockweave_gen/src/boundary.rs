// Boundary constraints: per-layer connector rules applied before generation.
//
// A constraint names a layer (`relative_y`, negative counts down from the
// top), which faces it applies to, and whether those faces must carry
// (`Enforce`) or must not carry (`Exclude`) a connector. Typical uses are
// "the bottom layer's down faces are bedrock" and "the top layer's up faces
// are open sky".
//
// On an unbounded map the constraints are applied once to a 1 x height x 1
// tiling column, with full propagation (the column is its own horizontal
// neighbor, matching how fresh columns sit next to each other). The column
// then becomes the template every new slot is cloned from, so every column
// ever created honors the rules. A tiling map has all its slots already, so
// the constraints are applied to every column directly.

use crate::config::MapShape;
use crate::error::{GenerationError, Result};
use crate::map::CollapseMap;
use crate::module_set::ModuleSet;
use crate::types::{Coord, Direction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintFaces {
    Up,
    Down,
    /// All four horizontal faces.
    Horizontal,
    Face(Direction),
}

impl ConstraintFaces {
    pub fn directions(self) -> Vec<Direction> {
        match self {
            ConstraintFaces::Up => vec![Direction::PosY],
            ConstraintFaces::Down => vec![Direction::NegY],
            ConstraintFaces::Horizontal => Direction::HORIZONTAL.to_vec(),
            ConstraintFaces::Face(direction) => vec![direction],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    /// Keep only modules whose face has the connector.
    Enforce,
    /// Remove modules whose face has the connector.
    Exclude,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryConstraint {
    /// Layer index; negative values count from the top (`-1` is the top).
    pub relative_y: i32,
    pub faces: ConstraintFaces,
    pub mode: ConstraintMode,
    pub connector: i32,
}

impl BoundaryConstraint {
    /// The absolute layer for a map of `height`, or `None` if out of range.
    pub fn layer(&self, height: i32) -> Option<i32> {
        let y = if self.relative_y < 0 {
            self.relative_y + height
        } else {
            self.relative_y
        };
        (0..height).contains(&y).then_some(y)
    }
}

impl CollapseMap {
    /// Restrict the map's boundary layers. Must run before any slot of an
    /// unbounded map exists, or before anything on a tiling map collapses.
    pub fn apply_boundary_constraints(&mut self, constraints: &[BoundaryConstraint]) -> Result<()> {
        match *self.shape() {
            MapShape::Unbounded { height, .. } => {
                if self.slot_count() > 0 {
                    return Err(GenerationError::ConstraintsAfterGeneration);
                }
                let mut column = CollapseMap::with_shape(
                    Arc::clone(self.catalog()),
                    &Default::default(),
                    MapShape::Tiling {
                        size_x: 1,
                        height,
                        size_z: 1,
                    },
                );
                column.apply_boundary_constraints(constraints)?;
                let template = (0..height)
                    .map(|y| column.take_slot(Coord::new(0, y, 0)))
                    .collect::<Option<Vec<_>>>();
                self.template = template;
                debug!(constraints = constraints.len(), height, "built boundary template");
                Ok(())
            }
            MapShape::Tiling {
                size_x,
                height,
                size_z,
            } => {
                if self.has_generated() {
                    return Err(GenerationError::ConstraintsAfterGeneration);
                }
                for constraint in constraints {
                    let Some(y) = constraint.layer(height) else {
                        return Err(GenerationError::InvalidOperation(format!(
                            "constraint layer {} outside height {height}",
                            constraint.relative_y
                        )));
                    };
                    for x in 0..size_x {
                        for z in 0..size_z {
                            self.apply_to_slot(Coord::new(x, y, z), constraint)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn apply_to_slot(&mut self, pos: Coord, constraint: &BoundaryConstraint) -> Result<()> {
        let catalog = Arc::clone(self.catalog());
        let Some(candidates) = self.get_slot(pos).and_then(|s| s.candidates()) else {
            return Ok(());
        };
        let mut doomed = catalog.empty_set();
        for direction in constraint.faces.directions() {
            for module in candidates {
                let fits = catalog
                    .module(module)
                    .fits_connector(direction, constraint.connector);
                let remove = match constraint.mode {
                    ConstraintMode::Enforce => !fits,
                    ConstraintMode::Exclude => fits,
                };
                if remove {
                    doomed.insert(module);
                }
            }
        }
        self.remove_doomed(pos, &doomed)
    }

    fn remove_doomed(&mut self, pos: Coord, doomed: &ModuleSet) -> Result<()> {
        self.remove_and_propagate(pos, doomed)
            .map_err(|failed| GenerationError::Contradiction { slot: failed.slot })
    }
}
