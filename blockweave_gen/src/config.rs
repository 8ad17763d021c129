// Data-driven generation configuration.
//
// Every tunable the engine reads lives in `GenerationConfig`, loaded from JSON
// or built from `Default`. The collapse loop, room graph, and chunk driver
// take their parameters from here rather than from constants, so a caller
// can retune backtracking or the undo window without recompiling.
//
// Missing JSON fields fall back to their defaults (`#[serde(default)]` on
// every struct), so a config file only needs to name what it changes.
//
// See also: `map.rs` (reads `history_size`, `backtrack`, `entropy_metric`,
// `shape`), `boundary.rs` (`boundary_constraints`), `rooms.rs`
// (`visibility`), `worker.rs` (`driver`).
//
// **Determinism.** `seed` is the only source of randomness. Two runs with the
// same config, catalog, and request sequence produce identical maps.

use crate::boundary::BoundaryConstraint;
use crate::error::ConfigError;
use crate::slot::EntropyMetric;
use crate::types::Coord;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Map shape
// ---------------------------------------------------------------------------

/// Spatial domain of a collapse map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapShape {
    /// Unbounded in X and Z, `height` layers tall. Slots are created lazily.
    /// With `range_limit`, positions farther than that (Euclidean) from
    /// `range_center` never get a slot.
    Unbounded {
        height: i32,
        #[serde(default)]
        range_limit: Option<f64>,
        #[serde(default)]
        range_center: Coord,
    },
    /// A finite box that wraps around in X and Z. Every slot exists from
    /// construction.
    Tiling {
        size_x: i32,
        height: i32,
        size_z: i32,
    },
}

impl MapShape {
    pub fn height(&self) -> i32 {
        match *self {
            MapShape::Unbounded { height, .. } | MapShape::Tiling { height, .. } => height,
        }
    }
}

impl Default for MapShape {
    fn default() -> Self {
        MapShape::Unbounded {
            height: 8,
            range_limit: None,
            range_center: Coord::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Backtracking
// ---------------------------------------------------------------------------

/// How the backtrack amount grows on consecutive failures without progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// `amount += n`
    Add(u32),
    /// `amount *= n`
    Multiply(u32),
}

impl Escalation {
    pub fn apply(self, amount: u32) -> u32 {
        match self {
            Escalation::Add(n) => amount.saturating_add(n),
            Escalation::Multiply(n) => amount.saturating_mul(n),
        }
    }
}

/// Backtracking tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktrackPolicy {
    /// Steps undone by the first failure after new progress.
    pub initial: u32,
    /// Growth applied on each further failure that made no progress.
    pub escalation: Escalation,
    /// How many times the history may be unwound completely without any
    /// collapse surviving before the loop gives up.
    pub max_full_unwinds: u32,
}

impl Default for BacktrackPolicy {
    fn default() -> Self {
        Self {
            initial: 2,
            escalation: Escalation::Add(4),
            max_full_unwinds: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Visibility and chunk driver
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// World units per slot edge. Slot `c` is centered at `c * block_size`.
    pub block_size: f32,
    /// Exterior slots are grouped into cubes this many slots on a side.
    pub chunk_size: i32,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            block_size: 2.0,
            chunk_size: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Generation chunk footprint in X and Z. Chunks span the full height.
    pub chunk_size: i32,
    /// Chunks within this many chunk widths of the focus are generated.
    pub radius: i32,
    /// Collapses per `collapse_step` call when the driver interleaves with a
    /// consumer. `0` runs each chunk to completion in one step.
    pub batch_size: usize,
    /// Finished chunks a background worker may queue before it pauses.
    pub event_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8,
            radius: 2,
            batch_size: 0,
            event_capacity: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub seed: u64,
    /// Collapses kept for undo. Older collapses become permanent.
    pub history_size: usize,
    pub backtrack: BacktrackPolicy,
    pub entropy_metric: EntropyMetric,
    pub shape: MapShape,
    /// Progress callbacks fire every this many committed collapses.
    pub progress_interval: usize,
    pub boundary_constraints: Vec<BoundaryConstraint>,
    pub visibility: VisibilityConfig,
    pub driver: DriverConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            history_size: 3000,
            backtrack: BacktrackPolicy::default(),
            entropy_metric: EntropyMetric::default(),
            shape: MapShape::default(),
            progress_interval: 20,
            boundary_constraints: Vec::new(),
            visibility: VisibilityConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl GenerationConfig {
    /// Parse and validate a JSON config. Absent fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GenerationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.history_size == 0 {
            return invalid("history_size must be at least 1".into());
        }
        if self.backtrack.initial == 0 {
            return invalid("backtrack.initial must be at least 1".into());
        }
        if let Escalation::Multiply(n) = self.backtrack.escalation {
            if n < 2 {
                return invalid(format!("multiplicative escalation {n} never grows"));
            }
        }
        match self.shape {
            MapShape::Unbounded {
                height,
                range_limit,
                ..
            } => {
                if height <= 0 {
                    return invalid(format!("map height {height} must be positive"));
                }
                if let Some(limit) = range_limit {
                    if !limit.is_finite() || limit < 0.0 {
                        return invalid(format!("range_limit {limit} is not a distance"));
                    }
                }
            }
            MapShape::Tiling {
                size_x,
                height,
                size_z,
            } => {
                if size_x <= 0 || height <= 0 || size_z <= 0 {
                    return invalid(format!(
                        "tiling size {size_x}x{height}x{size_z} must be positive"
                    ));
                }
            }
        }
        let block_size = self.visibility.block_size;
        if block_size.is_nan() || block_size <= 0.0 {
            return invalid("visibility.block_size must be positive".into());
        }
        if self.visibility.chunk_size <= 0 {
            return invalid("visibility.chunk_size must be positive".into());
        }
        if self.driver.chunk_size <= 0 || self.driver.radius < 0 {
            return invalid("driver chunk_size must be positive and radius non-negative".into());
        }
        if self.driver.event_capacity == 0 {
            return invalid("driver.event_capacity must be at least 1".into());
        }
        if self.progress_interval == 0 {
            return invalid("progress_interval must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{ConstraintFaces, ConstraintMode};

    #[test]
    fn defaults_are_valid() {
        let config = GenerationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.history_size, 3000);
        assert_eq!(config.backtrack.initial, 2);
        assert_eq!(config.backtrack.escalation, Escalation::Add(4));
        assert_eq!(config.entropy_metric, EntropyMetric::CandidateCount);
        assert_eq!(config.driver.event_capacity, 16);
    }

    #[test]
    fn empty_json_gives_defaults() {
        let config = GenerationConfig::from_json("{}").unwrap();
        assert_eq!(config, GenerationConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let json = r#"{
            "seed": 99,
            "backtrack": { "escalation": { "multiply": 2 } },
            "entropy_metric": "shannon",
            "shape": { "kind": "tiling", "size_x": 4, "height": 3, "size_z": 5 },
            "boundary_constraints": [
                { "relative_y": -1, "faces": "up", "mode": "enforce", "connector": 0 }
            ]
        }"#;
        let config = GenerationConfig::from_json(json).unwrap();
        assert_eq!(config.seed, 99);
        assert_eq!(config.backtrack.escalation, Escalation::Multiply(2));
        assert_eq!(config.backtrack.initial, 2);
        assert_eq!(config.entropy_metric, EntropyMetric::Shannon);
        assert_eq!(
            config.shape,
            MapShape::Tiling {
                size_x: 4,
                height: 3,
                size_z: 5
            }
        );
        let constraint = &config.boundary_constraints[0];
        assert_eq!(constraint.relative_y, -1);
        assert_eq!(constraint.faces, ConstraintFaces::Up);
        assert_eq!(constraint.mode, ConstraintMode::Enforce);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let mut config = GenerationConfig::default();
        config.seed = 7;
        config.shape = MapShape::Unbounded {
            height: 5,
            range_limit: Some(40.0),
            range_center: Coord::new(1, 0, -1),
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored = GenerationConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn invalid_values_rejected() {
        let bad = [
            r#"{ "history_size": 0 }"#,
            r#"{ "backtrack": { "escalation": { "multiply": 1 } } }"#,
            r#"{ "shape": { "kind": "unbounded", "height": 0 } }"#,
            r#"{ "shape": { "kind": "tiling", "size_x": 0, "height": 2, "size_z": 2 } }"#,
            r#"{ "visibility": { "block_size": 0.0 } }"#,
            r#"{ "progress_interval": 0 }"#,
            r#"{ "driver": { "event_capacity": 0 } }"#,
        ];
        for json in bad {
            assert!(
                matches!(GenerationConfig::from_json(json), Err(ConfigError::Invalid(_))),
                "{json} should be rejected"
            );
        }
        assert!(matches!(
            GenerationConfig::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn escalation_grows() {
        assert_eq!(Escalation::Add(4).apply(2), 6);
        assert_eq!(Escalation::Multiply(3).apply(2), 6);
        assert_eq!(Escalation::Multiply(2).apply(u32::MAX), u32::MAX);
    }
}
