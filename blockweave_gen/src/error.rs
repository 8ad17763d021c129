// Error types for catalog construction, configuration, and generation.
//
// Contradictions inside the collapse loop are not errors at this level: a
// collapse attempt returns `CollapseFailed` as an ordinary value and the loop
// backtracks. Only when backtracking is impossible does it escalate to
// `GenerationError::HistoryExhausted`.

use crate::types::{Coord, Direction};

/// A slot ran out of candidates during propagation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollapseFailed {
    pub slot: Coord,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog has no modules")]
    Empty,

    #[error("module {name:?} has invalid probability {probability}")]
    InvalidProbability { name: String, probability: f64 },

    #[error("catalog expands to {0} modules (limit 65535)")]
    TooManyModules(usize),

    #[error("duplicate module name {0:?}")]
    DuplicateName(String),

    #[error("module {name:?} face {direction} has the wrong face kind")]
    FaceKindMismatch { name: String, direction: Direction },

    #[error("module {name:?} face {direction} has rotation {rotation} (expected 0-3)")]
    InvalidRotation {
        name: String,
        direction: Direction,
        rotation: u8,
    },

    #[error("module {name:?} excludes unknown neighbor {neighbor:?}")]
    UnknownNeighbor { name: String, neighbor: String },

    #[error("module {module:?} cannot be reached from direction {direction}")]
    UnreachableModule { module: String, direction: Direction },

    #[error("invalid catalog json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Backtracking needed more history than is available.
    #[error("collapse failed at {slot:?} and the undo history is exhausted")]
    HistoryExhausted { slot: Option<Coord> },

    /// A constraint applied outside the collapse loop emptied a slot.
    #[error("constraint left slot {slot} without candidates")]
    Contradiction { slot: Coord },

    #[error("generation cancelled")]
    Cancelled,

    /// Caller contract violation (collapsing a collapsed slot, choosing a
    /// module that is not a candidate, constraining outside the map).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("boundary constraints must be applied before any slot is created")]
    ConstraintsAfterGeneration,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<ConfigError> for GenerationError {
    fn from(err: ConfigError) -> Self {
        GenerationError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;
