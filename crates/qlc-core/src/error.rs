//! Error types for QLC

use thiserror::Error;

use crate::types::{Action, GridCoordinate};

/// Main error type for QLC
#[derive(Error, Debug)]
pub enum QLCError {
    #[error("Invalid action: {action} is not allowed from {state}")]
    InvalidAction {
        action: Action,
        state: GridCoordinate,
    },

    #[error("Out of bounds: {coord} is outside a {rows}x{cols} grid")]
    OutOfBounds {
        coord: GridCoordinate,
        rows: usize,
        cols: usize,
    },

    #[error("No goals registered in the environment")]
    EmptyGoalSet,

    #[error("No spawnable cell left in the environment")]
    NoSpawnPoint,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for QLC operations
pub type Result<T> = std::result::Result<T, QLCError>;
