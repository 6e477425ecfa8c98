//! QLC Core - Gridworld environment, configuration and shared types
//!
//! This crate holds everything the learners and the CLI agree on: grid
//! coordinates, the action set, tile flags, the reward table, the visit
//! heat map and the environment that ties them together.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod environment;
pub mod error;
pub mod heatmap;
pub mod reward;
pub mod tile;
pub mod types;

pub use config::{
    AgentConfig, Algorithm, ApproximationConfig, GoalFilter, GridConfig, HeuristicConfig,
    LoggingConfig, RewardConfig, SimulationConfig, TargetMode, TrainingConfig,
};
pub use environment::{GridEnvironment, StepOutcome};
pub use error::{QLCError, Result};
pub use heatmap::HeatMap;
pub use reward::RewardTable;
pub use tile::TileFlags;
pub use types::*;
