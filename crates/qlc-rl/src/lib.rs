//! QLC RL - Learning and decision engines for the gridworld
//!
//! This crate provides the per-agent policies (tabular Q-learning, the
//! goal-seeking heuristics and replay-trained function approximation), the
//! two-agent joint-action learner, and the trainer that drives episodes.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::float_cmp)]
#![allow(clippy::similar_names)]

pub mod agent;
pub mod algorithm;
pub mod approx;
pub mod experience;
pub mod heuristic;
pub mod joint;
pub mod q_table;
pub mod telemetry;
pub mod trainer;

pub use agent::{Agent, AgentState, StepRecord};
pub use algorithm::{build_policy, Policy, StepContext};
pub use approx::{ApproximationPolicy, Mlp, ReplayOutcome};
pub use experience::{ReplayBuffer, Transition};
pub use heuristic::{HeuristicPolicy, MultiAgentHeuristicPolicy};
pub use joint::{JointAction, JointEpisode, JointQLearner, JointQTable, JointState, JointStep};
pub use q_table::{QTable, TabularPolicy};
pub use telemetry::{AgentSummary, EpisodeReport, TrainingReport};
pub use trainer::Trainer;
