//! Simulation configuration and validation
//!
//! Every section defaults independently so partial TOML files and
//! `QLC__SECTION__KEY` environment overrides compose cleanly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{QLCError, Result};
use crate::types::GridCoordinate;

/// Learning / decision algorithm driving the agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    QLearning,
    JointQLearning,
    Heuristic,
    MultiAgentHeuristic,
    FunctionApproximation,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::QLearning,
        Algorithm::JointQLearning,
        Algorithm::Heuristic,
        Algorithm::MultiAgentHeuristic,
        Algorithm::FunctionApproximation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::QLearning => "q_learning",
            Algorithm::JointQLearning => "joint_q_learning",
            Algorithm::Heuristic => "heuristic",
            Algorithm::MultiAgentHeuristic => "multi_agent_heuristic",
            Algorithm::FunctionApproximation => "function_approximation",
        }
    }

    /// Whether the algorithm steers toward registered goals without learning
    pub fn is_heuristic(self) -> bool {
        matches!(self, Algorithm::Heuristic | Algorithm::MultiAgentHeuristic)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = QLCError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "q_learning" | "qlearning" | "tabular" => Ok(Algorithm::QLearning),
            "joint_q_learning" | "jaql" => Ok(Algorithm::JointQLearning),
            "heuristic" | "rbm" => Ok(Algorithm::Heuristic),
            "multi_agent_heuristic" | "multi_rbm" | "multirbm" => {
                Ok(Algorithm::MultiAgentHeuristic)
            }
            "function_approximation" | "dqn" => Ok(Algorithm::FunctionApproximation),
            _ => Err(QLCError::Config(format!("unknown algorithm: {s}"))),
        }
    }
}

/// Progress rule used by the heuristic policy when filtering moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalFilter {
    /// Keep moves that strictly reduce distance to a tied-closest goal
    StrictlyCloser,
    /// Keep moves that do not increase distance to a tied-closest goal
    NotFarther,
}

/// How the replay trainer builds its regression target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Non-terminal samples overwrite every output unit with the bootstrap value
    AllActions,
    /// Only the taken action's unit is regressed (standard DQN)
    TakenAction,
}

/// Full configuration for a simulation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    #[validate(nested)]
    pub grid: GridConfig,
    #[validate(nested)]
    pub training: TrainingConfig,
    #[validate(nested)]
    pub agent: AgentConfig,
    pub rewards: RewardConfig,
    pub heuristic: HeuristicConfig,
    #[validate(nested)]
    pub approximation: ApproximationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GridConfig {
    #[validate(range(min = 1))]
    pub rows: usize,
    #[validate(range(min = 1))]
    pub cols: usize,
    pub goals: Vec<GridCoordinate>,
    pub obstacles: Vec<GridCoordinate>,
    /// Fixed spawn cell per agent; random spawnable cells when empty
    pub spawns: Vec<GridCoordinate>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 8,
            cols: 8,
            goals: vec![GridCoordinate::new(7, 7)],
            obstacles: Vec::new(),
            spawns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TrainingConfig {
    pub algorithm: Algorithm,
    #[validate(range(min = 1))]
    pub agents: usize,
    #[validate(range(min = 1))]
    pub episodes: usize,
    #[validate(range(min = 1))]
    pub max_iterations: usize,
    pub multithreaded: bool,
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::QLearning,
            agents: 1,
            episodes: 500,
            max_iterations: 100,
            multithreaded: false,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AgentConfig {
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub epsilon: f32,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub epsilon_decay: f32,
    pub epsilon_min: f32,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub learning_rate: f32,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub discount: f32,
    pub backtracking: bool,
    /// Per-agent learning rate overrides, indexed by agent id
    pub learning_rates: Vec<f32>,
}

impl AgentConfig {
    /// Learning rate for the agent with the given id
    pub fn learning_rate_for(&self, agent: usize) -> f32 {
        self.learning_rates
            .get(agent)
            .copied()
            .unwrap_or(self.learning_rate)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            epsilon_decay: 0.99,
            epsilon_min: 0.01,
            learning_rate: 0.99,
            discount: 0.99,
            backtracking: true,
            learning_rates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub goal: f32,
    pub non_goal: f32,
    pub collision_penalty: f32,
    /// Cost per unit of Manhattan distance moved
    pub step_cost: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            goal: 100.0,
            non_goal: -0.1,
            collision_penalty: -10.0,
            step_cost: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub goal_filter: GoalFilter,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            goal_filter: GoalFilter::StrictlyCloser,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApproximationConfig {
    pub buffer_capacity: usize,
    /// Minimum buffer fill before replay training starts
    pub train_start: usize,
    pub batch_size: usize,
    #[validate(range(exclusive_min = 0.0))]
    pub learning_rate: f32,
    /// Steps between target network syncs
    #[validate(range(min = 1))]
    pub target_update_interval: usize,
    pub target_mode: TargetMode,
}

impl Default for ApproximationConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 2000,
            train_start: 64,
            batch_size: 32,
            learning_rate: 0.001,
            target_update_interval: 50,
            target_mode: TargetMode::AllActions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn check_rate(name: &str, value: f32) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(QLCError::Config(format!(
            "{name} must be in (0, 1], got {value}"
        )))
    }
}

impl SimulationConfig {
    /// Reject configurations that could only fail deep inside a run
    pub fn validate(&self) -> Result<()> {
        // Field ranges first, then the rules that span fields
        Validate::validate(self).map_err(|e| QLCError::Config(e.to_string()))?;

        let grid = &self.grid;
        let training = &self.training;

        let in_bounds = |c: &GridCoordinate| c.row < grid.rows && c.col < grid.cols;
        for (kind, cells) in [
            ("goal", &grid.goals),
            ("obstacle", &grid.obstacles),
            ("spawn", &grid.spawns),
        ] {
            if let Some(bad) = cells.iter().find(|c| !in_bounds(c)) {
                return Err(QLCError::Config(format!(
                    "{kind} {bad} is outside the {}x{} grid",
                    grid.rows, grid.cols
                )));
            }
        }
        if let Some(clash) = grid.goals.iter().find(|g| grid.obstacles.contains(g)) {
            return Err(QLCError::Config(format!(
                "{clash} cannot be both a goal and an obstacle"
            )));
        }
        if let Some(bad) = grid
            .spawns
            .iter()
            .find(|s| grid.goals.contains(s) || grid.obstacles.contains(s))
        {
            return Err(QLCError::Config(format!(
                "spawn {bad} sits on a goal or obstacle"
            )));
        }
        // Occupancy is one flag per cell, so agents may not share a spawn
        if let Some((i, dup)) = grid
            .spawns
            .iter()
            .enumerate()
            .find(|(i, s)| grid.spawns[..*i].contains(*s))
        {
            return Err(QLCError::Config(format!(
                "spawn {dup} is listed more than once (entry {i})"
            )));
        }
        if !grid.spawns.is_empty() && grid.spawns.len() < training.agents {
            return Err(QLCError::Config(format!(
                "{} spawns configured for {} agents",
                grid.spawns.len(),
                training.agents
            )));
        }

        let free_cells = (grid.rows * grid.cols)
            .saturating_sub(grid.goals.len() + grid.obstacles.len());
        if grid.spawns.is_empty() && free_cells < training.agents {
            return Err(QLCError::Config(format!(
                "{} agents do not fit in {free_cells} free cells",
                training.agents
            )));
        }

        if training.algorithm.is_heuristic() && grid.goals.is_empty() {
            return Err(QLCError::EmptyGoalSet);
        }
        if training.algorithm == Algorithm::JointQLearning {
            if training.agents != 2 {
                return Err(QLCError::Config(format!(
                    "joint Q-learning supports exactly 2 agents, got {}",
                    training.agents
                )));
            }
            if training.multithreaded {
                return Err(QLCError::Config(
                    "joint Q-learning steps agents jointly and cannot run multithreaded".into(),
                ));
            }
        }

        let agent = &self.agent;
        for rate in &agent.learning_rates {
            check_rate("learning_rates entry", *rate)?;
        }
        if !(0.0..=agent.epsilon).contains(&agent.epsilon_min) {
            return Err(QLCError::Config(format!(
                "epsilon_min must be in [0, epsilon], got {}",
                agent.epsilon_min
            )));
        }

        if training.algorithm == Algorithm::FunctionApproximation {
            let approx = &self.approximation;
            if approx.batch_size == 0 || approx.batch_size > approx.buffer_capacity {
                return Err(QLCError::Config(format!(
                    "batch_size must be in 1..={}, got {}",
                    approx.buffer_capacity, approx.batch_size
                )));
            }
        }

        Ok(())
    }
}
