//! Policy strategy trait and shared action-selection helpers

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use qlc_core::{Action, Algorithm, GridCoordinate, GridEnvironment, SimulationConfig};

use crate::agent::AgentState;
use crate::approx::ApproximationPolicy;
use crate::experience::Transition;
use crate::heuristic::{HeuristicPolicy, MultiAgentHeuristicPolicy};
use crate::q_table::{QTable, TabularPolicy};

/// Where an agent is within the current episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepContext {
    pub iteration: usize,
    pub max_iterations: usize,
}

impl StepContext {
    pub fn new(iteration: usize, max_iterations: usize) -> Self {
        Self {
            iteration,
            max_iterations,
        }
    }

    /// Whether this is the final iteration before the cap
    pub fn is_last(&self) -> bool {
        self.iteration + 1 >= self.max_iterations
    }
}

/// Trait for per-agent decision policies
///
/// Selected once per run from the configured [`Algorithm`]; the environment
/// is passed explicitly on every call.
pub trait Policy: Send {
    /// Policy name
    fn name(&self) -> &'static str;

    /// Choose the next action for `agent`
    fn select_action(
        &mut self,
        env: &GridEnvironment,
        agent: &AgentState,
        ctx: StepContext,
        rng: &mut StdRng,
    ) -> Result<Action>;

    /// Learn from a completed step
    fn learn(
        &mut self,
        env: &GridEnvironment,
        agent: &AgentState,
        transition: &Transition,
        ctx: StepContext,
        rng: &mut StdRng,
    ) -> Result<()>;

    /// Forget everything learned, resizing to the environment
    fn reset(&mut self, env: &GridEnvironment, rng: &mut StdRng) -> Result<()>;

    /// Tabular values, when the policy keeps any
    fn q_table(&self) -> Option<&QTable> {
        None
    }

    /// Get policy parameters as JSON
    fn params(&self) -> serde_json::Value;
}

/// Build the policy for one agent of an independently acting population
pub fn build_policy(
    config: &SimulationConfig,
    env: &GridEnvironment,
    rng: &mut StdRng,
) -> Result<Box<dyn Policy>> {
    let policy: Box<dyn Policy> = match config.training.algorithm {
        Algorithm::QLearning => Box::new(TabularPolicy::new(env.rows(), env.cols())),
        Algorithm::Heuristic => Box::new(HeuristicPolicy::new(config.heuristic.goal_filter)),
        Algorithm::MultiAgentHeuristic => {
            Box::new(MultiAgentHeuristicPolicy::new(config.heuristic.goal_filter))
        }
        Algorithm::FunctionApproximation => Box::new(ApproximationPolicy::new(
            config.approximation.clone(),
            env,
            rng,
        )),
        Algorithm::JointQLearning => {
            bail!("joint Q-learning drives both agents together and has no per-agent policy")
        }
    };
    Ok(policy)
}

/// Drop the first action that would return to `previous`, if others remain
pub fn suppress_backtracking(
    actions: &mut Vec<Action>,
    state: GridCoordinate,
    previous: GridCoordinate,
    rows: usize,
    cols: usize,
) {
    if actions.len() <= 1 {
        return;
    }
    if let Some(idx) = actions
        .iter()
        .position(|&a| state.offset(a, rows, cols) == Some(previous))
    {
        actions.remove(idx);
    }
}

/// Uniform pick among the actions whose value equals the maximum
///
/// `value` is only queried for the candidate actions.
pub fn greedy_with_ties<F>(candidates: &[Action], value: F, rng: &mut StdRng) -> Action
where
    F: Fn(Action) -> f32,
{
    let best = candidates
        .iter()
        .map(|&a| value(a))
        .fold(f32::NEG_INFINITY, f32::max);
    let tied: Vec<Action> = candidates
        .iter()
        .copied()
        .filter(|&a| value(a) == best)
        .collect();
    tied.choose(rng).copied().unwrap_or(Action::None)
}

/// Epsilon-greedy choice over the allowed actions of `agent`
///
/// Backtracking suppression applies to both the exploring and the
/// exploiting branch, before the maximum is taken.
pub fn epsilon_greedy<F>(
    env: &GridEnvironment,
    agent: &AgentState,
    value: F,
    rng: &mut StdRng,
) -> Action
where
    F: Fn(Action) -> f32,
{
    let mut allowed = env.allowed_actions(agent.position);
    if agent.backtracking {
        suppress_backtracking(
            &mut allowed,
            agent.position,
            agent.previous,
            env.rows(),
            env.cols(),
        );
    }

    if rng.gen::<f32>() < agent.epsilon {
        allowed.choose(rng).copied().unwrap_or(Action::None)
    } else {
        greedy_with_ties(&allowed, value, rng)
    }
}
