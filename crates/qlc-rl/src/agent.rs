//! Agents - per-agent learning state and the policy driving it

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use qlc_core::{Action, AgentConfig, GridCoordinate, GridEnvironment};

use crate::algorithm::{Policy, StepContext};
use crate::experience::Transition;
use crate::q_table::QTable;

/// Position and hyper-parameters of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: usize,
    pub position: GridCoordinate,
    pub previous: GridCoordinate,
    /// Exploration rate
    pub epsilon: f32,
    pub epsilon_decay: f32,
    pub epsilon_min: f32,
    /// Learning rate
    pub beta: f32,
    /// Discount factor
    pub gamma: f32,
    pub backtracking: bool,
    pub done: bool,
}

impl AgentState {
    pub fn new(id: usize, config: &AgentConfig) -> Self {
        Self {
            id,
            position: GridCoordinate::default(),
            previous: GridCoordinate::default(),
            epsilon: config.epsilon,
            epsilon_decay: config.epsilon_decay,
            epsilon_min: config.epsilon_min,
            beta: config.learning_rate_for(id),
            gamma: config.discount,
            backtracking: config.backtracking,
            done: false,
        }
    }

    /// Place the agent at the start of an episode
    pub fn spawn(&mut self, cell: GridCoordinate) {
        self.position = cell;
        self.previous = cell;
        self.done = false;
    }

    pub fn advance(&mut self, next: GridCoordinate, done: bool) {
        self.previous = self.position;
        self.position = next;
        self.done = done;
    }

    /// Multiplicative epsilon decay, floored at `epsilon_min`
    pub fn decay(&mut self) {
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_min);
    }
}

/// Outcome of one agent step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRecord {
    pub transition: Transition,
    pub collision: bool,
}

/// An agent: its state, its policy and its own random stream
pub struct Agent {
    state: AgentState,
    initial_epsilon: f32,
    policy: Box<dyn Policy>,
    rng: StdRng,
}

impl Agent {
    /// Create an agent; a `seed` makes its decisions reproducible
    pub fn new(
        id: usize,
        config: &AgentConfig,
        policy: Box<dyn Policy>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };
        Self {
            state: AgentState::new(id, config),
            initial_epsilon: config.epsilon,
            policy,
            rng,
        }
    }

    pub fn id(&self) -> usize {
        self.state.id
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn position(&self) -> GridCoordinate {
        self.state.position
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    pub fn epsilon(&self) -> f32 {
        self.state.epsilon
    }

    pub fn beta(&self) -> f32 {
        self.state.beta
    }

    pub fn policy(&self) -> &dyn Policy {
        self.policy.as_ref()
    }

    pub fn q_table(&self) -> Option<&QTable> {
        self.policy.q_table()
    }

    /// Spawn at `cell` and mark it occupied
    pub fn spawn(&mut self, env: &GridEnvironment, cell: GridCoordinate) {
        self.state.spawn(cell);
        env.set_agent_flags(cell, cell);
    }

    /// Select, step, learn and move; the whole of one agent turn
    pub fn act(&mut self, env: &GridEnvironment, ctx: StepContext) -> Result<StepRecord> {
        let state = self.state.position;
        let action: Action = self
            .policy
            .select_action(env, &self.state, ctx, &mut self.rng)?;
        let outcome = env.step(action, state)?;

        let transition = Transition::new(
            state,
            action,
            outcome.next_state,
            outcome.reward,
            outcome.done,
        );
        self.policy
            .learn(env, &self.state, &transition, ctx, &mut self.rng)?;

        env.set_agent_flags(state, outcome.next_state);
        self.state.advance(outcome.next_state, outcome.done);

        Ok(StepRecord {
            transition,
            collision: outcome.collision,
        })
    }

    pub fn decay(&mut self) {
        self.state.decay();
    }

    /// Start a fresh training run: policy relearned from scratch, epsilon restored
    pub fn reset(&mut self, env: &GridEnvironment) -> Result<()> {
        self.state.epsilon = self.initial_epsilon;
        self.state.done = false;
        self.policy.reset(env, &mut self.rng)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("state", &self.state)
            .field("policy", &self.policy.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::q_table::TabularPolicy;
    use qlc_core::RewardConfig;

    #[test]
    fn test_decay_is_floored() {
        let mut state = AgentState::new(0, &AgentConfig::default());
        for _ in 0..500 {
            let before = state.epsilon;
            state.decay();
            assert!(state.epsilon <= before);
        }
        let expected = 0.99f32.powi(500).max(0.01);
        assert!((state.epsilon - expected).abs() < 1e-6);
        assert_eq!(state.epsilon, 0.01);
    }

    #[test]
    fn test_per_agent_learning_rate() {
        let config = AgentConfig {
            learning_rates: vec![0.5, 0.25],
            ..AgentConfig::default()
        };
        assert_eq!(AgentState::new(1, &config).beta, 0.25);
        assert_eq!(AgentState::new(2, &config).beta, 0.99);
    }

    #[test]
    fn test_act_moves_and_updates_flags() {
        let env = GridEnvironment::new(1, 2, RewardConfig::default()).unwrap();
        let config = AgentConfig {
            backtracking: false,
            ..AgentConfig::default()
        };
        let mut agent = Agent::new(0, &config, Box::new(TabularPolicy::new(1, 2)), Some(3));
        let start = GridCoordinate::new(0, 0);
        agent.spawn(&env, start);
        assert!(env.is_occupied(start));

        let record = agent.act(&env, StepContext::new(0, 10)).unwrap();
        assert_eq!(record.transition.state, start);
        assert_eq!(agent.position(), record.transition.next_state);
        assert_eq!(agent.state().previous, start);
        assert!(env.is_occupied(agent.position()));
        assert_eq!(env.heat_map().get(start), 1);
    }

    #[test]
    fn test_reset_restores_epsilon() {
        let env = GridEnvironment::new(2, 2, RewardConfig::default()).unwrap();
        let config = AgentConfig::default();
        let mut agent = Agent::new(0, &config, Box::new(TabularPolicy::new(2, 2)), Some(1));
        agent.decay();
        agent.decay();
        assert!(agent.epsilon() < 1.0);

        agent.reset(&env).unwrap();
        assert_eq!(agent.epsilon(), 1.0);
    }
}
