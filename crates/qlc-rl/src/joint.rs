//! Joint-action Q-learning for exactly two agents
//!
//! The value table is keyed by the pair of agent positions and then by the
//! pair of chosen actions. Both levels grow with the square of their factor
//! (cells² joint states, 25 joint actions) and exploitation scores every
//! combination of both agents' allowed actions, so the learner is limited to
//! two agents by construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use qlc_core::{Action, AgentConfig, GridCoordinate, GridEnvironment};

use crate::agent::AgentState;

pub type JointState = (GridCoordinate, GridCoordinate);
pub type JointAction = (Action, Action);

/// Two-level value table: joint state -> joint action -> value
#[derive(Debug, Clone, Default)]
pub struct JointQTable {
    values: HashMap<JointState, HashMap<JointAction, f32>>,
}

impl JointQTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of joint states seen so far
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn get(&self, state: JointState, action: JointAction) -> f32 {
        self.values
            .get(&state)
            .and_then(|actions| actions.get(&action))
            .copied()
            .unwrap_or(0.0)
    }

    /// Action table of a joint state, populated with every joint action on first touch
    pub fn entry(&mut self, state: JointState) -> &mut HashMap<JointAction, f32> {
        self.values.entry(state).or_insert_with(|| {
            let mut actions = HashMap::with_capacity(Action::COUNT * Action::COUNT);
            for a in Action::ALL {
                for b in Action::ALL {
                    actions.insert((a, b), 0.0);
                }
            }
            actions
        })
    }

    /// Maximum over the whole joint-action table of a state
    pub fn max_value(&self, state: JointState) -> f32 {
        self.values
            .get(&state)
            .and_then(|actions| actions.values().copied().reduce(f32::max))
            .unwrap_or(0.0)
    }

    /// TD(0) update on the joint table, returning the new value
    pub fn update(
        &mut self,
        state: JointState,
        action: JointAction,
        next: JointState,
        reward: f32,
        beta: f32,
        gamma: f32,
    ) -> f32 {
        let bootstrap = self.max_value(next);
        let value = self.entry(state).entry(action).or_insert(0.0);
        *value += beta * (reward + gamma * bootstrap - *value);
        *value
    }
}

/// Result of advancing both agents once
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointStep {
    pub next: [GridCoordinate; 2],
    pub reward: f32,
    /// True if any agent reached a goal on this step
    pub done: bool,
    pub reached: [bool; 2],
    pub collision: bool,
}

/// Aggregate outcome of one joint episode
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointEpisode {
    pub reward_sum: f32,
    pub iterations: usize,
    pub collisions: usize,
    pub goals_reached: usize,
    pub rollbacks: usize,
}

/// Epsilon-greedy learner over the joint state/action space of two agents
#[derive(Debug, Clone)]
pub struct JointQLearner {
    table: JointQTable,
    epsilon: f32,
    initial_epsilon: f32,
    epsilon_decay: f32,
    epsilon_min: f32,
    beta: f32,
    gamma: f32,
    rng: StdRng,
}

impl JointQLearner {
    pub fn new(config: &AgentConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            table: JointQTable::new(),
            epsilon: config.epsilon,
            initial_epsilon: config.epsilon,
            epsilon_decay: config.epsilon_decay,
            epsilon_min: config.epsilon_min,
            beta: config.learning_rate,
            gamma: config.discount,
            rng,
        }
    }

    pub fn table(&self) -> &JointQTable {
        &self.table
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon;
    }

    pub fn decay(&mut self) {
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_min);
    }

    pub fn reset(&mut self) {
        self.table.clear();
        self.epsilon = self.initial_epsilon;
    }

    /// A finished agent stays on its goal
    fn allowed_for(env: &GridEnvironment, agent: &AgentState) -> Vec<Action> {
        if agent.done {
            vec![Action::None]
        } else {
            env.allowed_actions(agent.position)
        }
    }

    /// Epsilon-greedy joint action for the current joint state
    pub fn select_joint_action(
        &mut self,
        env: &GridEnvironment,
        agents: &[AgentState; 2],
    ) -> JointAction {
        let explore = self.rng.gen::<f32>() < self.epsilon;
        self.choose(env, agents, explore)
    }

    /// Best joint action with ties broken uniformly
    pub fn greedy_joint_action(
        &mut self,
        env: &GridEnvironment,
        agents: &[AgentState; 2],
    ) -> JointAction {
        self.choose(env, agents, false)
    }

    fn choose(
        &mut self,
        env: &GridEnvironment,
        agents: &[AgentState; 2],
        explore: bool,
    ) -> JointAction {
        let first = Self::allowed_for(env, &agents[0]);
        let second = Self::allowed_for(env, &agents[1]);

        if explore {
            let a = first.choose(&mut self.rng).copied().unwrap_or(Action::None);
            let b = second.choose(&mut self.rng).copied().unwrap_or(Action::None);
            return (a, b);
        }

        let state = (agents[0].position, agents[1].position);
        let mut best = f32::NEG_INFINITY;
        let mut tied = Vec::new();
        for &a in &first {
            for &b in &second {
                let value = self.table.get(state, (a, b));
                if value > best {
                    best = value;
                    tied.clear();
                }
                if value == best {
                    tied.push((a, b));
                }
            }
        }
        tied.choose(&mut self.rng)
            .copied()
            .unwrap_or((Action::None, Action::None))
    }

    /// Advance both agents from one action pair without committing the move
    ///
    /// Nothing is written to the environment; heat is counted on commit, so
    /// rolled-back attempts leave no visits behind.
    ///
    /// The reward sums each active agent's step reward; landing both agents on
    /// the same non-goal cell costs one extra collision penalty.
    pub fn step_joint(
        env: &GridEnvironment,
        agents: &[AgentState; 2],
        action: JointAction,
    ) -> Result<JointStep> {
        let actions = [action.0, action.1];
        let mut next = [agents[0].position, agents[1].position];
        let mut reached = [false; 2];
        let mut reward = 0.0;
        let mut collision = false;

        for (i, agent) in agents.iter().enumerate() {
            if agent.done {
                continue;
            }
            let outcome = env.evaluate(actions[i], agent.position)?;
            next[i] = outcome.next_state;
            reached[i] = outcome.done;
            reward += outcome.reward;
            collision |= outcome.collision;
        }

        if !agents[0].done
            && !agents[1].done
            && next[0] == next[1]
            && !env.is_goal(next[0])
        {
            collision = true;
            reward += env.reward_config().collision_penalty;
        }

        Ok(JointStep {
            next,
            reward,
            done: reached.iter().any(|r| *r),
            reached,
            collision,
        })
    }

    fn is_stall(agents: &[AgentState; 2], step: &JointStep) -> bool {
        if step.done {
            return false;
        }
        let stayed = agents
            .iter()
            .zip(step.next)
            .all(|(agent, next)| agent.done || agent.position == next);
        stayed || step.collision
    }

    fn commit(env: &GridEnvironment, agents: &mut [AgentState; 2], step: &JointStep) {
        for (agent, next) in agents.iter().zip(step.next) {
            env.set_agent_flags(agent.position, next);
        }
        // re-mark in case one agent vacated the other's destination last
        for next in step.next {
            env.set_agent_flags(next, next);
        }
        for (i, agent) in agents.iter_mut().enumerate() {
            if !agent.done {
                env.heat_map().increment(agent.position);
                agent.advance(step.next[i], step.reached[i]);
            }
        }
    }

    /// Select, step and commit one joint move, retrying once on a stall
    ///
    /// Returns the committed step and whether a rollback happened.
    pub fn play_step(
        &mut self,
        env: &GridEnvironment,
        agents: &mut [AgentState; 2],
        learn: bool,
    ) -> Result<(JointStep, bool)> {
        let state = (agents[0].position, agents[1].position);
        let action = if learn {
            self.select_joint_action(env, agents)
        } else {
            self.greedy_joint_action(env, agents)
        };
        let mut step = Self::step_joint(env, agents, action)?;
        if learn {
            self.learn(state, action, &step);
        }

        let rolled_back = Self::is_stall(agents, &step);
        if rolled_back {
            debug!(?state, ?action, "Joint step stalled, retrying");
            let retry = if learn {
                self.select_joint_action(env, agents)
            } else {
                self.greedy_joint_action(env, agents)
            };
            step = Self::step_joint(env, agents, retry)?;
            if learn {
                self.learn(state, retry, &step);
            }
        }

        Self::commit(env, agents, &step);
        Ok((step, rolled_back))
    }

    fn learn(&mut self, state: JointState, action: JointAction, step: &JointStep) {
        let next = (step.next[0], step.next[1]);
        self.table
            .update(state, action, next, step.reward, self.beta, self.gamma);
    }

    /// Run one episode until both agents are done, the cap is hit or a stop is requested
    pub fn run_episode(
        &mut self,
        env: &GridEnvironment,
        agents: &mut [AgentState; 2],
        max_iterations: usize,
        stop: &AtomicBool,
        learn: bool,
    ) -> Result<JointEpisode> {
        let mut episode = JointEpisode::default();

        for _ in 0..max_iterations {
            if stop.load(Ordering::Relaxed) || agents.iter().all(|a| a.done) {
                break;
            }
            let (step, rolled_back) = self.play_step(env, agents, learn)?;
            episode.iterations += 1;
            episode.reward_sum += step.reward;
            episode.collisions += usize::from(step.collision);
            episode.goals_reached += step.reached.iter().filter(|r| **r).count();
            episode.rollbacks += usize::from(rolled_back);
        }

        Ok(episode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlc_core::RewardConfig;

    fn agents(a: (usize, usize), b: (usize, usize)) -> [AgentState; 2] {
        let config = AgentConfig::default();
        let mut first = AgentState::new(0, &config);
        let mut second = AgentState::new(1, &config);
        first.spawn(a.into());
        second.spawn(b.into());
        [first, second]
    }

    #[test]
    fn test_entry_populates_every_joint_action() {
        let mut table = JointQTable::new();
        let state = (GridCoordinate::new(0, 0), GridCoordinate::new(1, 1));
        assert_eq!(table.entry(state).len(), 25);
        assert_eq!(table.len(), 1);
        assert_eq!(table.max_value(state), 0.0);
    }

    #[test]
    fn test_joint_update() {
        let mut table = JointQTable::new();
        let state = (GridCoordinate::new(0, 0), GridCoordinate::new(0, 2));
        let next = (GridCoordinate::new(0, 1), GridCoordinate::new(1, 2));
        let value = table.update(state, (Action::Right, Action::Down), next, 100.0, 0.99, 0.99);
        assert!((value - 99.0).abs() < 1e-4);
        assert_eq!(table.get(state, (Action::Right, Action::Down)), value);
        assert_eq!(table.get(state, (Action::Up, Action::Down)), 0.0);
    }

    #[test]
    fn test_greedy_joint_action_uses_table() {
        let env = GridEnvironment::new(3, 3, RewardConfig::default()).unwrap();
        let agents = agents((0, 0), (2, 2));
        let mut learner = JointQLearner::new(&AgentConfig::default(), Some(1));
        let state = (agents[0].position, agents[1].position);
        learner.table.entry(state).insert((Action::Down, Action::Up), 5.0);

        assert_eq!(
            learner.greedy_joint_action(&env, &agents),
            (Action::Down, Action::Up)
        );
    }

    #[test]
    fn test_step_joint_rewards_and_collisions() {
        let mut env = GridEnvironment::new(1, 3, RewardConfig::default()).unwrap();
        env.add_goal(0, 2).unwrap();
        let agents = agents((0, 0), (0, 1));
        for agent in &agents {
            env.set_agent_flags(agent.position, agent.position);
        }

        let step =
            JointQLearner::step_joint(&env, &agents, (Action::None, Action::Right)).unwrap();
        assert!(step.done);
        assert_eq!(step.reached, [false, true]);
        assert!(!step.collision);
        assert!((step.reward - 99.9).abs() < 1e-4);

        let step =
            JointQLearner::step_joint(&env, &agents, (Action::Right, Action::None)).unwrap();
        assert!(step.collision);
        assert!(!step.done);
    }

    #[test]
    fn test_same_cell_arrival_is_a_collision() {
        let env = GridEnvironment::new(1, 3, RewardConfig::default()).unwrap();
        let agents = agents((0, 0), (0, 2));
        let step =
            JointQLearner::step_joint(&env, &agents, (Action::Right, Action::Left)).unwrap();
        assert!(step.collision);
        assert!((step.reward - (-10.2)).abs() < 1e-4);
    }

    #[test]
    fn test_stall_triggers_single_retry() {
        let env = GridEnvironment::new(1, 1, RewardConfig::default()).unwrap();
        let mut agents = agents((0, 0), (0, 0));
        let mut learner = JointQLearner::new(&AgentConfig::default(), Some(2));

        // Only None is possible on a 1x1 grid, so every step stalls
        let (step, rolled_back) = learner.play_step(&env, &mut agents, true).unwrap();
        assert!(rolled_back);
        assert_eq!(step.next, [GridCoordinate::new(0, 0); 2]);

        // Only the committed retry counts, once per agent
        assert_eq!(env.heat_map().get(GridCoordinate::new(0, 0)), 2);
    }

    #[test]
    fn test_done_agent_stays_put() {
        let mut env = GridEnvironment::new(2, 2, RewardConfig::default()).unwrap();
        env.add_goal(0, 1).unwrap();
        let mut agents = agents((0, 1), (1, 0));
        agents[0].done = true;

        let step =
            JointQLearner::step_joint(&env, &agents, (Action::None, Action::Up)).unwrap();
        assert_eq!(step.next[0], GridCoordinate::new(0, 1));
        assert_eq!(step.reached, [false, false]);
        assert_eq!(env.heat_map().get(GridCoordinate::new(0, 1)), 0);

        let mut learner = JointQLearner::new(&AgentConfig::default(), Some(3));
        for _ in 0..10 {
            let (a, _) = learner.select_joint_action(&env, &agents);
            assert_eq!(a, Action::None);
        }
    }

    #[test]
    fn test_decay_and_reset() {
        let mut learner = JointQLearner::new(&AgentConfig::default(), Some(0));
        learner.decay();
        assert!((learner.epsilon() - 0.99).abs() < 1e-6);
        learner
            .table
            .entry((GridCoordinate::new(0, 0), GridCoordinate::new(0, 0)));
        learner.reset();
        assert_eq!(learner.epsilon(), 1.0);
        assert!(learner.table().is_empty());
    }
}
