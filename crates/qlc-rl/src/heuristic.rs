//! Rule-based goal seeking, single- and multi-agent
//!
//! Neither policy learns. Both filter the allowed actions by distance
//! progress and pick uniformly among what survives, falling back to the full
//! allowed set whenever the filters leave nothing.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use qlc_core::{Action, GoalFilter, GridCoordinate, GridEnvironment};

use crate::agent::AgentState;
use crate::algorithm::{suppress_backtracking, Policy, StepContext};
use crate::experience::Transition;

/// Actions that make progress toward one of the tied-closest goals
///
/// Fails with `EmptyGoalSet` when no goal is registered.
pub fn goal_candidates(
    env: &GridEnvironment,
    agent: &AgentState,
    filter: GoalFilter,
) -> Result<Vec<Action>> {
    let state = agent.position;
    let allowed = env.allowed_actions(state);
    let (best, closest) = env.closest_goals(state)?;

    let progresses = |next: GridCoordinate| {
        closest.iter().any(|goal| {
            let dist = goal.manhattan(&next);
            match filter {
                GoalFilter::StrictlyCloser => dist < best,
                GoalFilter::NotFarther => dist <= best,
            }
        })
    };

    let candidates = filter_moves(env, state, &allowed, progresses);
    Ok(finish(env, agent, allowed, candidates))
}

/// Actions that do not increase the distance to `other`
fn agent_candidates(
    env: &GridEnvironment,
    agent: &AgentState,
    other: GridCoordinate,
) -> Vec<Action> {
    let state = agent.position;
    let allowed = env.allowed_actions(state);
    let current = state.manhattan(&other);
    let candidates = filter_moves(env, state, &allowed, |next| next.manhattan(&other) <= current);
    finish(env, agent, allowed, candidates)
}

fn filter_moves<F>(
    env: &GridEnvironment,
    state: GridCoordinate,
    allowed: &[Action],
    keep: F,
) -> Vec<Action>
where
    F: Fn(GridCoordinate) -> bool,
{
    allowed
        .iter()
        .copied()
        .filter(|&a| {
            state
                .offset(a, env.rows(), env.cols())
                .is_some_and(&keep)
        })
        .collect()
}

/// Backtracking suppression, then the never-strand fallback
fn finish(
    env: &GridEnvironment,
    agent: &AgentState,
    allowed: Vec<Action>,
    mut candidates: Vec<Action>,
) -> Vec<Action> {
    if agent.backtracking {
        suppress_backtracking(
            &mut candidates,
            agent.position,
            agent.previous,
            env.rows(),
            env.cols(),
        );
    }
    if candidates.is_empty() {
        allowed
    } else {
        candidates
    }
}

fn pick(candidates: &[Action], rng: &mut StdRng) -> Action {
    candidates.choose(rng).copied().unwrap_or(Action::None)
}

/// Greedy goal-seeking heuristic ("RBM")
#[derive(Debug, Clone)]
pub struct HeuristicPolicy {
    filter: GoalFilter,
}

impl HeuristicPolicy {
    pub fn new(filter: GoalFilter) -> Self {
        Self { filter }
    }
}

impl Policy for HeuristicPolicy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn select_action(
        &mut self,
        env: &GridEnvironment,
        agent: &AgentState,
        _ctx: StepContext,
        rng: &mut StdRng,
    ) -> Result<Action> {
        let candidates = goal_candidates(env, agent, self.filter)?;
        Ok(pick(&candidates, rng))
    }

    fn learn(
        &mut self,
        _env: &GridEnvironment,
        _agent: &AgentState,
        _transition: &Transition,
        _ctx: StepContext,
        _rng: &mut StdRng,
    ) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self, _env: &GridEnvironment, _rng: &mut StdRng) -> Result<()> {
        Ok(())
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "goal_filter": self.filter })
    }
}

/// Heuristic that congregates with other agents while the iteration budget allows
#[derive(Debug, Clone)]
pub struct MultiAgentHeuristicPolicy {
    filter: GoalFilter,
}

impl MultiAgentHeuristicPolicy {
    pub fn new(filter: GoalFilter) -> Self {
        Self { filter }
    }

    /// Whether the agent has to head for the goal now
    ///
    /// True when `needed >= max_iterations - 1 - iteration`.
    pub fn must_seek_goal(needed: usize, ctx: StepContext) -> bool {
        let budget = ctx.max_iterations as i64 - 1 - ctx.iteration as i64;
        needed as i64 >= budget
    }
}

impl Policy for MultiAgentHeuristicPolicy {
    fn name(&self) -> &'static str {
        "multi_agent_heuristic"
    }

    fn select_action(
        &mut self,
        env: &GridEnvironment,
        agent: &AgentState,
        ctx: StepContext,
        rng: &mut StdRng,
    ) -> Result<Action> {
        let (needed, _) = env.closest_goals(agent.position)?;

        let candidates = if Self::must_seek_goal(needed, ctx) {
            goal_candidates(env, agent, self.filter)?
        } else {
            match env.closest_agent(agent.position) {
                Some(other) => agent_candidates(env, agent, other),
                None => goal_candidates(env, agent, self.filter)?,
            }
        };
        Ok(pick(&candidates, rng))
    }

    fn learn(
        &mut self,
        _env: &GridEnvironment,
        _agent: &AgentState,
        _transition: &Transition,
        _ctx: StepContext,
        _rng: &mut StdRng,
    ) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self, _env: &GridEnvironment, _rng: &mut StdRng) -> Result<()> {
        Ok(())
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "goal_filter": self.filter })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlc_core::{AgentConfig, QLCError, RewardConfig};
    use rand::SeedableRng;

    fn agent_at(row: usize, col: usize) -> AgentState {
        let mut state = AgentState::new(0, &AgentConfig::default());
        state.spawn(GridCoordinate::new(row, col));
        state
    }

    #[test]
    fn test_heuristic_moves_toward_goal() {
        let mut env = GridEnvironment::new(5, 5, RewardConfig::default()).unwrap();
        env.add_goal(4, 4).unwrap();
        let mut policy = HeuristicPolicy::new(GoalFilter::StrictlyCloser);
        let mut rng = StdRng::seed_from_u64(9);
        let agent = agent_at(0, 0);

        for _ in 0..50 {
            let action = policy
                .select_action(&env, &agent, StepContext::new(0, 10), &mut rng)
                .unwrap();
            assert!(matches!(action, Action::Right | Action::Down));
        }
    }

    #[test]
    fn test_heuristic_never_moves_away_from_every_goal() {
        let mut env = GridEnvironment::new(5, 5, RewardConfig::default()).unwrap();
        env.add_goal(0, 4).unwrap();
        env.add_goal(4, 0).unwrap();
        let mut policy = HeuristicPolicy::new(GoalFilter::NotFarther);
        let mut rng = StdRng::seed_from_u64(5);

        for row in 0..5 {
            for col in 0..5 {
                let agent = agent_at(row, col);
                if env.is_goal(agent.position) {
                    continue;
                }
                let (best, closest) = env.closest_goals(agent.position).unwrap();
                let action = policy
                    .select_action(&env, &agent, StepContext::new(0, 10), &mut rng)
                    .unwrap();
                let next = agent.position.offset(action, 5, 5).unwrap();
                assert!(closest.iter().any(|g| g.manhattan(&next) <= best));
            }
        }
    }

    #[test]
    fn test_heuristic_falls_back_when_walled_in() {
        let mut env = GridEnvironment::new(3, 3, RewardConfig::default()).unwrap();
        env.add_goal(0, 2).unwrap();
        env.add_obstacle(0, 1).unwrap();
        env.add_obstacle(1, 0).unwrap();

        let agent = agent_at(0, 0);
        let candidates = goal_candidates(&env, &agent, GoalFilter::StrictlyCloser).unwrap();
        assert_eq!(candidates, vec![Action::None]);
    }

    #[test]
    fn test_heuristic_requires_goals() {
        let env = GridEnvironment::new(3, 3, RewardConfig::default()).unwrap();
        let mut policy = HeuristicPolicy::new(GoalFilter::StrictlyCloser);
        let mut rng = StdRng::seed_from_u64(0);
        let err = policy
            .select_action(&env, &agent_at(1, 1), StepContext::new(0, 10), &mut rng)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QLCError>(),
            Some(QLCError::EmptyGoalSet)
        ));
    }

    #[test]
    fn test_must_seek_goal_boundary() {
        // budget = 10 - 1 - 5 = 4
        assert!(MultiAgentHeuristicPolicy::must_seek_goal(4, StepContext::new(5, 10)));
        assert!(!MultiAgentHeuristicPolicy::must_seek_goal(3, StepContext::new(5, 10)));
        // past the cap the budget goes negative
        assert!(MultiAgentHeuristicPolicy::must_seek_goal(0, StepContext::new(12, 10)));
    }

    #[test]
    fn test_multi_agent_heuristic_congregates() {
        let mut env = GridEnvironment::new(5, 5, RewardConfig::default()).unwrap();
        env.add_goal(4, 4).unwrap();
        let other = GridCoordinate::new(0, 4);
        env.set_agent_flags(other, other);

        let agent = agent_at(0, 0);
        env.set_agent_flags(agent.position, agent.position);

        let mut policy = MultiAgentHeuristicPolicy::new(GoalFilter::StrictlyCloser);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..30 {
            let action = policy
                .select_action(&env, &agent, StepContext::new(0, 100), &mut rng)
                .unwrap();
            assert_eq!(action, Action::Right);
        }

        // Out of budget: goal seeking takes over
        for _ in 0..30 {
            let action = policy
                .select_action(&env, &agent, StepContext::new(95, 100), &mut rng)
                .unwrap();
            assert!(matches!(action, Action::Right | Action::Down));
        }
    }
}
