//! Trainer - runs episodes and collects telemetry
//!
//! Sequential mode advances every active agent once per outer iteration,
//! round-robin. Parallel mode moves each agent into its own blocking worker
//! for a whole episode; workers share the environment through an `Arc` and
//! rely on its per-cell atomics for occupancy and heat counts.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use qlc_core::{Algorithm, GridCoordinate, GridEnvironment, QLCError, RunId, SimulationConfig};

use crate::agent::{Agent, AgentState};
use crate::algorithm::{build_policy, StepContext};
use crate::joint::JointQLearner;
use crate::telemetry::{render_policy, AgentSummary, EpisodeReport, TrainingReport};

/// Who makes the decisions during an episode
enum Learners {
    Independent(Vec<Agent>),
    Joint {
        learner: JointQLearner,
        agents: Box<[AgentState; 2]>,
    },
}

/// Per-agent tallies for one episode
#[derive(Debug, Clone, Copy, Default)]
struct AgentEpisode {
    reward_sum: f32,
    iterations: usize,
    collisions: usize,
    goals_reached: usize,
}

/// Drives training runs over one environment
pub struct Trainer {
    config: SimulationConfig,
    env: Arc<GridEnvironment>,
    learners: Learners,
    rng: StdRng,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    /// Validate the configuration and build its environment and agents
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let env = GridEnvironment::from_config(&config)?;
        Self::with_environment(config, env)
    }

    /// Use an already edited environment; grid dimensions must match the configuration
    pub fn with_environment(config: SimulationConfig, env: GridEnvironment) -> Result<Self> {
        config.validate()?;
        if env.state_dim() != (config.grid.rows, config.grid.cols) {
            bail!(QLCError::Config(format!(
                "environment is {}x{} but the configuration asks for {}x{}",
                env.rows(),
                env.cols(),
                config.grid.rows,
                config.grid.cols
            )));
        }
        if config.training.algorithm.is_heuristic() && env.goals().is_empty() {
            bail!(QLCError::EmptyGoalSet);
        }

        let seed = config.training.seed;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let learners = if config.training.algorithm == Algorithm::JointQLearning {
            Learners::Joint {
                learner: JointQLearner::new(&config.agent, seed),
                agents: Box::new([
                    AgentState::new(0, &config.agent),
                    AgentState::new(1, &config.agent),
                ]),
            }
        } else {
            let mut agents = Vec::with_capacity(config.training.agents);
            for id in 0..config.training.agents {
                let policy = build_policy(&config, &env, &mut rng)?;
                agents.push(Agent::new(id, &config.agent, policy, seed));
            }
            Learners::Independent(agents)
        };

        Ok(Self {
            config,
            env: Arc::new(env),
            learners,
            rng,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn environment(&self) -> &GridEnvironment {
        &self.env
    }

    /// Flag checked at every iteration boundary; set it to end the run early
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        info!("Stop requested");
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Independently acting agents, empty in joint mode
    pub fn agents(&self) -> &[Agent] {
        match &self.learners {
            Learners::Independent(agents) => agents,
            Learners::Joint { .. } => &[],
        }
    }

    /// Current state of every agent
    pub fn agent_states(&self) -> Vec<AgentState> {
        match &self.learners {
            Learners::Independent(agents) => agents.iter().map(|a| a.state().clone()).collect(),
            Learners::Joint { agents, .. } => agents.to_vec(),
        }
    }

    pub fn joint_learner(&self) -> Option<&JointQLearner> {
        match &self.learners {
            Learners::Joint { learner, .. } => Some(learner),
            Learners::Independent(_) => None,
        }
    }

    pub fn joint_learner_mut(&mut self) -> Option<&mut JointQLearner> {
        match &mut self.learners {
            Learners::Joint { learner, .. } => Some(learner),
            Learners::Independent(_) => None,
        }
    }

    /// Forget all learning and clear the heat map
    pub fn reset(&mut self) -> Result<()> {
        self.stop.store(false, Ordering::Relaxed);
        self.env.clear_heat_map();
        self.env.clear_agent_flags();
        match &mut self.learners {
            Learners::Independent(agents) => {
                for agent in agents.iter_mut() {
                    agent.reset(&self.env)?;
                }
            }
            Learners::Joint { learner, agents } => {
                learner.reset();
                for agent in agents.iter_mut() {
                    agent.epsilon = self.config.agent.epsilon;
                    agent.done = false;
                }
            }
        }
        Ok(())
    }

    /// Spawn cells for every agent: configured ones, else distinct random free cells
    fn spawn_cells(&mut self, count: usize) -> Result<Vec<GridCoordinate>> {
        if !self.config.grid.spawns.is_empty() {
            return Ok(self.config.grid.spawns.iter().take(count).copied().collect());
        }
        let free = self.env.spawnable_points();
        if free.len() < count {
            bail!(QLCError::NoSpawnPoint);
        }
        Ok(free.choose_multiple(&mut self.rng, count).copied().collect())
    }

    /// Clear occupancy and put every agent on its spawn cell
    fn spawn_all(&mut self) -> Result<()> {
        self.env.clear_agent_flags();
        let count = match &self.learners {
            Learners::Independent(agents) => agents.len(),
            Learners::Joint { .. } => 2,
        };
        let cells = self.spawn_cells(count)?;
        let env = &self.env;
        match &mut self.learners {
            Learners::Independent(agents) => {
                for (agent, cell) in agents.iter_mut().zip(cells) {
                    agent.spawn(env, cell);
                }
            }
            Learners::Joint { agents, .. } => {
                for (agent, cell) in agents.iter_mut().zip(cells) {
                    agent.spawn(cell);
                    env.set_agent_flags(cell, cell);
                }
            }
        }
        Ok(())
    }

    /// Train for the configured number of episodes
    pub async fn run(&mut self) -> Result<TrainingReport> {
        let run_id = RunId::new();
        let algorithm = self.config.training.algorithm;
        let episodes = self.config.training.episodes;
        let started_at = Utc::now();

        info!(
            %run_id,
            %algorithm,
            agents = self.config.training.agents,
            episodes,
            multithreaded = self.config.training.multithreaded,
            "Training run started"
        );

        self.reset()?;
        let progress_every = (episodes / 10).max(1);
        let mut reports = Vec::with_capacity(episodes);

        for episode in 0..episodes {
            if self.stop.load(Ordering::Relaxed) {
                info!(%run_id, episode, "Stop requested, ending run");
                break;
            }
            let report = self.run_episode(episode).await?;
            debug!(
                episode,
                reward = report.reward_sum,
                iterations = report.iterations,
                collisions = report.collisions,
                epsilon = report.mean_epsilon,
                "Episode finished"
            );
            if (episode + 1) % progress_every == 0 {
                info!(
                    %run_id,
                    episode = episode + 1,
                    episodes,
                    reward = report.reward_sum,
                    iterations = report.iterations,
                    "Training progress"
                );
            }
            reports.push(report);
        }

        let stopped = self.stop.load(Ordering::Relaxed);
        let report = TrainingReport {
            run_id,
            algorithm,
            started_at,
            finished_at: Utc::now(),
            stopped,
            agents: self.summaries(),
            heat_map: self.env.heat_map().snapshot(),
            episodes: reports,
        };

        info!(
            %run_id,
            episodes = report.episode_count(),
            goals = report.total_goals(),
            mean_reward = report.mean_reward(),
            stopped,
            "Training run finished"
        );
        Ok(report)
    }

    /// Run one episode, then decay exploration
    pub async fn run_episode(&mut self, episode: usize) -> Result<EpisodeReport> {
        self.spawn_all()?;

        let joint = matches!(self.learners, Learners::Joint { .. });
        let mut report = if joint {
            self.joint_episode()?
        } else if self.config.training.multithreaded {
            self.parallel_episode().await?
        } else {
            self.sequential_episode()?
        };
        report.episode = episode;

        match &mut self.learners {
            Learners::Independent(agents) => agents.iter_mut().for_each(Agent::decay),
            Learners::Joint { learner, agents } => {
                learner.decay();
                for agent in agents.iter_mut() {
                    agent.epsilon = learner.epsilon();
                }
            }
        }
        Ok(report)
    }

    fn mean_epsilon(agents: &[Agent]) -> f32 {
        if agents.is_empty() {
            return 0.0;
        }
        agents.iter().map(Agent::epsilon).sum::<f32>() / agents.len() as f32
    }

    fn sequential_episode(&mut self) -> Result<EpisodeReport> {
        let Learners::Independent(agents) = &mut self.learners else {
            bail!("sequential stepping needs independent agents");
        };
        let max_iterations = self.config.training.max_iterations;
        let mut report = EpisodeReport {
            mean_epsilon: Self::mean_epsilon(agents),
            ..EpisodeReport::default()
        };

        for iteration in 0..max_iterations {
            if self.stop.load(Ordering::Relaxed) || agents.iter().all(Agent::is_done) {
                break;
            }
            let ctx = StepContext::new(iteration, max_iterations);
            for agent in agents.iter_mut().filter(|a| !a.is_done()) {
                let record = agent.act(&self.env, ctx)?;
                report.reward_sum += record.transition.reward;
                report.collisions += usize::from(record.collision);
                report.goals_reached += usize::from(record.transition.done);
            }
            report.iterations += 1;
        }
        Ok(report)
    }

    async fn parallel_episode(&mut self) -> Result<EpisodeReport> {
        let Learners::Independent(agents) = &mut self.learners else {
            bail!("parallel stepping needs independent agents");
        };
        let max_iterations = self.config.training.max_iterations;
        let mean_epsilon = Self::mean_epsilon(agents);

        let workers = std::mem::take(agents).into_iter().map(|mut agent| {
            let env = Arc::clone(&self.env);
            let stop = Arc::clone(&self.stop);
            tokio::task::spawn_blocking(move || {
                // A panicking policy must not take its agent down with it
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_agent_episode(&mut agent, &env, &stop, max_iterations)
                }))
                .unwrap_or_else(|_| {
                    Err(anyhow!("agent {} panicked during its episode", agent.id()))
                });
                (agent, result)
            })
        });

        let mut report = EpisodeReport {
            mean_epsilon,
            ..EpisodeReport::default()
        };
        // Drain every worker so surviving agents return before any error is raised
        let mut first_error = None;
        for joined in join_all(workers).await {
            let (agent, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    first_error.get_or_insert(anyhow!("agent worker failed: {e}"));
                    continue;
                }
            };
            agents.push(agent);
            match result {
                Ok(tally) => fold_tally(&mut report, tally),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        agents.sort_by_key(Agent::id);

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn joint_episode(&mut self) -> Result<EpisodeReport> {
        let Learners::Joint { learner, agents } = &mut self.learners else {
            bail!("joint stepping needs the joint learner");
        };
        let mean_epsilon = learner.epsilon();
        let episode = learner
            .run_episode(
                &self.env,
                agents,
                self.config.training.max_iterations,
                &self.stop,
                true,
            )
            .context("joint episode failed")?;
        if episode.rollbacks > 0 {
            debug!(rollbacks = episode.rollbacks, "Joint episode rolled back stalled steps");
        }

        Ok(EpisodeReport {
            episode: 0,
            reward_sum: episode.reward_sum,
            iterations: episode.iterations,
            collisions: episode.collisions,
            goals_reached: episode.goals_reached,
            mean_epsilon,
            rollbacks: episode.rollbacks,
        })
    }

    fn summaries(&self) -> Vec<AgentSummary> {
        match &self.learners {
            Learners::Independent(agents) => agents
                .iter()
                .map(|agent| AgentSummary {
                    id: agent.id(),
                    epsilon: agent.epsilon(),
                    beta: agent.beta(),
                    greedy_policy: agent
                        .q_table()
                        .map(|table| render_policy(&table.greedy_policy(&self.env))),
                })
                .collect(),
            Learners::Joint { agents, .. } => agents
                .iter()
                .map(|agent| AgentSummary {
                    id: agent.id,
                    epsilon: agent.epsilon,
                    beta: agent.beta,
                    greedy_policy: None,
                })
                .collect(),
        }
    }
}

/// Add one worker's tallies to the episode report
///
/// Iterations take the maximum since workers run side by side.
fn fold_tally(report: &mut EpisodeReport, tally: AgentEpisode) {
    report.reward_sum += tally.reward_sum;
    report.iterations = report.iterations.max(tally.iterations);
    report.collisions += tally.collisions;
    report.goals_reached += tally.goals_reached;
}

/// Whole-episode loop for one agent on its own worker
fn run_agent_episode(
    agent: &mut Agent,
    env: &GridEnvironment,
    stop: &AtomicBool,
    max_iterations: usize,
) -> Result<AgentEpisode> {
    let mut tally = AgentEpisode::default();
    for iteration in 0..max_iterations {
        if stop.load(Ordering::Relaxed) || agent.is_done() {
            break;
        }
        let record = agent.act(env, StepContext::new(iteration, max_iterations))?;
        tally.reward_sum += record.transition.reward;
        tally.iterations += 1;
        tally.collisions += usize::from(record.collision);
        tally.goals_reached += usize::from(record.transition.done);
    }
    Ok(tally)
}
