//! Integration tests for the training engine
//!
//! These tests run whole training runs and check what the agents learned.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::float_cmp)]

use std::sync::atomic::AtomicBool;

use qlc_core::{Algorithm, GridCoordinate, QLCError, SimulationConfig};
use qlc_rl::{AgentState, Trainer};

/// 3x3 grid, goal in the bottom-right corner
fn corner_config(algorithm: Algorithm) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.grid.rows = 3;
    config.grid.cols = 3;
    config.grid.goals = vec![GridCoordinate::new(2, 2)];
    config.grid.spawns = vec![GridCoordinate::new(0, 0)];
    config.training.algorithm = algorithm;
    config.training.episodes = 200;
    config.training.max_iterations = 50;
    config.training.seed = Some(7);
    config.agent.epsilon_decay = 0.99;
    config
}

#[tokio::test]
async fn test_tabular_q_learning_converges_on_corner_goal() {
    let mut trainer = Trainer::new(corner_config(Algorithm::QLearning)).unwrap();
    let report = trainer.run().await.unwrap();
    assert_eq!(report.episode_count(), 200);

    let env = trainer.environment();
    let table = trainer.agents()[0].q_table().unwrap();

    let policy = table.greedy_policy(env);
    for (row, glyphs) in policy.iter().enumerate() {
        for (col, glyph) in glyphs.iter().enumerate() {
            if (row, col) == (2, 2) {
                assert_eq!(*glyph, 'g');
            } else {
                assert!(
                    matches!(glyph, 'd' | 'r'),
                    "cell ({row}, {col}) has greedy action {glyph}"
                );
            }
        }
    }

    // Follow the greedy policy from the spawn cell
    let mut state = GridCoordinate::new(0, 0);
    let mut steps = 0;
    while !env.is_goal(state) && steps < 10 {
        let action = table.best_action(state);
        state = env.step(action, state).unwrap().next_state;
        steps += 1;
    }
    assert_eq!(state, GridCoordinate::new(2, 2));
    assert_eq!(steps, 4);

    let summary = &report.agents[0];
    assert_eq!(summary.greedy_policy.as_ref().unwrap()[2], "rrg");
}

#[tokio::test]
async fn test_tabular_episodes_get_shorter() {
    let mut trainer = Trainer::new(corner_config(Algorithm::QLearning)).unwrap();
    let report = trainer.run().await.unwrap();

    let early: f32 = report.episodes[..20].iter().map(|e| e.iterations as f32).sum::<f32>() / 20.0;
    let late = report.recent_mean_iterations(20);
    assert!(late < early, "late {late} should be below early {early}");
    assert!(report.episodes.iter().all(|e| e.iterations <= 50));
}

#[tokio::test]
async fn test_joint_q_learning_reaches_goal_without_rollback() {
    let mut config = corner_config(Algorithm::JointQLearning);
    config.training.agents = 2;
    config.training.episodes = 500;
    config.grid.spawns = vec![GridCoordinate::new(0, 0), GridCoordinate::new(0, 2)];

    let mut trainer = Trainer::new(config).unwrap();
    let report = trainer.run().await.unwrap();
    assert_eq!(report.episode_count(), 500);
    assert!(report.total_goals() > 0);

    let env = trainer.environment().clone();
    env.clear_agent_flags();
    let agent_config = trainer.config().agent.clone();
    let learner = trainer.joint_learner_mut().unwrap();

    let mut agents = [AgentState::new(0, &agent_config), AgentState::new(1, &agent_config)];
    agents[0].spawn(GridCoordinate::new(0, 0));
    agents[1].spawn(GridCoordinate::new(0, 2));
    for agent in &agents {
        env.set_agent_flags(agent.position, agent.position);
    }

    let goal = GridCoordinate::new(2, 2);
    let (first, second) = learner.greedy_joint_action(&env, &agents);
    let next_first = agents[0].position.offset(first, 3, 3).unwrap();
    let next_second = agents[1].position.offset(second, 3, 3).unwrap();
    assert!(next_first.manhattan(&goal) < agents[0].position.manhattan(&goal));
    assert!(next_second.manhattan(&goal) < agents[1].position.manhattan(&goal));

    let rollout = learner
        .run_episode(&env, &mut agents, 50, &AtomicBool::new(false), false)
        .unwrap();
    assert_eq!(rollout.rollbacks, 0);
    assert_eq!(rollout.goals_reached, 2);
    assert!(agents.iter().all(|a| a.done && a.position == goal));
}

#[tokio::test]
async fn test_heuristic_agents_always_reach_goal() {
    let mut config = SimulationConfig::default();
    config.grid.rows = 5;
    config.grid.cols = 5;
    config.grid.goals = vec![GridCoordinate::new(4, 4)];
    config.training.algorithm = Algorithm::Heuristic;
    config.training.agents = 3;
    config.training.episodes = 20;
    config.training.max_iterations = 20;
    config.training.seed = Some(3);

    let mut trainer = Trainer::new(config).unwrap();
    let report = trainer.run().await.unwrap();

    for episode in &report.episodes {
        assert_eq!(episode.goals_reached, 3);
        assert!(episode.iterations <= 8);
    }
    assert!(report.agents.iter().all(|a| a.greedy_policy.is_none()));
}

#[tokio::test]
async fn test_multi_agent_heuristic_reaches_goal_within_budget() {
    let mut config = SimulationConfig::default();
    config.grid.rows = 6;
    config.grid.cols = 6;
    config.grid.goals = vec![GridCoordinate::new(5, 5)];
    config.training.algorithm = Algorithm::MultiAgentHeuristic;
    config.training.agents = 4;
    config.training.episodes = 10;
    config.training.max_iterations = 40;
    config.training.seed = Some(5);

    let mut trainer = Trainer::new(config).unwrap();
    let report = trainer.run().await.unwrap();
    assert_eq!(report.episode_count(), 10);
    assert!(report.total_goals() > 0);
}

#[tokio::test]
async fn test_heuristic_without_goals_is_rejected() {
    let mut config = SimulationConfig::default();
    config.grid.goals.clear();
    config.training.algorithm = Algorithm::Heuristic;

    let err = Trainer::new(config).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<QLCError>(),
        Some(QLCError::EmptyGoalSet)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_mode_runs_every_agent() {
    let mut config = SimulationConfig::default();
    config.grid.rows = 5;
    config.grid.cols = 5;
    config.grid.goals = vec![GridCoordinate::new(4, 4)];
    config.training.agents = 3;
    config.training.episodes = 30;
    config.training.max_iterations = 40;
    config.training.multithreaded = true;
    config.training.seed = Some(11);

    let mut trainer = Trainer::new(config).unwrap();
    let report = trainer.run().await.unwrap();

    assert_eq!(report.episode_count(), 30);
    let ids: Vec<usize> = trainer.agents().iter().map(|a| a.id()).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    let visits: u64 = report.heat_map.iter().flatten().sum();
    let steps: usize = report.episodes.iter().map(|e| e.iterations).sum();
    assert!(visits >= steps as u64);
}

#[tokio::test]
async fn test_function_approximation_run() {
    let mut config = SimulationConfig::default();
    config.grid.rows = 4;
    config.grid.cols = 4;
    config.grid.goals = vec![GridCoordinate::new(3, 3)];
    config.grid.obstacles = vec![GridCoordinate::new(1, 1)];
    config.training.algorithm = Algorithm::FunctionApproximation;
    config.training.episodes = 10;
    config.training.max_iterations = 30;
    config.training.seed = Some(21);
    config.approximation.train_start = 16;
    config.approximation.batch_size = 8;

    let mut trainer = Trainer::new(config).unwrap();
    let report = trainer.run().await.unwrap();

    assert_eq!(report.episode_count(), 10);
    let params = trainer.agents()[0].policy().params();
    assert_eq!(params["input"], 6);
    assert_eq!(params["output"], 5);
    assert!(params["steps"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_second_run_starts_from_scratch() {
    let mut config = corner_config(Algorithm::QLearning);
    config.training.episodes = 20;

    let mut trainer = Trainer::new(config).unwrap();
    trainer.run().await.unwrap();
    assert!(trainer.agents()[0].epsilon() < 1.0);

    trainer.reset().unwrap();
    assert_eq!(trainer.agents()[0].epsilon(), 1.0);
    let table = trainer.agents()[0].q_table().unwrap();
    assert_eq!(table.max_value(GridCoordinate::new(0, 0)), 0.0);
    assert_eq!(trainer.environment().heat_map().total(), 0);
}
