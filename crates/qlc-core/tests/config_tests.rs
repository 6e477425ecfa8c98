//! Configuration parsing from TOML

use qlc_core::{Algorithm, GoalFilter, GridCoordinate, QLCError, SimulationConfig, TargetMode};

#[test]
fn test_full_toml_config() {
    let toml_str = r#"
        [grid]
        rows = 5
        cols = 4
        goals = [{ row = 4, col = 3 }]
        obstacles = [{ row = 2, col = 1 }, { row = 2, col = 2 }]

        [training]
        algorithm = "multi_agent_heuristic"
        agents = 3
        episodes = 50
        max_iterations = 30
        multithreaded = true
        seed = 9

        [agent]
        epsilon_decay = 0.95
        learning_rates = [0.5, 0.6, 0.7]

        [rewards]
        collision_penalty = -1.0
        step_cost = 0.05

        [heuristic]
        goal_filter = "not_farther"

        [approximation]
        target_mode = "taken_action"
    "#;

    let config: SimulationConfig = toml::from_str(toml_str).unwrap();
    assert!(config.validate().is_ok());

    assert_eq!(config.grid.rows, 5);
    assert_eq!(config.grid.goals, vec![GridCoordinate::new(4, 3)]);
    assert_eq!(config.grid.obstacles.len(), 2);
    assert_eq!(config.training.algorithm, Algorithm::MultiAgentHeuristic);
    assert_eq!(config.training.seed, Some(9));
    assert_eq!(config.agent.learning_rate_for(2), 0.7);
    assert_eq!(config.agent.epsilon, 1.0);
    assert_eq!(config.rewards.collision_penalty, -1.0);
    assert_eq!(config.rewards.goal, 100.0);
    assert_eq!(config.heuristic.goal_filter, GoalFilter::NotFarther);
    assert_eq!(config.approximation.target_mode, TargetMode::TakenAction);
    assert_eq!(config.approximation.batch_size, 32);
}

#[test]
fn test_defaults_survive_toml_round_trip() {
    let config = SimulationConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let parsed: SimulationConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_validation_rules() {
    let reject = |edit: fn(&mut SimulationConfig)| {
        let mut config = SimulationConfig::default();
        edit(&mut config);
        config.validate().unwrap_err()
    };

    assert!(matches!(reject(|c| c.training.episodes = 0), QLCError::Config(_)));
    assert!(matches!(reject(|c| c.training.max_iterations = 0), QLCError::Config(_)));
    assert!(matches!(reject(|c| c.agent.discount = 1.5), QLCError::Config(_)));
    assert!(matches!(reject(|c| c.agent.epsilon_decay = 0.0), QLCError::Config(_)));
    assert!(matches!(
        reject(|c| c.grid.obstacles = vec![GridCoordinate::new(7, 7)]),
        QLCError::Config(_)
    ));
    assert!(matches!(
        reject(|c| c.grid.spawns = vec![GridCoordinate::new(7, 7)]),
        QLCError::Config(_)
    ));
    assert!(matches!(
        reject(|c| {
            c.training.agents = 2;
            c.grid.spawns = vec![GridCoordinate::new(0, 0)];
        }),
        QLCError::Config(_)
    ));
    assert!(matches!(
        reject(|c| {
            c.training.algorithm = Algorithm::FunctionApproximation;
            c.approximation.batch_size = 0;
        }),
        QLCError::Config(_)
    ));
    assert!(matches!(
        reject(|c| {
            c.grid.rows = 1;
            c.grid.cols = 2;
            c.grid.goals = vec![GridCoordinate::new(0, 1)];
            c.training.agents = 2;
        }),
        QLCError::Config(_)
    ));
}

#[test]
fn test_unknown_algorithm_fails_to_parse() {
    let result: Result<SimulationConfig, _> = toml::from_str("[training]\nalgorithm = \"sarsa\"\n");
    assert!(result.is_err());
}
