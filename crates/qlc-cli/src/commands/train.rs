//! Training command

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use qlc_core::{Algorithm, GridCoordinate, SimulationConfig};
use qlc_rl::{Trainer, TrainingReport};

#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// Algorithm: q_learning, joint_q_learning, heuristic, multi_agent_heuristic
    /// or function_approximation
    #[arg(short, long)]
    pub algorithm: Option<Algorithm>,

    /// Number of agents
    #[arg(short = 'n', long)]
    pub agents: Option<usize>,

    /// Number of episodes
    #[arg(short, long)]
    pub episodes: Option<usize>,

    /// Iteration budget per episode
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Grid rows
    #[arg(long)]
    pub rows: Option<usize>,

    /// Grid columns
    #[arg(long)]
    pub cols: Option<usize>,

    /// Goal cell as `row,col`; repeat to register several (replaces configured goals)
    #[arg(long = "goal")]
    pub goals: Vec<GridCoordinate>,

    /// Obstacle cell as `row,col`; repeat to register several (replaces configured obstacles)
    #[arg(long = "obstacle")]
    pub obstacles: Vec<GridCoordinate>,

    /// Run independent agents on parallel workers
    #[arg(long)]
    pub multithreaded: bool,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Also write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl TrainArgs {
    /// Command line flags win over every other configuration layer
    pub fn apply(&self, config: &mut SimulationConfig) {
        if let Some(algorithm) = self.algorithm {
            config.training.algorithm = algorithm;
        }
        if let Some(agents) = self.agents {
            config.training.agents = agents;
        }
        if let Some(episodes) = self.episodes {
            config.training.episodes = episodes;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.training.max_iterations = max_iterations;
        }
        if let Some(rows) = self.rows {
            config.grid.rows = rows;
        }
        if let Some(cols) = self.cols {
            config.grid.cols = cols;
        }
        if !self.goals.is_empty() {
            config.grid.goals.clone_from(&self.goals);
        }
        if !self.obstacles.is_empty() {
            config.grid.obstacles.clone_from(&self.obstacles);
        }
        if self.multithreaded {
            config.training.multithreaded = true;
        }
        if self.seed.is_some() {
            config.training.seed = self.seed;
        }
        // Joint learning is defined for exactly two agents
        if config.training.algorithm == Algorithm::JointQLearning && self.agents.is_none() {
            config.training.agents = 2;
        }
    }
}

pub async fn run(args: TrainArgs, mut config: SimulationConfig) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let mut trainer = Trainer::new(config)?;

    let stop = trainer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current iteration");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let report = trainer.run().await?;

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&trainer, &report);
    }

    Ok(())
}

fn print_report(trainer: &Trainer, report: &TrainingReport) {
    let config = trainer.config();

    println!("Training Report");
    println!("===============\n");
    println!("Run:        {}", report.run_id);
    println!("Algorithm:  {}", report.algorithm);
    println!(
        "Grid:       {}x{}, {} agent(s)",
        config.grid.rows, config.grid.cols, config.training.agents
    );
    println!(
        "Episodes:   {}{}",
        report.episode_count(),
        if report.stopped { " (stopped early)" } else { "" }
    );
    println!("Duration:   {} ms", report.duration().num_milliseconds());
    println!("Goals:      {}", report.total_goals());
    println!("Collisions: {}", report.total_collisions());
    println!("Mean reward per episode: {:.3}", report.mean_reward());
    println!(
        "Mean iterations (last 10): {:.1}",
        report.recent_mean_iterations(10)
    );

    println!("\nEnvironment");
    println!("-----------");
    println!("{}", trainer.environment());

    for agent in &report.agents {
        println!(
            "\nAgent {} (epsilon {:.3}, learning rate {})",
            agent.id, agent.epsilon, agent.beta
        );
        match &agent.greedy_policy {
            Some(rows) => {
                for row in rows {
                    println!("  {row}");
                }
            }
            None => println!("  (no value table)"),
        }
    }

    println!("\nHeat map");
    println!("--------");
    let width = report
        .heat_map
        .iter()
        .flatten()
        .max()
        .map_or(1, |max| max.to_string().len());
    for row in &report.heat_map {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:>width$}")).collect();
        println!("  {}", cells.join(" "));
    }
}
