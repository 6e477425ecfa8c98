//! Episode and run telemetry for the plotting layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qlc_core::{Algorithm, RunId};

/// Per-episode statistics, summed over all agents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub episode: usize,
    pub reward_sum: f32,
    /// Outer iterations the episode ran for
    pub iterations: usize,
    pub collisions: usize,
    pub goals_reached: usize,
    /// Mean exploration rate in force during the episode
    pub mean_epsilon: f32,
    /// Joint-step rollbacks (joint Q-learning only)
    pub rollbacks: usize,
}

/// Final greedy policy of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: usize,
    pub epsilon: f32,
    pub beta: f32,
    /// Row-major glyph grid; absent for policies without a value table
    pub greedy_policy: Option<Vec<String>>,
}

/// Everything a training run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: RunId,
    pub algorithm: Algorithm,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when the run ended on a stop request
    pub stopped: bool,
    pub episodes: Vec<EpisodeReport>,
    pub agents: Vec<AgentSummary>,
    pub heat_map: Vec<Vec<u64>>,
}

impl TrainingReport {
    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn total_goals(&self) -> usize {
        self.episodes.iter().map(|e| e.goals_reached).sum()
    }

    pub fn total_collisions(&self) -> usize {
        self.episodes.iter().map(|e| e.collisions).sum()
    }

    pub fn mean_reward(&self) -> f32 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        self.episodes.iter().map(|e| e.reward_sum).sum::<f32>() / self.episodes.len() as f32
    }

    /// Mean iterations over the last `window` episodes
    pub fn recent_mean_iterations(&self, window: usize) -> f32 {
        let start = self.episodes.len().saturating_sub(window);
        let recent = &self.episodes[start..];
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().map(|e| e.iterations as f32).sum::<f32>() / recent.len() as f32
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Glyph grid as one string per row
pub fn render_policy(glyphs: &[Vec<char>]) -> Vec<String> {
    glyphs.iter().map(|row| row.iter().collect()).collect()
}
