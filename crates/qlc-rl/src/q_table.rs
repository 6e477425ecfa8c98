//! Tabular Q-learning
//!
//! `QTable` stores one value per (row, col, action) and is always fully
//! populated; `TabularPolicy` wraps it with epsilon-greedy selection and the
//! off-policy TD(0) update.

use anyhow::Result;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use qlc_core::{Action, GridCoordinate, GridEnvironment, TileFlags};

use crate::agent::AgentState;
use crate::algorithm::{epsilon_greedy, Policy, StepContext};
use crate::experience::Transition;

/// Dense action-value table over (row, col, action)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl QTable {
    /// Zero-initialised table
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols * Action::COUNT],
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn index(&self, cell: GridCoordinate, action: Action) -> usize {
        (cell.row * self.cols + cell.col) * Action::COUNT + action.to_index()
    }

    pub fn get(&self, cell: GridCoordinate, action: Action) -> f32 {
        self.values[self.index(cell, action)]
    }

    pub fn set(&mut self, cell: GridCoordinate, action: Action, value: f32) {
        let idx = self.index(cell, action);
        self.values[idx] = value;
    }

    /// Every action value of a cell, in action-index order
    pub fn row(&self, cell: GridCoordinate) -> &[f32] {
        let start = self.index(cell, Action::Up);
        &self.values[start..start + Action::COUNT]
    }

    /// Maximum over all actions of a cell, blocked ones included
    pub fn max_value(&self, cell: GridCoordinate) -> f32 {
        self.row(cell)
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// First action attaining the row maximum
    pub fn best_action(&self, cell: GridCoordinate) -> Action {
        let row = self.row(cell);
        let mut best = 0;
        for (i, value) in row.iter().enumerate().skip(1) {
            if *value > row[best] {
                best = i;
            }
        }
        Action::from_index(best).unwrap_or(Action::None)
    }

    /// `Q[s,a] += beta * (r + gamma * max_a' Q[s',a'] - Q[s,a])`, returning the new value
    pub fn update(&mut self, transition: &Transition, beta: f32, gamma: f32) -> f32 {
        let current = self.get(transition.state, transition.action);
        let bootstrap = self.max_value(transition.next_state);
        let updated = current + beta * (transition.reward + gamma * bootstrap - current);
        self.set(transition.state, transition.action, updated);
        updated
    }

    pub fn reset(&mut self) {
        self.values.fill(0.0);
    }

    /// Zeroed table of the new size
    pub fn resize(&mut self, rows: usize, cols: usize) {
        *self = Self::new(rows, cols);
    }

    /// Glyph grid of the greedy policy: `g` goal, `o` obstacle, else the best action
    pub fn greedy_policy(&self, env: &GridEnvironment) -> Vec<Vec<char>> {
        (0..self.rows)
            .map(|row| {
                (0..self.cols)
                    .map(|col| {
                        let cell = GridCoordinate::new(row, col);
                        let flags = env.tile_flags(cell);
                        if flags.contains(TileFlags::GOAL) {
                            'g'
                        } else if flags.contains(TileFlags::OBSTACLE) {
                            'o'
                        } else {
                            self.best_action(cell).glyph()
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Epsilon-greedy tabular Q-learning
#[derive(Debug, Clone)]
pub struct TabularPolicy {
    table: QTable,
}

impl TabularPolicy {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            table: QTable::new(rows, cols),
        }
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut QTable {
        &mut self.table
    }
}

impl Policy for TabularPolicy {
    fn name(&self) -> &'static str {
        "q_learning"
    }

    fn select_action(
        &mut self,
        env: &GridEnvironment,
        agent: &AgentState,
        _ctx: StepContext,
        rng: &mut StdRng,
    ) -> Result<Action> {
        let table = &self.table;
        Ok(epsilon_greedy(
            env,
            agent,
            |a| table.get(agent.position, a),
            rng,
        ))
    }

    fn learn(
        &mut self,
        _env: &GridEnvironment,
        agent: &AgentState,
        transition: &Transition,
        _ctx: StepContext,
        _rng: &mut StdRng,
    ) -> Result<()> {
        self.table.update(transition, agent.beta, agent.gamma);
        Ok(())
    }

    fn reset(&mut self, env: &GridEnvironment, _rng: &mut StdRng) -> Result<()> {
        if self.table.dims() == env.state_dim() {
            self.table.reset();
        } else {
            self.table.resize(env.rows(), env.cols());
        }
        Ok(())
    }

    fn q_table(&self) -> Option<&QTable> {
        Some(&self.table)
    }

    fn params(&self) -> serde_json::Value {
        let (rows, cols) = self.table.dims();
        serde_json::json!({
            "rows": rows,
            "cols": cols,
            "actions": Action::COUNT,
        })
    }
}
