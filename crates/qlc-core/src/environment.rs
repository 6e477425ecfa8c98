//! Grid environment - transition model, rewards and occupancy bookkeeping
//!
//! The environment is the single source of truth for goals, obstacles and
//! which cells hold an agent. Edits (goal / obstacle toggles, resize) need
//! `&mut self`; stepping and occupancy updates only need `&self` so several
//! agents can share one environment behind an `Arc`. Tile flags and heat-map
//! counters are per-cell atomics for that reason.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RewardConfig, SimulationConfig};
use crate::error::{QLCError, Result};
use crate::heatmap::HeatMap;
use crate::reward::RewardTable;
use crate::tile::TileFlags;
use crate::types::{Action, GridCoordinate};

/// Movement directions (every action except `None`)
const MOVES: [Action; 4] = [Action::Up, Action::Right, Action::Down, Action::Left];

/// Result of a single environment step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub next_state: GridCoordinate,
    pub reward: f32,
    /// True iff `next_state` is a goal
    pub done: bool,
    /// True if the move ran into a cell occupied by another agent
    pub collision: bool,
}

/// The gridworld
pub struct GridEnvironment {
    rows: usize,
    cols: usize,
    flags: Vec<AtomicU8>,
    rewards: RewardTable,
    reward_config: RewardConfig,
    goals: Vec<GridCoordinate>,
    obstacles: Vec<GridCoordinate>,
    heat: HeatMap,
}

impl GridEnvironment {
    /// Create an empty `rows` x `cols` grid
    pub fn new(rows: usize, cols: usize, reward_config: RewardConfig) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(QLCError::Config(format!(
                "grid dimensions must be non-zero, got {rows}x{cols}"
            )));
        }
        Ok(Self {
            rows,
            cols,
            flags: (0..rows * cols).map(|_| AtomicU8::new(0)).collect(),
            rewards: RewardTable::new(rows, cols, reward_config.non_goal),
            reward_config,
            goals: Vec::new(),
            obstacles: Vec::new(),
            heat: HeatMap::new(rows, cols),
        })
    }

    /// Build the grid described by a configuration, goals and obstacles included
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        let mut env = Self::new(config.grid.rows, config.grid.cols, config.rewards)?;
        for obstacle in &config.grid.obstacles {
            if !env.is_obstacle(*obstacle) {
                env.add_obstacle(obstacle.row, obstacle.col)?;
            }
        }
        for goal in &config.grid.goals {
            if !env.is_goal(*goal) {
                env.add_goal(goal.row, goal.col)?;
            }
        }
        Ok(env)
    }

    /// Change dimensions, dropping every flag, goal, obstacle and heat count
    pub fn resize(&mut self, rows: usize, cols: usize) -> Result<()> {
        *self = Self::new(rows, cols, self.reward_config)?;
        debug!(rows, cols, "Grid resized");
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// (rows, cols)
    pub fn state_dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn action_dim(&self) -> usize {
        Action::COUNT
    }

    pub fn reward_config(&self) -> &RewardConfig {
        &self.reward_config
    }

    pub fn rewards(&self) -> &RewardTable {
        &self.rewards
    }

    pub fn goals(&self) -> &[GridCoordinate] {
        &self.goals
    }

    pub fn obstacles(&self) -> &[GridCoordinate] {
        &self.obstacles
    }

    pub fn heat_map(&self) -> &HeatMap {
        &self.heat
    }

    pub fn clear_heat_map(&self) {
        self.heat.clear();
    }

    pub fn contains(&self, cell: GridCoordinate) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    pub fn check_bounds(&self, cell: GridCoordinate) -> Result<()> {
        if self.contains(cell) {
            Ok(())
        } else {
            Err(QLCError::OutOfBounds {
                coord: cell,
                rows: self.rows,
                cols: self.cols,
            })
        }
    }

    fn slot(&self, cell: GridCoordinate) -> &AtomicU8 {
        &self.flags[cell.row * self.cols + cell.col]
    }

    fn slot_mut(&mut self, cell: GridCoordinate) -> &mut u8 {
        self.flags[cell.row * self.cols + cell.col].get_mut()
    }

    /// Apply an exclusive edit to one tile, returning the new flags
    fn edit_tile(
        &mut self,
        cell: GridCoordinate,
        edit: impl FnOnce(&mut TileFlags),
    ) -> TileFlags {
        let slot = self.slot_mut(cell);
        let mut tile = TileFlags::from_bits(*slot);
        edit(&mut tile);
        *slot = tile.bits();
        tile
    }

    /// Flags of an in-bounds cell
    pub fn tile_flags(&self, cell: GridCoordinate) -> TileFlags {
        TileFlags::from_bits(self.slot(cell).load(Ordering::Acquire))
    }

    /// Row-major snapshot of all tile flags, for colour-coding
    pub fn flags_grid(&self) -> Vec<Vec<TileFlags>> {
        (0..self.rows)
            .map(|row| {
                (0..self.cols)
                    .map(|col| self.tile_flags(GridCoordinate::new(row, col)))
                    .collect()
            })
            .collect()
    }

    pub fn is_goal(&self, cell: GridCoordinate) -> bool {
        self.contains(cell) && self.tile_flags(cell).contains(TileFlags::GOAL)
    }

    pub fn is_obstacle(&self, cell: GridCoordinate) -> bool {
        self.contains(cell) && self.tile_flags(cell).contains(TileFlags::OBSTACLE)
    }

    pub fn is_occupied(&self, cell: GridCoordinate) -> bool {
        self.contains(cell) && self.tile_flags(cell).contains(TileFlags::CONTAINS_AGENT)
    }

    /// Every direction that stays on the grid and avoids obstacles, plus `None`
    pub fn allowed_actions(&self, state: GridCoordinate) -> Vec<Action> {
        let mut allowed: Vec<Action> = MOVES
            .iter()
            .copied()
            .filter(|&action| {
                state
                    .offset(action, self.rows, self.cols)
                    .is_some_and(|next| !self.is_obstacle(next))
            })
            .collect();
        allowed.push(Action::None);
        allowed
    }

    pub fn is_allowed(&self, state: GridCoordinate, action: Action) -> bool {
        if action == Action::None {
            return self.contains(state);
        }
        self.contains(state)
            && state
                .offset(action, self.rows, self.cols)
                .is_some_and(|next| !self.is_obstacle(next))
    }

    /// Apply `action` from `state`
    ///
    /// The reward is the tabulated (cell, action) reward minus the Manhattan
    /// step cost, plus the collision penalty when the destination holds
    /// another agent. Bumps the heat-map counter of `state`.
    pub fn step(&self, action: Action, state: GridCoordinate) -> Result<StepOutcome> {
        let outcome = self.evaluate(action, state)?;
        self.heat.increment(state);
        Ok(outcome)
    }

    /// Same outcome as [`step`](Self::step) without counting a visit
    pub fn evaluate(&self, action: Action, state: GridCoordinate) -> Result<StepOutcome> {
        self.check_bounds(state)?;
        if !self.is_allowed(state, action) {
            return Err(QLCError::InvalidAction { action, state });
        }
        let next_state = state
            .offset(action, self.rows, self.cols)
            .ok_or(QLCError::InvalidAction { action, state })?;

        let moved = state.manhattan(&next_state);
        let collision = moved > 0 && self.is_occupied(next_state);

        let mut reward =
            self.rewards.get(state, action) - self.reward_config.step_cost * moved as f32;
        if collision {
            reward += self.reward_config.collision_penalty;
        }

        Ok(StepOutcome {
            next_state,
            reward,
            done: self.is_goal(next_state),
            collision,
        })
    }

    /// Toggle the goal flag of a cell, returning whether it is now a goal
    ///
    /// Activating a goal sets the inbound reward of every unobstructed
    /// neighbour to the goal reward; deactivating restores the non-goal reward.
    /// An obstacle on the cell is cleared first.
    pub fn add_goal(&mut self, row: usize, col: usize) -> Result<bool> {
        let cell = GridCoordinate::new(row, col);
        self.check_bounds(cell)?;

        if self.is_obstacle(cell) {
            self.add_obstacle(row, col)?;
        }

        let activate = !self.is_goal(cell);
        let reward = if activate {
            self.reward_config.goal
        } else {
            self.reward_config.non_goal
        };

        for direction in MOVES {
            let Some(neighbour) = cell.offset(direction, self.rows, self.cols) else {
                continue;
            };
            if self.is_obstacle(neighbour) {
                continue;
            }
            self.rewards.set(neighbour, direction.opposite(), reward);
        }

        // goals never show occupancy
        self.edit_tile(cell, |tile| {
            if activate {
                tile.insert(TileFlags::GOAL);
                tile.remove(TileFlags::CONTAINS_AGENT);
            } else {
                tile.remove(TileFlags::GOAL);
            }
        });
        if activate {
            self.goals.push(cell);
        } else {
            self.goals.retain(|g| *g != cell);
        }

        debug!(%cell, active = activate, "Goal toggled");
        Ok(activate)
    }

    /// Toggle the obstacle flag of a cell, returning whether it is now an obstacle
    ///
    /// Rewards are left untouched since obstacle cells are never entered.
    /// A goal on the cell is removed first.
    pub fn add_obstacle(&mut self, row: usize, col: usize) -> Result<bool> {
        let cell = GridCoordinate::new(row, col);
        self.check_bounds(cell)?;

        if self.is_goal(cell) {
            self.add_goal(row, col)?;
        }

        let active = self
            .edit_tile(cell, |tile| tile.toggle(TileFlags::OBSTACLE))
            .contains(TileFlags::OBSTACLE);
        if active {
            self.obstacles.push(cell);
        } else {
            self.obstacles.retain(|o| *o != cell);
        }

        debug!(%cell, active, "Obstacle toggled");
        Ok(active)
    }

    /// Move an agent's occupancy marker from `prev` to `curr`
    ///
    /// Goal cells never show occupancy. `curr` is always marked visited.
    pub fn set_agent_flags(&self, prev: GridCoordinate, curr: GridCoordinate) {
        if self.contains(prev) {
            self.slot(prev)
                .fetch_and(!TileFlags::CONTAINS_AGENT.bits(), Ordering::AcqRel);
        }
        if self.contains(curr) {
            let mut mark = TileFlags::VISITED;
            if !self.is_goal(curr) {
                mark |= TileFlags::CONTAINS_AGENT;
            }
            self.slot(curr).fetch_or(mark.bits(), Ordering::AcqRel);
        }
    }

    /// Drop every occupancy and visited marker
    pub fn clear_agent_flags(&self) {
        let mask = !(TileFlags::CONTAINS_AGENT | TileFlags::VISITED).bits();
        for slot in &self.flags {
            slot.fetch_and(mask, Ordering::AcqRel);
        }
    }

    /// Cells with no goal, obstacle or agent - the legal spawn set
    pub fn spawnable_points(&self) -> Vec<GridCoordinate> {
        let blocked = TileFlags::GOAL | TileFlags::OBSTACLE | TileFlags::CONTAINS_AGENT;
        (0..self.rows)
            .flat_map(|row| (0..self.cols).map(move |col| GridCoordinate::new(row, col)))
            .filter(|&cell| !self.tile_flags(cell).intersects(blocked))
            .collect()
    }

    /// Nearest occupied cell other than `state`, by Manhattan distance
    pub fn closest_agent(&self, state: GridCoordinate) -> Option<GridCoordinate> {
        (0..self.rows)
            .flat_map(|row| (0..self.cols).map(move |col| GridCoordinate::new(row, col)))
            .filter(|&cell| cell != state && self.is_occupied(cell))
            .min_by_key(|cell| cell.manhattan(&state))
    }

    /// Minimum goal distance from `state` and every goal attaining it
    pub fn closest_goals(&self, state: GridCoordinate) -> Result<(usize, Vec<GridCoordinate>)> {
        let best = self
            .goals
            .iter()
            .map(|g| g.manhattan(&state))
            .min()
            .ok_or(QLCError::EmptyGoalSet)?;
        let tied = self
            .goals
            .iter()
            .copied()
            .filter(|g| g.manhattan(&state) == best)
            .collect();
        Ok((best, tied))
    }
}

impl Clone for GridEnvironment {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            flags: self
                .flags
                .iter()
                .map(|f| AtomicU8::new(f.load(Ordering::Acquire)))
                .collect(),
            rewards: self.rewards.clone(),
            reward_config: self.reward_config,
            goals: self.goals.clone(),
            obstacles: self.obstacles.clone(),
            heat: self.heat.clone(),
        }
    }
}

impl fmt::Debug for GridEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridEnvironment")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("goals", &self.goals)
            .field("obstacles", &self.obstacles)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for GridEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.flags_grid() {
            let line: String = row.iter().map(|flags| format!("[{flags}]")).collect();
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
