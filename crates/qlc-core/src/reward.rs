//! Reward table over (row, col, action)

use serde::{Deserialize, Serialize};

use crate::types::{Action, GridCoordinate};

/// Dense reward lookup, one value per (cell, action)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTable {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl RewardTable {
    /// Build a table where every entry holds `fill`
    pub fn new(rows: usize, cols: usize, fill: f32) -> Self {
        Self {
            rows,
            cols,
            values: vec![fill; rows * cols * Action::COUNT],
        }
    }

    fn index(&self, cell: GridCoordinate, action: Action) -> usize {
        (cell.row * self.cols + cell.col) * Action::COUNT + action.to_index()
    }

    pub fn get(&self, cell: GridCoordinate, action: Action) -> f32 {
        self.values[self.index(cell, action)]
    }

    pub fn set(&mut self, cell: GridCoordinate, action: Action, reward: f32) {
        let idx = self.index(cell, action);
        self.values[idx] = reward;
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Rewards for every action out of `cell`, in action index order
    pub fn row(&self, cell: GridCoordinate) -> &[f32] {
        let start = self.index(cell, Action::Up);
        &self.values[start..start + Action::COUNT]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_fully_populated() {
        let table = RewardTable::new(3, 4, -0.1);
        for row in 0..3 {
            for col in 0..4 {
                let cell = GridCoordinate::new(row, col);
                assert_eq!(table.row(cell).len(), Action::COUNT);
                assert!(table.row(cell).iter().all(|&r| r == -0.1));
            }
        }
    }

    #[test]
    fn test_set_only_touches_one_entry() {
        let mut table = RewardTable::new(2, 2, 0.0);
        let cell = GridCoordinate::new(1, 0);
        table.set(cell, Action::Right, 100.0);

        assert_eq!(table.get(cell, Action::Right), 100.0);
        assert_eq!(table.get(cell, Action::Left), 0.0);
        assert_eq!(table.get(GridCoordinate::new(0, 0), Action::Right), 0.0);
    }
}
