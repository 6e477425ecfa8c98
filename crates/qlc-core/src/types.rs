//! Common types used throughout QLC

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QLCError;

/// Training run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (row, col) cell of the grid
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridCoordinate {
    pub row: usize,
    pub col: usize,
}

impl GridCoordinate {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Manhattan distance to another cell
    pub fn manhattan(&self, other: &GridCoordinate) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }

    /// Cell reached by applying `action`, or `None` when it leaves a `rows`x`cols` grid
    pub fn offset(&self, action: Action, rows: usize, cols: usize) -> Option<GridCoordinate> {
        let (dr, dc) = action.delta();
        let row = self.row.checked_add_signed(dr)?;
        let col = self.col.checked_add_signed(dc)?;
        (row < rows && col < cols).then_some(GridCoordinate { row, col })
    }

    /// Signed (row, col) difference `self - other`, as used by feature encoders
    pub fn signed_delta(&self, other: &GridCoordinate) -> (f32, f32) {
        (
            self.row as f32 - other.row as f32,
            self.col as f32 - other.col as f32,
        )
    }
}

impl fmt::Display for GridCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

impl From<(usize, usize)> for GridCoordinate {
    fn from((row, col): (usize, usize)) -> Self {
        Self { row, col }
    }
}

/// Parses `"row,col"`
impl FromStr for GridCoordinate {
    type Err = QLCError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (row, col) = s
            .split_once(',')
            .ok_or_else(|| QLCError::Config(format!("expected 'row,col', got '{s}'")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| QLCError::Config(format!("invalid coordinate '{s}': {e}")))
        };
        Ok(Self::new(parse(row)?, parse(col)?))
    }
}

/// A move on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Up,
    Right,
    Down,
    Left,
    /// Stay in place
    None,
}

impl Action {
    /// All actions in index order
    pub const ALL: [Action; 5] = [
        Action::Up,
        Action::Right,
        Action::Down,
        Action::Left,
        Action::None,
    ];

    /// Number of discrete actions
    pub const COUNT: usize = 5;

    /// Convert action to index for tabular and network lookups
    pub fn to_index(self) -> usize {
        match self {
            Action::Up => 0,
            Action::Right => 1,
            Action::Down => 2,
            Action::Left => 3,
            Action::None => 4,
        }
    }

    /// Create action from index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// (row, col) direction vector
    pub fn delta(self) -> (isize, isize) {
        match self {
            Action::Up => (-1, 0),
            Action::Right => (0, 1),
            Action::Down => (1, 0),
            Action::Left => (0, -1),
            Action::None => (0, 0),
        }
    }

    /// Action that undoes this one
    pub fn opposite(self) -> Self {
        match self {
            Action::Up => Action::Down,
            Action::Right => Action::Left,
            Action::Down => Action::Up,
            Action::Left => Action::Right,
            Action::None => Action::None,
        }
    }

    /// Single-letter glyph used by greedy policy dumps
    pub fn glyph(self) -> char {
        match self {
            Action::Up => 'u',
            Action::Right => 'r',
            Action::Down => 'd',
            Action::Left => 'l',
            Action::None => 'n',
        }
    }

    /// Sprite rotation for renderers
    pub fn orientation_degrees(self) -> u16 {
        match self {
            Action::Up => 90,
            Action::Right | Action::None => 0,
            Action::Down => 270,
            Action::Left => 180,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Up => "up",
            Action::Right => "right",
            Action::Down => "down",
            Action::Left => "left",
            Action::None => "none",
        };
        f.write_str(name)
    }
}
