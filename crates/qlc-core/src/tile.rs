//! Per-cell tile flags

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

/// Bitset over the tile states a cell can carry
///
/// Obstacle and Goal are kept exclusive by the environment's edit
/// operations, everything else combines freely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileFlags(u8);

impl TileFlags {
    pub const EMPTY: TileFlags = TileFlags(0);
    pub const OBSTACLE: TileFlags = TileFlags(1 << 0);
    pub const GOAL: TileFlags = TileFlags(1 << 1);
    pub const CONTAINS_AGENT: TileFlags = TileFlags(1 << 2);
    pub const VISITED: TileFlags = TileFlags(1 << 3);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every flag in `other` is set
    pub const fn contains(self, other: TileFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set
    pub const fn intersects(self, other: TileFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: TileFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TileFlags) {
        self.0 &= !other.0;
    }

    pub fn toggle(&mut self, other: TileFlags) {
        self.0 ^= other.0;
    }
}

impl BitOr for TileFlags {
    type Output = TileFlags;

    fn bitor(self, rhs: TileFlags) -> TileFlags {
        TileFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TileFlags {
    fn bitor_assign(&mut self, rhs: TileFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TileFlags {
    type Output = TileFlags;

    fn bitand(self, rhs: TileFlags) -> TileFlags {
        TileFlags(self.0 & rhs.0)
    }
}

impl Not for TileFlags {
    type Output = TileFlags;

    fn not(self) -> TileFlags {
        TileFlags::from_bits(!self.0)
    }
}

impl fmt::Display for TileFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let glyph = if self.contains(TileFlags::GOAL) {
            'G'
        } else if self.contains(TileFlags::OBSTACLE) {
            '#'
        } else if self.contains(TileFlags::CONTAINS_AGENT) {
            'A'
        } else if self.contains(TileFlags::VISITED) {
            '.'
        } else {
            ' '
        };
        write!(f, "{glyph}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let mut flags = TileFlags::EMPTY;
        assert!(flags.is_empty());

        flags.insert(TileFlags::GOAL | TileFlags::VISITED);
        assert!(flags.contains(TileFlags::GOAL));
        assert!(flags.contains(TileFlags::VISITED));
        assert!(!flags.contains(TileFlags::OBSTACLE));
        assert!(flags.intersects(TileFlags::GOAL | TileFlags::OBSTACLE));

        flags.remove(TileFlags::VISITED);
        assert_eq!(flags, TileFlags::GOAL);
    }

    #[test]
    fn test_toggle_twice_restores() {
        let mut flags = TileFlags::CONTAINS_AGENT;
        flags.toggle(TileFlags::OBSTACLE);
        assert!(flags.contains(TileFlags::OBSTACLE));
        flags.toggle(TileFlags::OBSTACLE);
        assert_eq!(flags, TileFlags::CONTAINS_AGENT);
    }

    #[test]
    fn test_from_bits_masks_unknown() {
        assert_eq!(TileFlags::from_bits(0xff).bits(), 0b1111);
        assert_eq!((!TileFlags::GOAL).bits(), 0b1101);
    }
}
