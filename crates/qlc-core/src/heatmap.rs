//! Per-cell visit counters

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::GridCoordinate;

/// Visit counter per cell, safe to bump from several workers at once
///
/// Counts are only read for visualization, so relaxed ordering is enough.
#[derive(Debug)]
pub struct HeatMap {
    rows: usize,
    cols: usize,
    counts: Vec<AtomicU64>,
}

impl HeatMap {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            counts: (0..rows * cols).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn increment(&self, cell: GridCoordinate) {
        self.counts[cell.row * self.cols + cell.col].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, cell: GridCoordinate) -> u64 {
        self.counts[cell.row * self.cols + cell.col].load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }

    /// Total number of recorded steps
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Row-major copy of the counters
    pub fn snapshot(&self) -> Vec<Vec<u64>> {
        (0..self.rows)
            .map(|row| {
                (0..self.cols)
                    .map(|col| self.get(GridCoordinate::new(row, col)))
                    .collect()
            })
            .collect()
    }
}

impl Clone for HeatMap {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            counts: self
                .counts
                .iter()
                .map(|c| AtomicU64::new(c.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_and_clear() {
        let heat = HeatMap::new(2, 3);
        let cell = GridCoordinate::new(1, 2);
        heat.increment(cell);
        heat.increment(cell);

        assert_eq!(heat.get(cell), 2);
        assert_eq!(heat.total(), 2);
        assert_eq!(heat.snapshot()[1][2], 2);

        heat.clear();
        assert_eq!(heat.total(), 0);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let heat = Arc::new(HeatMap::new(1, 1));
        let cell = GridCoordinate::new(0, 0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let heat = Arc::clone(&heat);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        heat.increment(cell);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(heat.get(cell), 4000);
    }
}
