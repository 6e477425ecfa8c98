//! Transition records and the bounded replay buffer

use std::collections::VecDeque;

use rand::seq::IteratorRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use qlc_core::{Action, GridCoordinate};

/// A single transition tuple (s, a, s', r, done)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: GridCoordinate,
    pub action: Action,
    pub next_state: GridCoordinate,
    pub reward: f32,
    pub done: bool,
}

impl Transition {
    pub fn new(
        state: GridCoordinate,
        action: Action,
        next_state: GridCoordinate,
        reward: f32,
        done: bool,
    ) -> Self {
        Self {
            state,
            action,
            next_state,
            reward,
            done,
        }
    }
}

/// FIFO replay buffer that drops its oldest entry once full
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Create a new replay buffer with given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a transition, evicting the oldest when at capacity
    pub fn push(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Sample up to `batch_size` distinct entries
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Transition> {
        self.buffer
            .iter()
            .copied()
            .choose_multiple(rng, batch_size.min(self.buffer.len()))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(2000)
    }
}
