use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::geo::Coordinate;

/// One GPS fix as retained in a bus history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: Coordinate,
    pub timestamp: DateTime<Utc>,
}

/// Bounded, oldest-first buffer of recent fixes for one bus.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl PositionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a fix, evicting the oldest once the buffer is full.
    pub fn push(&mut self, at: Coordinate, timestamp: DateTime<Utc>) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at, timestamp });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Average speed between the oldest and newest retained fix, in km/h.
    ///
    /// Zero with fewer than two fixes or when they span no more than
    /// `min_window_secs`. Clamped to `[0, max_kmh]`.
    pub fn speed_kmh(&self, min_window_secs: f64, max_kmh: f64) -> f64 {
        let (Some(oldest), Some(newest)) = (self.oldest(), self.newest()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = (newest.timestamp - oldest.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed <= min_window_secs {
            return 0.0;
        }

        let km = oldest.at.distance_km(&newest.at);
        (km / elapsed * 3600.0).clamp(0.0, max_kmh)
    }
}
