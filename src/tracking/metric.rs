//! Route-aware distance between two positions.
//!
//! Both positions are snapped to their nearest point on the route polyline
//! and the consecutive segments between the two snapped points are summed.
//! Each endpoint's residual to its snapped point is then added, or
//! subtracted when the position already lies on the segment leading toward
//! the other endpoint, so the result grows steadily for a bus moving along
//! the line.

use lru::LruCache;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::geo::{Coordinate, projection_fraction};
use crate::model::Route;

/// Route id plus both coordinates rounded to 1e-5 degrees.
type MemoKey = (String, i64, i64, i64, i64);

/// Route-aware distance calculator with a bounded memo.
pub struct RouteMetric {
    memo: Mutex<LruCache<MemoKey, f64>>,
    capacity: usize,
    evict: usize,
}

impl RouteMetric {
    /// Once the memo holds more than `capacity` entries, the `evict` least
    /// recently used ones are dropped.
    pub fn new(capacity: usize, evict: usize) -> Self {
        Self {
            memo: Mutex::new(LruCache::unbounded()),
            capacity,
            evict: evict.max(1),
        }
    }

    /// Distance in kilometres from `from` to `to` following `route`.
    pub fn distance(&self, route: &Route, from: &Coordinate, to: &Coordinate) -> f64 {
        let key = (
            route.route_id.clone(),
            round5(from.lat),
            round5(from.lng),
            round5(to.lat),
            round5(to.lng),
        );

        if let Some(km) = self.lock().get(&key) {
            return *km;
        }

        let km = along_route(route.points(), from, to);

        let mut memo = self.lock();
        if memo.len() > self.capacity {
            for _ in 0..self.evict {
                if memo.pop_lru().is_none() {
                    break;
                }
            }
        }
        memo.put(key, km);
        km
    }

    /// Index and route-aware distance of the stop closest to `at`.
    ///
    /// Ties resolve to the lowest stop index.
    pub fn nearest_stop(&self, route: &Route, at: &Coordinate) -> (usize, f64) {
        let mut best = (0, f64::INFINITY);
        for (idx, stop) in route.stops().iter().enumerate() {
            let km = self.distance(route, at, &stop.coordinate());
            if km < best.1 {
                best = (idx, km);
            }
        }
        best
    }

    /// Distance from `at` to the stop at `stop_index`.
    pub fn to_stop(&self, route: &Route, at: &Coordinate, stop_index: usize) -> f64 {
        match route.stops().get(stop_index) {
            Some(stop) => self.distance(route, at, &stop.coordinate()),
            None => f64::INFINITY,
        }
    }

    pub fn memo_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<MemoKey, f64>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn round5(deg: f64) -> i64 {
    (deg * 1e5).round() as i64
}

fn along_route(points: &[Coordinate], from: &Coordinate, to: &Coordinate) -> f64 {
    let (Some((start, start_residual)), Some((end, end_residual))) =
        (nearest_point(points, from), nearest_point(points, to))
    else {
        return from.distance_km(to);
    };

    if start == end {
        return from.distance_km(to);
    }

    let (lo, hi) = (start.min(end), start.max(end));
    let segments: f64 = points[lo..=hi]
        .windows(2)
        .map(|w| w[0].distance_km(&w[1]))
        .sum();

    let toward = |idx: usize| if idx == lo { idx + 1 } else { idx - 1 };
    let signed = |p: &Coordinate, idx: usize, residual: f64| {
        match projection_fraction(p, &points[idx], &points[toward(idx)]) {
            Some(t) if t > 0.0 && t < 1.0 => -residual,
            _ => residual,
        }
    };

    (segments + signed(from, start, start_residual) + signed(to, end, end_residual)).max(0.0)
}

fn nearest_point(points: &[Coordinate], p: &Coordinate) -> Option<(usize, f64)> {
    points
        .iter()
        .enumerate()
        .map(|(i, q)| (i, p.distance_km(q)))
        .fold(None, |best, (i, km)| match best {
            Some((_, best_km)) if best_km <= km => best,
            _ => Some((i, km)),
        })
}
