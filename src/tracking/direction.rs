//! Travel direction inference and next-stop resolution.
//!
//! Routes are authored once in forward order; backward travel is always
//! derived from the same stop list.

use tracing::trace;

use super::history::PositionHistory;
use super::metric::RouteMetric;
use crate::config::TrackerConfig;
use crate::geo::Coordinate;
use crate::model::{Direction, Route};

/// The last stop a bus was seen at, and which way it was going.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopMarker {
    pub stop_index: usize,
    pub direction: Direction,
}

/// Which resolution rule produced a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRule {
    /// At a stop; the target is the following stop.
    AtStop,
    /// At the terminal stop of the current direction.
    Terminal,
    /// One past the last stop marker.
    Marker,
    /// First stop ahead beyond the overlap radius.
    Scan,
    /// Nothing else applied; the nearest stop itself.
    Nearest,
}

/// The stop a bus is currently heading for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NextStop {
    pub stop_index: usize,
    pub distance_km: f64,
    pub rule: TargetRule,
}

/// Direction and target for one location report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub direction: Direction,
    pub target: NextStop,
    /// Stop within the at-stop radius, if any.
    pub at_stop: Option<usize>,
}

pub struct DirectionResolver<'a> {
    route: &'a Route,
    metric: &'a RouteMetric,
    config: &'a TrackerConfig,
}

impl<'a> DirectionResolver<'a> {
    pub fn new(route: &'a Route, metric: &'a RouteMetric, config: &'a TrackerConfig) -> Self {
        Self {
            route,
            metric,
            config,
        }
    }

    /// Infers the travel direction from `history`, whose newest sample is
    /// the current position.
    ///
    /// With too few samples the bus is assumed to head away from whichever
    /// terminal it is closer to. Otherwise the nearest stops of the oldest
    /// and newest sample are compared; no movement keeps `previous`.
    pub fn infer(&self, history: &PositionHistory, previous: Option<Direction>) -> Direction {
        let stops = self.route.stops();
        let (Some(oldest), Some(newest)) = (history.oldest(), history.newest()) else {
            return previous.unwrap_or_default();
        };
        if stops.len() < 2 {
            return Direction::Forward;
        }

        if history.len() < self.config.min_direction_samples {
            let to_first = self
                .metric
                .distance(self.route, &newest.at, &stops[0].coordinate());
            let to_last = self
                .metric
                .distance(self.route, &newest.at, &stops[stops.len() - 1].coordinate());
            return if to_first < to_last {
                Direction::Forward
            } else {
                Direction::Backward
            };
        }

        let (from, _) = self.metric.nearest_stop(self.route, &oldest.at);
        let (to, _) = self.metric.nearest_stop(self.route, &newest.at);
        trace!(from, to, "Direction from history");

        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Direction::Forward,
            std::cmp::Ordering::Less => Direction::Backward,
            std::cmp::Ordering::Equal => previous.unwrap_or_default(),
        }
    }

    /// Picks the stop a bus at `at` travelling `direction` is heading for,
    /// updating `marker` when the bus is at a stop.
    pub fn next_stop(
        &self,
        at: &Coordinate,
        direction: Direction,
        marker: &mut Option<StopMarker>,
    ) -> (NextStop, Option<usize>) {
        let (nearest, nearest_km) = self.metric.nearest_stop(self.route, at);

        if nearest_km <= self.config.at_stop_km {
            *marker = Some(StopMarker {
                stop_index: nearest,
                direction,
            });
            let target = match self.route.step(nearest, direction) {
                Some(next) => self.target(at, next, TargetRule::AtStop),
                None => NextStop {
                    stop_index: nearest,
                    distance_km: nearest_km,
                    rule: TargetRule::Terminal,
                },
            };
            return (target, Some(nearest));
        }

        if let Some(m) = marker.filter(|m| m.direction == direction) {
            if let Some(next) = self.route.step(m.stop_index, direction) {
                return (self.target(at, next, TargetRule::Marker), None);
            }
        }

        let mut idx = Some(nearest);
        while let Some(i) = idx {
            let km = self.metric.to_stop(self.route, at, i);
            if km > self.config.overlap_km {
                return (
                    NextStop {
                        stop_index: i,
                        distance_km: km,
                        rule: TargetRule::Scan,
                    },
                    None,
                );
            }
            idx = self.route.step(i, direction);
        }

        (
            NextStop {
                stop_index: nearest,
                distance_km: nearest_km,
                rule: TargetRule::Nearest,
            },
            None,
        )
    }

    /// Infers direction then resolves the target in one step.
    pub fn resolve(
        &self,
        history: &PositionHistory,
        previous: Option<Direction>,
        marker: &mut Option<StopMarker>,
    ) -> Option<Resolution> {
        let at = history.newest()?.at;
        let direction = self.infer(history, previous);
        let (target, at_stop) = self.next_stop(&at, direction, marker);
        Some(Resolution {
            direction,
            target,
            at_stop,
        })
    }

    fn target(&self, at: &Coordinate, stop_index: usize, rule: TargetRule) -> NextStop {
        NextStop {
            stop_index,
            distance_km: self.metric.to_stop(self.route, at, stop_index),
            rule,
        }
    }
}
