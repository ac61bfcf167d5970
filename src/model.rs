//! Typed route data: stops, interpolated waypoints and travel direction.
//!
//! Routes are authored once in their canonical forward order. Backward travel
//! is always derived from that order, never stored separately.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{info, warn};

use crate::geo::Coordinate;

/// Travel direction relative to the route's stop order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Increasing stop index.
    #[default]
    Forward,
    /// Decreasing stop index.
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }

    /// Arrow shown next to the direction in driver and passenger views.
    pub fn symbol(&self) -> &'static str {
        match self {
            Direction::Forward => "→",
            Direction::Backward => "←",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A boarding point. `id` is 1-based and unique within its route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: u32,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Stop {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// One entry of a route's ordered point list, as stored on disk.
///
/// Waypoints carry `id: null` and `is_stop: false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub id: Option<u32>,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_is_stop")]
    pub is_stop: bool,
}

fn default_is_stop() -> bool {
    true
}

impl RoutePoint {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    pub fn from_stop(stop: &Stop) -> Self {
        Self {
            id: Some(stop.id),
            name: stop.name.clone(),
            lat: stop.lat,
            lng: stop.lng,
            is_stop: true,
        }
    }

    pub fn waypoint(name: String, at: Coordinate) -> Self {
        Self {
            id: None,
            name,
            lat: at.lat,
            lng: at.lng,
            is_stop: false,
        }
    }
}

/// A validated route: its full polyline plus the stops extracted from it.
#[derive(Debug, Clone)]
pub struct Route {
    pub route_id: String,
    points: Vec<Coordinate>,
    stops: Vec<Stop>,
    /// Index into `points` for each entry of `stops`.
    stop_point_index: Vec<usize>,
}

/// Why a route file entry was rejected.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RouteError {
    #[error("route has no stops")]
    NoStops,
    #[error("route must start and end with a stop")]
    WaypointAtEnd,
    #[error("stop point without an id at position {0}")]
    MissingStopId(usize),
    #[error("duplicate stop id {0}")]
    DuplicateStopId(u32),
    #[error("non-finite coordinate at position {0}")]
    NonFiniteCoordinate(usize),
}

impl Route {
    /// Builds a route from its ordered points, enforcing that the first and
    /// last points are stops, that every coordinate is finite, and that stop
    /// ids are present and unique.
    pub fn from_points(route_id: &str, points: &[RoutePoint]) -> Result<Self, RouteError> {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Err(RouteError::NoStops);
        };
        if !first.is_stop || !last.is_stop {
            return Err(RouteError::WaypointAtEnd);
        }

        let mut seen = HashSet::new();
        let mut stops = Vec::new();
        let mut stop_point_index = Vec::new();

        for (i, point) in points.iter().enumerate() {
            if !(point.lat.is_finite() && point.lng.is_finite()) {
                return Err(RouteError::NonFiniteCoordinate(i));
            }
            if !point.is_stop {
                continue;
            }
            let id = point.id.ok_or(RouteError::MissingStopId(i))?;
            if !seen.insert(id) {
                return Err(RouteError::DuplicateStopId(id));
            }
            stops.push(Stop {
                id,
                name: point.name.clone(),
                lat: point.lat,
                lng: point.lng,
            });
            stop_point_index.push(i);
        }

        Ok(Self {
            route_id: route_id.to_string(),
            points: points.iter().map(RoutePoint::coordinate).collect(),
            stops,
            stop_point_index,
        })
    }

    /// Convenience constructor for a route without interpolated waypoints.
    pub fn from_stops(route_id: &str, stops: &[Stop]) -> Result<Self, RouteError> {
        let points: Vec<RoutePoint> = stops.iter().map(RoutePoint::from_stop).collect();
        Self::from_points(route_id, &points)
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// Every point of the polyline, stops and waypoints, in route order.
    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn waypoint_count(&self) -> usize {
        self.points.len() - self.stops.len()
    }

    pub fn first_stop(&self) -> &Stop {
        &self.stops[0]
    }

    pub fn last_stop(&self) -> &Stop {
        &self.stops[self.stops.len() - 1]
    }

    pub fn stop_by_id(&self, stop_id: u32) -> Option<&Stop> {
        self.stops.iter().find(|s| s.id == stop_id)
    }

    /// Position of a stop in the polyline.
    pub fn stop_point_index(&self, stop_index: usize) -> Option<usize> {
        self.stop_point_index.get(stop_index).copied()
    }

    /// Index of the stop adjacent to `index` in the direction of travel.
    pub fn step(&self, index: usize, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Forward => (index + 1 < self.stops.len()).then_some(index + 1),
            Direction::Backward => index.checked_sub(1),
        }
    }

    /// Whether `index` is the last stop reached when travelling `direction`.
    pub fn is_terminal(&self, index: usize, direction: Direction) -> bool {
        self.step(index, direction).is_none()
    }

    /// Converts back to the on-disk point list.
    pub fn to_points(&self) -> Vec<RoutePoint> {
        let mut stop_at = self.stop_point_index.iter().zip(&self.stops).peekable();
        let mut waypoint_no = 0;
        self.points
            .iter()
            .enumerate()
            .map(|(i, c)| match stop_at.peek() {
                Some((idx, stop)) if **idx == i => {
                    let point = RoutePoint::from_stop(stop);
                    stop_at.next();
                    point
                }
                _ => {
                    waypoint_no += 1;
                    RoutePoint::waypoint(format!("WP_{waypoint_no}"), *c)
                }
            })
            .collect()
    }
}

/// On-disk route file: route id to ordered points.
pub type RouteFile = BTreeMap<String, Vec<RoutePoint>>;

/// Reads a route file, keeping every route that validates.
///
/// Invalid routes are logged and skipped so one bad entry cannot prevent the
/// rest of the network from serving.
pub fn load_routes(path: &str) -> Result<Vec<Route>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading route file '{path}'"))?;
    let file: RouteFile =
        serde_json::from_str(&content).with_context(|| format!("parsing route file '{path}'"))?;
    Ok(routes_from_file(&file))
}

pub fn routes_from_file(file: &RouteFile) -> Vec<Route> {
    let mut routes = Vec::new();
    for (route_id, points) in file {
        match Route::from_points(route_id, points) {
            Ok(route) => {
                info!(
                    route_id = %route_id,
                    stops = route.stops().len(),
                    waypoints = route.waypoint_count(),
                    "Route loaded"
                );
                routes.push(route);
            }
            Err(e) => warn!(route_id = %route_id, error = %e, "Skipping invalid route"),
        }
    }
    routes
}

/// Writes routes back out in the on-disk format.
pub fn save_routes(path: &str, routes: &[Route]) -> Result<()> {
    let file: RouteFile = routes
        .iter()
        .map(|r| (r.route_id.clone(), r.to_points()))
        .collect();
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json).with_context(|| format!("writing route file '{path}'"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points_extracts_stops_in_order() {
        let route = Route::from_points("r", &sample_points()).unwrap();
        let ids: Vec<u32> = route.stops().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(route.points().len(), 5);
        assert_eq!(route.waypoint_count(), 2);
        assert_eq!(route.stop_point_index(1), Some(2));
        assert_eq!(route.stop_point_index(2), Some(4));
    }

    #[test]
    fn test_from_points_rejects_waypoint_at_end() {
        let mut points = sample_points();
        points.push(RoutePoint::waypoint("WP".into(), Coordinate::new(1.0, 1.0)));
        assert_eq!(
            Route::from_points("r", &points).unwrap_err(),
            RouteError::WaypointAtEnd
        );
    }

    #[test]
    fn test_from_points_rejects_duplicate_ids() {
        let mut points = sample_points();
        points[4].id = Some(1);
        assert_eq!(
            Route::from_points("r", &points).unwrap_err(),
            RouteError::DuplicateStopId(1)
        );
    }

    #[test]
    fn test_from_points_rejects_empty() {
        assert_eq!(Route::from_points("r", &[]).unwrap_err(), RouteError::NoStops);
    }

    #[test]
    fn test_from_points_rejects_non_finite_coordinates() {
        let mut points = sample_points();
        points[2].lat = f64::NAN;
        assert_eq!(
            Route::from_points("r", &points).unwrap_err(),
            RouteError::NonFiniteCoordinate(2)
        );

        let mut points = sample_points();
        points[3] = RoutePoint::waypoint("WP_2_1".into(), Coordinate::new(0.015, f64::INFINITY));
        assert_eq!(
            Route::from_points("r", &points).unwrap_err(),
            RouteError::NonFiniteCoordinate(3)
        );
    }

    #[test]
    fn test_routes_from_file_skips_non_finite_route() {
        let mut bad = sample_points();
        bad[0].lng = f64::NEG_INFINITY;
        let file: RouteFile = [
            ("good".to_string(), sample_points()),
            ("bad".to_string(), bad),
        ]
        .into_iter()
        .collect();

        let routes = routes_from_file(&file);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].route_id, "good");
    }

    #[test]
    fn test_step_and_terminal() {
        let route = Route::from_points("r", &sample_points()).unwrap();
        assert_eq!(route.step(0, Direction::Forward), Some(1));
        assert_eq!(route.step(2, Direction::Forward), None);
        assert_eq!(route.step(0, Direction::Backward), None);
        assert_eq!(route.step(2, Direction::Backward), Some(1));
        assert!(route.is_terminal(2, Direction::Forward));
        assert!(route.is_terminal(0, Direction::Backward));
        assert!(!route.is_terminal(1, Direction::Backward));
    }

    #[test]
    fn test_to_points_preserves_layout() {
        let route = Route::from_points("r", &sample_points()).unwrap();
        let points = route.to_points();
        let flags: Vec<bool> = points.iter().map(|p| p.is_stop).collect();
        assert_eq!(flags, vec![true, false, true, false, true]);
        assert_eq!(points[2].id, Some(2));
    }

    #[test]
    fn test_is_stop_defaults_to_true() {
        let point: RoutePoint =
            serde_json::from_str(r#"{"id": 4, "name": "Simakkal", "lat": 9.92, "lng": 78.12}"#)
                .unwrap();
        assert!(point.is_stop);
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Direction::Backward).unwrap(),
            "\"backward\""
        );
    }

    fn sample_points() -> Vec<RoutePoint> {
        vec![
            stop_point(1, 0.0),
            RoutePoint::waypoint("WP_1_1".into(), Coordinate::new(0.005, 0.0)),
            stop_point(2, 0.01),
            RoutePoint::waypoint("WP_2_1".into(), Coordinate::new(0.015, 0.0)),
            stop_point(3, 0.02),
        ]
    }

    fn stop_point(id: u32, lat: f64) -> RoutePoint {
        RoutePoint {
            id: Some(id),
            name: format!("Stop {id}"),
            lat,
            lng: 0.0,
            is_stop: true,
        }
    }
}
