use super::metric::RouteMetric;
use crate::distances::RouteDistanceTable;
use crate::geo::Coordinate;
use crate::model::{Direction, Route};

/// Distance travelled from the origin of `direction` to `at`, along the route.
///
/// The forward origin is pinned in `forward_origin` on first use so later
/// reports of the same bus measure from the same place. Backward progress is
/// always measured from the last stop.
pub fn distance_from_start(
    metric: &RouteMetric,
    route: &Route,
    forward_origin: &mut Option<Coordinate>,
    at: &Coordinate,
    direction: Direction,
) -> f64 {
    let origin = match direction {
        Direction::Forward => *forward_origin.get_or_insert_with(|| route.first_stop().coordinate()),
        Direction::Backward => route.last_stop().coordinate(),
    };
    metric.distance(route, &origin, at)
}

/// Total length used as the 100% mark: the table total when there is one,
/// otherwise the route-aware first-to-last stop distance.
pub fn route_total_km(
    metric: &RouteMetric,
    route: &Route,
    table: Option<&RouteDistanceTable>,
) -> f64 {
    match table {
        Some(t) => t.total_km,
        None => metric.distance(
            route,
            &route.first_stop().coordinate(),
            &route.last_stop().coordinate(),
        ),
    }
}

/// Share of `total_km` covered, clamped to `[0, 100]`.
pub fn progress_pct(distance_km: f64, total_km: f64) -> f64 {
    if total_km <= 0.0 {
        return 0.0;
    }
    (distance_km / total_km * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distances::DistanceSource;
    use crate::model::{RoutePoint, Stop};

    #[test]
    fn test_forward_progress_is_monotonic() {
        let route = waypoint_route();
        let metric = RouteMetric::new(5000, 1000);
        let mut origin = None;

        let mut last = -1.0;
        for step in 0..=200 {
            let at = Coordinate::new(step as f64 * 0.00005, 78.0);
            let km = distance_from_start(&metric, &route, &mut origin, &at, Direction::Forward);
            assert!(km >= last - 1e-9, "step {step}: {km} < {last}");
            last = km;
        }
        assert_eq!(origin, Some(route.first_stop().coordinate()));
    }

    #[test]
    fn test_backward_measures_from_last_stop() {
        let route = waypoint_route();
        let metric = RouteMetric::new(5000, 1000);
        let mut origin = None;

        let at = Coordinate::new(0.008, 78.0);
        let km = distance_from_start(&metric, &route, &mut origin, &at, Direction::Backward);
        assert!((km - at.distance_km(&route.last_stop().coordinate())).abs() < 1e-6);
        assert_eq!(origin, None);
    }

    #[test]
    fn test_pinned_origin_is_reused() {
        let route = waypoint_route();
        let metric = RouteMetric::new(5000, 1000);
        let mut origin = Some(Coordinate::new(0.002, 78.0));

        let at = Coordinate::new(0.005, 78.0);
        let km = distance_from_start(&metric, &route, &mut origin, &at, Direction::Forward);
        assert!((km - Coordinate::new(0.002, 78.0).distance_km(&at)).abs() < 1e-6);
    }

    #[test]
    fn test_progress_pct_clamped() {
        assert_eq!(progress_pct(4.5, 9.0), 50.0);
        assert_eq!(progress_pct(12.0, 9.0), 100.0);
        assert_eq!(progress_pct(-1.0, 9.0), 0.0);
        assert_eq!(progress_pct(1.0, 0.0), 0.0);
    }

    #[test]
    fn test_total_prefers_table() {
        let route = waypoint_route();
        let metric = RouteMetric::new(5000, 1000);
        let table = RouteDistanceTable::from_forward(
            "w",
            DistanceSource::ProportionalScaled,
            1.5,
            [(1, 0.0), (2, 0.7), (3, 1.5)],
        );

        assert_eq!(route_total_km(&metric, &route, Some(&table)), 1.5);
        let derived = route_total_km(&metric, &route, None);
        assert!((derived - route.first_stop().coordinate().distance_km(&route.last_stop().coordinate())).abs() < 1e-6);
    }

    /// Three stops along a meridian with a waypoint every 0.001 degrees.
    fn waypoint_route() -> Route {
        let stops = [stop(1, 0.0), stop(2, 0.005), stop(3, 0.010)];
        let mut points = Vec::new();
        for i in 0..=10 {
            let lat = i as f64 * 0.001;
            match stops.iter().find(|s| (s.lat - lat).abs() < 1e-12) {
                Some(s) => points.push(RoutePoint::from_stop(s)),
                None => points.push(RoutePoint::waypoint(
                    format!("WP_{i}"),
                    Coordinate::new(lat, 78.0),
                )),
            }
        }
        Route::from_points("w", &points).unwrap()
    }

    fn stop(id: u32, lat: f64) -> Stop {
        Stop {
            id,
            name: format!("Stop {id}"),
            lat,
            lng: 78.0,
        }
    }
}
