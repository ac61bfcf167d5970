//! Offline use of a road-routing service: measuring stop-to-stop road
//! distances for the distance tables, and densifying routes with waypoints
//! that follow the road.
//!
//! Nothing here runs while serving live traffic.

mod http;
pub mod osrm;

pub use http::{BasicClient, HttpClient};
pub use osrm::OsrmClient;

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::distances::RouteProfiles;
use crate::geo::{Coordinate, sample_waypoints};
use crate::model::{Route, RoutePoint};

/// Pause between consecutive calls to the routing service.
pub const CALL_PAUSE: Duration = Duration::from_millis(800);

/// Legs shorter than this are not worth a routing call.
const MIN_ROUTED_LEG_KM: f64 = 0.05;
/// Legs shorter than this get no intermediate waypoints.
const MIN_DENSIFIED_LEG_KM: f64 = 0.2;
/// A routed leg longer than this multiple of its straight line is discarded.
const MAX_LEG_RATIO: f64 = 2.5;
/// A routed route longer than this multiple of its straight line is discarded.
const MAX_ROUTE_RATIO: f64 = 1.8;
/// A routed geometry shorter than this multiple of its straight line is discarded.
const MIN_GEOMETRY_RATIO: f64 = 0.5;

/// Road distance and shape between two points.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedLeg {
    pub distance_km: f64,
    pub geometry: Vec<Coordinate>,
}

#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn leg(&self, from: &Coordinate, to: &Coordinate) -> Result<RoutedLeg>;
}

/// Road distance of every stop-to-stop segment of `route`.
///
/// Fails when any call fails or the routed total is implausibly long, in
/// which case the caller keeps its straight-line fallback for this route.
#[instrument(skip(service, route), fields(route_id = %route.route_id))]
pub async fn measure_segments<S: RoutingService + ?Sized>(
    service: &S,
    route: &Route,
    pause: Duration,
) -> Result<Vec<f64>> {
    let stops = route.stops();
    let mut segments = Vec::with_capacity(stops.len().saturating_sub(1));
    let mut straight_total = 0.0;
    let mut calls = 0;

    for pair in stops.windows(2) {
        let (from, to) = (pair[0].coordinate(), pair[1].coordinate());
        let straight = from.distance_km(&to);
        straight_total += straight;

        if straight < MIN_ROUTED_LEG_KM {
            segments.push(straight);
            continue;
        }

        if calls > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        calls += 1;

        let leg = service.leg(&from, &to).await?;
        if leg.distance_km > straight * MAX_LEG_RATIO {
            warn!(
                from = pair[0].id,
                to = pair[1].id,
                routed_km = leg.distance_km,
                straight_km = straight,
                "Routed leg implausibly long, using straight line"
            );
            segments.push(straight);
        } else {
            segments.push(leg.distance_km);
        }
    }

    let total: f64 = segments.iter().sum();
    if total > straight_total * MAX_ROUTE_RATIO {
        bail!(
            "routed total {total:.2} km exceeds {MAX_ROUTE_RATIO}x straight-line {straight_total:.2} km"
        );
    }

    info!(total_km = total, calls, "Segments measured");
    Ok(segments)
}

/// Fills in `segments_km` for every route whose profile has no usable
/// segments. Routes the service cannot measure are left unchanged.
pub async fn measure_missing_segments<S: RoutingService + ?Sized>(
    service: &S,
    routes: &[Route],
    profiles: &mut RouteProfiles,
    pause: Duration,
) -> usize {
    let mut measured = 0;
    for route in routes {
        let mut profile = profiles.get(&route.route_id);
        if profile.segments().is_some() || route.stops().len() < 2 {
            continue;
        }
        match measure_segments(service, route, pause).await {
            Ok(segments) => {
                profile.segments_km = Some(segments);
                profiles.insert(&route.route_id, profile);
                measured += 1;
            }
            Err(e) => warn!(
                route_id = %route.route_id,
                error = %e,
                "Routing failed, route keeps straight-line fallback"
            ),
        }
    }
    measured
}

/// Rebuilds `route` with waypoints sampled from the road geometry between
/// consecutive stops, at about `per_km` waypoints per kilometre.
///
/// Existing waypoints are discarded. Legs the service cannot route keep only
/// their stops.
#[instrument(skip(service, route), fields(route_id = %route.route_id))]
pub async fn densify_route<S: RoutingService + ?Sized>(
    service: &S,
    route: &Route,
    per_km: f64,
    pause: Duration,
) -> Result<Route> {
    let stops = route.stops();
    let mut points = Vec::new();
    let mut added = 0;
    let mut calls = 0;

    for (i, stop) in stops.iter().enumerate() {
        points.push(RoutePoint::from_stop(stop));
        let Some(next) = stops.get(i + 1) else {
            break;
        };

        let (from, to) = (stop.coordinate(), next.coordinate());
        let straight = from.distance_km(&to);
        if straight <= MIN_DENSIFIED_LEG_KM {
            continue;
        }

        if calls > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        calls += 1;

        let leg = match service.leg(&from, &to).await {
            Ok(leg) => leg,
            Err(e) => {
                warn!(from = stop.id, to = next.id, error = %e, "Leg not routed, keeping stops only");
                continue;
            }
        };
        if straight > 0.1 && leg.distance_km < straight * MIN_GEOMETRY_RATIO {
            warn!(from = stop.id, to = next.id, "Routed geometry too short, keeping stops only");
            continue;
        }

        let sampled = sample_waypoints(&leg.geometry, per_km, leg.distance_km);
        // The ends of a leg's geometry are the stops themselves.
        let inner = sampled.len().saturating_sub(1);
        for at in sampled.iter().take(inner).skip(1) {
            added += 1;
            points.push(RoutePoint::waypoint(format!("WP_{added}"), *at));
        }
    }

    info!(stops = stops.len(), waypoints = added, "Route densified");
    Ok(Route::from_points(&route.route_id, &points)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stop;
    use std::sync::Mutex;

    /// Answers every leg with `ratio` times its straight line, along a
    /// straight geometry of `samples` points.
    struct FakeRouter {
        ratio: f64,
        samples: usize,
        fail_on_call: Option<usize>,
        calls: Mutex<usize>,
    }

    impl FakeRouter {
        fn new(ratio: f64) -> Self {
            Self {
                ratio,
                samples: 50,
                fail_on_call: None,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl RoutingService for FakeRouter {
        async fn leg(&self, from: &Coordinate, to: &Coordinate) -> Result<RoutedLeg> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.fail_on_call == Some(call) {
                bail!("connection refused");
            }
            let geometry = (0..=self.samples)
                .map(|i| {
                    let t = i as f64 / self.samples as f64;
                    Coordinate::new(
                        from.lat + (to.lat - from.lat) * t,
                        from.lng + (to.lng - from.lng) * t,
                    )
                })
                .collect();
            Ok(RoutedLeg {
                distance_km: from.distance_km(to) * self.ratio,
                geometry,
            })
        }
    }

    #[tokio::test]
    async fn test_measure_uses_routed_distance() {
        let route = three_stop_route();
        let router = FakeRouter::new(1.2);
        let segments = measure_segments(&router, &route, Duration::ZERO).await.unwrap();

        let stops = route.stops();
        assert_eq!(segments.len(), 2);
        let expected = stops[0].coordinate().distance_km(&stops[1].coordinate()) * 1.2;
        assert!((segments[0] - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_implausible_leg_replaced_then_total_rejected() {
        let route = three_stop_route();
        // Every leg 3x: each is replaced by its straight line, total is fine.
        let segments = measure_segments(&FakeRouter::new(3.0), &route, Duration::ZERO)
            .await
            .unwrap();
        let stops = route.stops();
        assert!((segments[0] - stops[0].coordinate().distance_km(&stops[1].coordinate())).abs() < 1e-9);

        // Every leg 2x: kept per leg, but the total is over 1.8x.
        assert!(
            measure_segments(&FakeRouter::new(2.0), &route, Duration::ZERO)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_failed_call_leaves_profile_alone() {
        let routes = vec![three_stop_route()];
        let mut profiles = RouteProfiles::default();
        let router = FakeRouter {
            fail_on_call: Some(2),
            ..FakeRouter::new(1.1)
        };

        let measured = measure_missing_segments(&router, &routes, &mut profiles, Duration::ZERO).await;
        assert_eq!(measured, 0);
        assert!(profiles.get("t").segments().is_none());
    }

    #[tokio::test]
    async fn test_measured_segments_stored_in_profile() {
        let routes = vec![three_stop_route()];
        let mut profiles = RouteProfiles::default();
        let measured =
            measure_missing_segments(&FakeRouter::new(1.1), &routes, &mut profiles, Duration::ZERO)
                .await;
        assert_eq!(measured, 1);
        assert_eq!(profiles.get("t").segments().map(<[f64]>::len), Some(2));
    }

    #[tokio::test]
    async fn test_densify_adds_inner_waypoints() {
        let route = three_stop_route();
        let dense = densify_route(&FakeRouter::new(1.0), &route, 10.0, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(dense.stops(), route.stops());
        assert!(dense.waypoint_count() > 0);
        // Waypoints lie on the straight legs, so the polyline length is unchanged.
        let before = crate::geo::path_length_km(route.points());
        let after = crate::geo::path_length_km(dense.points());
        assert!((before - after).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_densify_survives_failing_leg() {
        let route = three_stop_route();
        let router = FakeRouter {
            fail_on_call: Some(1),
            ..FakeRouter::new(1.0)
        };
        let dense = densify_route(&router, &route, 10.0, Duration::ZERO).await.unwrap();
        assert_eq!(dense.stops().len(), 3);
        let first_leg_end = dense.stop_point_index(1).unwrap();
        assert_eq!(first_leg_end, 1);
    }

    /// Three stops roughly 1.1 km apart along a meridian.
    fn three_stop_route() -> Route {
        let stops: Vec<Stop> = (0..3)
            .map(|i| Stop {
                id: i + 1,
                name: format!("Stop {}", i + 1),
                lat: 9.90 + i as f64 * 0.01,
                lng: 78.1,
            })
            .collect();
        Route::from_stops("t", &stops).unwrap()
    }
}
