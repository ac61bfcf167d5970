use tracing::{debug, info, warn};

use super::{DistanceSource, DistanceTables, RouteDistanceTable, RouteProfile, RouteProfiles};
use crate::model::Route;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BuildError {
    #[error("route has no stops")]
    EmptyRoute,
    #[error("expected {expected} segments, got {got}")]
    SegmentCountMismatch { expected: usize, got: usize },
    #[error("segment {index} has invalid length {value} km")]
    InvalidSegment { index: usize, value: f64 },
    #[error("invalid fallback factor {0}")]
    InvalidFactor(f64),
}

/// Builds the directional table for one route.
///
/// Inputs are tried in order of accuracy: authoritative segments, then a
/// verified total spread by straight-line share, then straight-line
/// segments scaled by the profile's factor.
pub fn build_route_table(
    route: &Route,
    profile: &RouteProfile,
) -> Result<RouteDistanceTable, BuildError> {
    let stops = route.stops();
    if stops.is_empty() {
        return Err(BuildError::EmptyRoute);
    }
    let expected = stops.len() - 1;

    let straight: Vec<f64> = stops
        .windows(2)
        .map(|w| w[0].coordinate().distance_km(&w[1].coordinate()))
        .collect();
    let straight_total: f64 = straight.iter().sum();

    let (source, segments) = if let Some(segments) = profile.segments() {
        if segments.len() != expected {
            return Err(BuildError::SegmentCountMismatch {
                expected,
                got: segments.len(),
            });
        }
        (DistanceSource::AuthoritativeSegments, segments.to_vec())
    } else if let Some(total) = profile.verified_total() {
        (
            DistanceSource::ProportionalScaled,
            scale_to_total(&straight, straight_total, total),
        )
    } else {
        let factor = profile.factor();
        if !(factor.is_finite() && factor > 0.0) {
            return Err(BuildError::InvalidFactor(factor));
        }
        (
            DistanceSource::HaversineFallback,
            straight.iter().map(|s| s * factor).collect(),
        )
    };

    // Cumulative distances must never decrease.
    if let Some((index, &value)) = segments
        .iter()
        .enumerate()
        .find(|(_, s)| !(s.is_finite() && **s >= 0.0))
    {
        return Err(BuildError::InvalidSegment { index, value });
    }

    let mut cumulative = 0.0;
    let mut forward = Vec::with_capacity(stops.len());
    for (i, stop) in stops.iter().enumerate() {
        if i > 0 {
            cumulative += segments[i - 1];
        }
        forward.push((stop.id, cumulative));
    }

    // Proportional tables must report the verified total exactly, not the
    // re-summed floating point value.
    let total_km = match source {
        DistanceSource::ProportionalScaled => profile.verified_total().unwrap_or(cumulative),
        _ => cumulative,
    };

    Ok(RouteDistanceTable::from_forward(
        &route.route_id,
        source,
        total_km,
        forward,
    ))
}

/// Spreads `total` over segments in proportion to their straight-line share.
fn scale_to_total(straight: &[f64], straight_total: f64, total: f64) -> Vec<f64> {
    if straight.is_empty() {
        return Vec::new();
    }
    if straight_total <= 0.0 {
        return vec![total / straight.len() as f64; straight.len()];
    }
    straight
        .iter()
        .map(|s| s / straight_total * total)
        .collect()
}

/// Builds tables for every route, logging and skipping the ones that fail.
pub fn build_tables(routes: &[Route], profiles: &RouteProfiles) -> DistanceTables {
    let mut tables = DistanceTables::default();

    for route in routes {
        let profile = profiles.get(&route.route_id);
        match build_route_table(route, &profile) {
            Ok(table) => {
                info!(
                    route_id = %route.route_id,
                    stops = table.stops.len(),
                    total_km = table.total_km,
                    source = ?table.source,
                    "Directional table built"
                );
                for (stop_id, d) in &table.stops {
                    debug!(
                        route_id = %route.route_id,
                        stop_id,
                        forward_km = d.forward,
                        backward_km = d.backward,
                        "Stop distance"
                    );
                }
                tables.insert(table);
            }
            Err(e) => {
                warn!(route_id = %route.route_id, error = %e, "Skipping directional table");
            }
        }
    }

    tables
}
