//! Passenger remaining-distance queries.
//!
//! Answered entirely from the precomputed directional table and the bus's
//! last computed progress; no route geometry is walked per query.

use serde::Serialize;
use tracing::warn;

use crate::distances::RouteDistanceTable;
use crate::model::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    Ahead,
    Passed,
}

/// Remaining distance from a bus to a passenger's stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemainingDistance {
    pub route_id: String,
    pub bus_id: String,
    pub stop_id: u32,
    pub stop_name: String,
    /// Never negative; a stop already behind the bus reports zero.
    pub distance_to_stop_km: f64,
    pub bus_distance_from_start_km: f64,
    pub stop_distance_from_start_km: f64,
    pub direction: Direction,
    pub status: StopStatus,
}

/// Distance of `stop_id` from the origin of `direction`.
///
/// Falls back to the forward distance, then to zero when the route has no
/// usable table entry.
pub fn stop_distance(table: Option<&RouteDistanceTable>, stop_id: u32, direction: Direction) -> f64 {
    let Some(table) = table else {
        warn!(stop_id, "No distance table for route, using zero");
        return 0.0;
    };
    table
        .distance(stop_id, direction)
        .or_else(|| {
            warn!(route_id = %table.route_id, stop_id, %direction, "Directional distance missing, using forward");
            table.forward(stop_id)
        })
        .unwrap_or(0.0)
}

/// Remaining distance and status for a bus `bus_distance_km` along its
/// direction, against a stop `stop_distance_km` along the same direction.
pub fn remaining(stop_distance_km: f64, bus_distance_km: f64) -> (f64, StopStatus) {
    let remaining = stop_distance_km - bus_distance_km;
    let status = if remaining > 0.0 {
        StopStatus::Ahead
    } else {
        StopStatus::Passed
    };
    (remaining.max(0.0), status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distances::DistanceSource;

    #[test]
    fn test_forward_scenario() {
        let table = scenario_table();
        let stop_km = stop_distance(Some(&table), 3, Direction::Forward);
        assert_eq!(stop_km, 5.0);
        assert_eq!(remaining(stop_km, 3.0), (2.0, StopStatus::Ahead));
    }

    #[test]
    fn test_backward_scenario() {
        let table = scenario_table();
        let stop_km = stop_distance(Some(&table), 3, Direction::Backward);
        assert_eq!(stop_km, 4.0);
        assert_eq!(remaining(stop_km, 1.0), (3.0, StopStatus::Ahead));
    }

    #[test]
    fn test_passed_stop_clamps_to_zero() {
        assert_eq!(remaining(2.0, 3.5), (0.0, StopStatus::Passed));
        assert_eq!(remaining(2.0, 2.0), (0.0, StopStatus::Passed));
    }

    #[test]
    fn test_missing_table_or_stop_is_zero() {
        assert_eq!(stop_distance(None, 3, Direction::Forward), 0.0);
        assert_eq!(stop_distance(Some(&scenario_table()), 42, Direction::Backward), 0.0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&StopStatus::Ahead).unwrap(), "\"ahead\"");
    }

    fn scenario_table() -> RouteDistanceTable {
        RouteDistanceTable::from_forward(
            "r",
            DistanceSource::AuthoritativeSegments,
            9.0,
            [(1, 0.0), (2, 2.0), (3, 5.0), (4, 9.0)],
        )
    }
}
