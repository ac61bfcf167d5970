//! Offline replay of recorded GPS fixes through the live tracker.

use anyhow::{Context, Result};
use bus_tracker::hub::RouteEvent;
use bus_tracker::tracker::{RawLocationEvent, Tracker};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// One row of a fixes file.
///
/// ```text
/// timestamp,route_id,bus_id,lat,lng,traffic_level
/// 2024-01-01T08:00:00Z,R1,BUS1,9.9252,78.1198,1.2
/// ```
#[derive(Debug, Deserialize)]
pub struct Fix {
    pub timestamp: Option<DateTime<Utc>>,
    pub route_id: Option<String>,
    pub bus_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub traffic_level: Option<f64>,
}

impl From<Fix> for RawLocationEvent {
    fn from(fix: Fix) -> Self {
        RawLocationEvent {
            route_id: fix.route_id,
            bus_id: fix.bus_id,
            lat: fix.lat,
            lng: fix.lng,
            traffic_level: fix.traffic_level,
            driver_id: None,
            timestamp: fix.timestamp,
        }
    }
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub fixes: usize,
    pub applied: usize,
    pub dropped: usize,
    pub events: usize,
    /// Buses seen per route.
    pub buses: BTreeMap<String, BTreeSet<String>>,
}

pub fn read_fixes(path: &str) -> Result<Vec<Fix>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening fixes file '{path}'"))?;

    let mut fixes = Vec::new();
    for (line, row) in reader.deserialize::<Fix>().enumerate() {
        match row {
            Ok(fix) => fixes.push(fix),
            Err(e) => warn!(path, line = line + 2, error = %e, "Skipping unreadable fix"),
        }
    }
    Ok(fixes)
}

/// Feeds every fix to `tracker` in file order, logging the outcome of each
/// and the route events it triggered.
#[tracing::instrument(skip(tracker, fixes), fields(fixes = fixes.len()))]
pub fn replay(tracker: &Tracker, fixes: Vec<Fix>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let mut receivers: BTreeMap<String, broadcast::Receiver<RouteEvent>> = tracker
        .network()
        .route_ids()
        .map(|id| (id.to_string(), tracker.hub().subscribe(id)))
        .collect();

    for fix in fixes {
        summary.fixes += 1;
        let event = RawLocationEvent::from(fix);
        let ids = (event.route_id.clone(), event.bus_id.clone());

        match tracker.ingest(event) {
            Some(outcome) => {
                summary.applied += 1;
                let (Some(route_id), Some(bus_id)) = ids else {
                    continue;
                };
                info!(
                    route_id = %route_id,
                    bus_id = %bus_id,
                    direction = %outcome.info.direction,
                    next_stop = %outcome.info.next_stop_name,
                    distance_to_stop_km = outcome.info.distance_to_stop_km,
                    eta_minutes = outcome.info.eta_minutes,
                    progress_pct = outcome.info.progress_pct,
                    speed_kmh = outcome.info.speed_kmh,
                    "Bus update"
                );
                summary.events += drain_events(&route_id, &mut receivers);
                summary.buses.entry(route_id).or_default().insert(bus_id);
            }
            None => summary.dropped += 1,
        }
    }

    info!(
        applied = summary.applied,
        dropped = summary.dropped,
        events = summary.events,
        "Replay finished"
    );
    summary
}

fn drain_events(
    route_id: &str,
    receivers: &mut BTreeMap<String, broadcast::Receiver<RouteEvent>>,
) -> usize {
    let Some(rx) = receivers.get_mut(route_id) else {
        return 0;
    };
    let mut count = 0;
    loop {
        match rx.try_recv() {
            Ok(event) => {
                count += 1;
                match serde_json::to_string(&event) {
                    Ok(json) => debug!(route_id, event = %json, "Route event"),
                    Err(e) => warn!(route_id, error = %e, "Unserializable route event"),
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(route_id, missed, "Route events lagged");
            }
            Err(_) => break,
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_tracker::config::TrackerConfig;
    use bus_tracker::distances::{RouteProfiles, build_tables};
    use bus_tracker::model::{Route, Stop};
    use bus_tracker::network::RouteNetwork;
    use std::env;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn test_read_fixes_skips_bad_rows() {
        let path = env::temp_dir().join("bus_tracker_replay_fixes.csv");
        fs::write(
            &path,
            "timestamp,route_id,bus_id,lat,lng,traffic_level\n\
             2024-01-01T08:00:00Z,m,B1,0.0005,78.0,1.0\n\
             2024-01-01T08:00:20Z,m,B1,not-a-number,78.0,1.0\n\
             2024-01-01T08:00:40Z,m,B1,0.0015,78.0,\n",
        )
        .unwrap();

        let fixes = read_fixes(path.to_str().unwrap()).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[1].traffic_level, None);
    }

    #[test]
    fn test_replay_counts_applied_and_dropped() {
        let tracker = tracker();
        let fixes = vec![
            fix("m", "B1", Some(0.0005)),
            fix("m", "B1", None),
            fix("elsewhere", "B2", Some(0.0)),
            fix("m", "B1", Some(0.0015)),
        ];

        let summary = replay(&tracker, fixes);
        assert_eq!(summary.fixes, 4);
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.dropped, 2);
        assert!(summary.events >= 2);
        assert_eq!(summary.buses["m"].len(), 1);
    }

    fn fix(route_id: &str, bus_id: &str, lat: Option<f64>) -> Fix {
        Fix {
            timestamp: Some(Utc::now()),
            route_id: Some(route_id.to_string()),
            bus_id: Some(bus_id.to_string()),
            lat,
            lng: Some(78.0),
            traffic_level: None,
        }
    }

    fn tracker() -> Tracker {
        let stops: Vec<Stop> = (0..4)
            .map(|i| Stop {
                id: i + 1,
                name: format!("Stop {}", i + 1),
                lat: i as f64 * 0.001,
                lng: 78.0,
            })
            .collect();
        let routes = vec![Route::from_stops("m", &stops).unwrap()];
        let tables = build_tables(&routes, &RouteProfiles::default());
        Tracker::new(
            Arc::new(RouteNetwork::new(routes, tables)),
            TrackerConfig::default(),
        )
    }
}
