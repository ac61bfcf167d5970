use bus_tracker::config::TrackerConfig;
use bus_tracker::distances::{DistanceSource, RouteProfiles, build_tables, load_or_build};
use bus_tracker::geo::Coordinate;
use bus_tracker::hub::RouteEvent;
use bus_tracker::journal::{ARRIVALS_FILE, Journal, LOCATIONS_FILE};
use bus_tracker::model::{Direction, load_routes};
use bus_tracker::network::RouteNetwork;
use bus_tracker::query::StopStatus;
use bus_tracker::tracker::{LocationReport, LookupError, Tracker};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::env;
use std::fs;
use std::sync::Arc;

const ROUTES: &str = "tests/fixtures/routes.json";
const PROFILES: &str = "tests/fixtures/profiles.json";

#[test]
fn test_tables_from_fixture_network() {
    let routes = load_routes(ROUTES).expect("Failed to load routes");
    assert_eq!(routes.len(), 2);

    let profiles = RouteProfiles::load(PROFILES).expect("Failed to load profiles");
    let tables = build_tables(&routes, &profiles);

    let r1 = tables.get("R1").unwrap();
    assert_eq!(r1.source, DistanceSource::AuthoritativeSegments);
    assert!((r1.total_km - 2.0).abs() < 1e-9);
    assert!((r1.distance(3, Direction::Forward).unwrap() - 1.0).abs() < 1e-9);
    assert!((r1.distance(2, Direction::Backward).unwrap() - 1.5).abs() < 1e-9);

    let r2 = tables.get("R2").unwrap();
    assert_eq!(r2.source, DistanceSource::ProportionalScaled);
    assert!((r2.total_km - 2.4).abs() < 1e-9);
    for stop in r2.stops.values() {
        assert!((stop.forward + stop.backward - r2.total_km).abs() < 1e-9);
    }
}

#[test]
fn test_table_cache_survives_restart() {
    let path = env::temp_dir().join("bus_tracker_it_tables.json");
    let path = path.to_str().unwrap();
    fs::remove_file(path).ok();

    let routes = load_routes(ROUTES).unwrap();
    let profiles = RouteProfiles::load(PROFILES).unwrap();
    let built = load_or_build(path, &routes, &profiles, false).unwrap();

    // A second start with no profiles still gets the measured tables back.
    let reloaded = load_or_build(path, &routes, &RouteProfiles::default(), false).unwrap();
    fs::remove_file(path).ok();

    assert_eq!(built.len(), reloaded.len());
    for (route_id, table) in &built.routes {
        let again = reloaded.get(route_id).unwrap();
        assert!((table.total_km - again.total_km).abs() < 1e-9);
    }
    assert_eq!(
        reloaded.get("R1").unwrap().source,
        DistanceSource::AuthoritativeSegments
    );
}

#[test]
fn test_forward_trip_end_to_end() {
    let dir = env::temp_dir().join("bus_tracker_it_journal");
    fs::remove_dir_all(&dir).ok();

    let tracker = tracker(TrackerConfig::default()).with_journal(Journal::open(&dir).unwrap());

    let mut last_km = 0.0;
    let mut last_pct = 0.0;
    let mut updates = 0;
    let mut lat = 9.9005;
    let mut secs = 0;
    while lat < 9.9150 {
        let outcome = tracker
            .handle_location(report("R1", "BUS1", Coordinate::new(lat, 78.0), secs))
            .unwrap();
        assert_eq!(outcome.info.direction, Direction::Forward);
        assert!(outcome.info.distance_from_start_km >= last_km - 1e-9);
        assert!(outcome.info.progress_pct >= last_pct - 1e-9);
        assert!(outcome.info.speed_kmh <= 100.0);
        last_km = outcome.info.distance_from_start_km;
        last_pct = outcome.info.progress_pct;
        updates += 1;
        lat += 0.0005;
        secs += 20;
    }

    let answer = tracker.passenger_distance("R1", "BUS1", 5).unwrap();
    assert_eq!(answer.status, StopStatus::Ahead);
    assert!((answer.stop_distance_from_start_km - 2.0).abs() < 1e-9);
    assert!((answer.distance_to_stop_km - (2.0 - last_km)).abs() < 1e-9);

    let passed = tracker.passenger_distance("R1", "BUS1", 1).unwrap();
    assert_eq!(passed.status, StopStatus::Passed);
    assert_eq!(passed.distance_to_stop_km, 0.0);

    let locations = count_rows(&dir.join(LOCATIONS_FILE));
    let arrivals = count_rows(&dir.join(ARRIVALS_FILE));
    fs::remove_dir_all(&dir).ok();

    assert_eq!(locations, updates);
    assert!(arrivals >= 1);
}

#[test]
fn test_backward_trip_uses_backward_distances() {
    let tracker = tracker(TrackerConfig::default());
    let start = 78.0695;
    for i in 0..6 {
        let lng = start - i as f64 * 0.001;
        tracker
            .handle_location(report("R2", "BUS7", Coordinate::new(9.95, lng), i * 15))
            .unwrap();
    }

    let answer = tracker.passenger_distance("R2", "BUS7", 2).unwrap();
    assert_eq!(answer.direction, Direction::Backward);
    assert_eq!(answer.status, StopStatus::Ahead);
    assert!((answer.stop_distance_from_start_km - 1.2).abs() < 1e-6);

    let behind = tracker.passenger_distance("R2", "BUS7", 3).unwrap();
    assert_eq!(behind.status, StopStatus::Passed);
}

#[test]
fn test_reservations_waitlist_and_reassignment() {
    let config = TrackerConfig {
        seats_per_bus: 2,
        ..Default::default()
    };
    let tracker = tracker(config);
    tracker
        .handle_location(report("R1", "BUS1", Coordinate::new(9.9005, 78.0), 0))
        .unwrap();
    tracker
        .handle_location(report("R1", "BUS2", Coordinate::new(9.9085, 78.0), 0))
        .unwrap();

    for (name, session) in [("Asha", "s1"), ("Bala", "s2"), ("Chitra", "s3"), ("Dev", "s4")] {
        let outcome = tracker.reserve("R1", name, session, None).unwrap();
        assert!(outcome.success, "{name} should get a seat");
    }
    assert_eq!(tracker.reservations("R1", "BUS1").len(), 2);
    assert_eq!(tracker.reservations("R1", "BUS2").len(), 2);
    assert!(tracker.active_buses("R1").unwrap().is_empty());

    let waiting = tracker.reserve("R1", "Esha", "s5", None).unwrap();
    assert!(!waiting.success);
    assert!(waiting.waiting);

    let duplicate = tracker.reserve("R1", "asha", "s9", None).unwrap();
    assert!(!duplicate.success);
    assert!(!duplicate.waiting);
    assert_eq!(tracker.waiting_list("R1").len(), 1);

    let mut rx = tracker.hub().subscribe("R1");
    assert!(tracker.cancel("R1", "s1").unwrap());

    let mut assigned = None;
    while let Ok(event) = rx.try_recv() {
        if let RouteEvent::ReservationAssigned(a) = event {
            assigned = Some(a);
        }
    }
    let assigned = assigned.expect("waiting passenger should be assigned");
    assert_eq!(assigned.passenger_name, "Esha");
    assert_eq!(assigned.bus_id, "BUS1");
    assert!(tracker.waiting_list("R1").is_empty());

    assert_eq!(
        tracker.reserve("R9", "Farah", "s6", None).unwrap_err(),
        LookupError::RouteNotFound("R9".to_string())
    );
}

#[test]
fn test_bus_disconnect_notifies_passengers() {
    let tracker = tracker(TrackerConfig::default());
    tracker
        .handle_location(report("R1", "BUS1", Coordinate::new(9.9005, 78.0), 0))
        .unwrap();
    assert_eq!(tracker.active_buses("R1").unwrap().len(), 1);

    let mut rx = tracker.hub().subscribe("R1");
    assert_eq!(tracker.disconnect_bus("BUS1"), Some("R1".to_string()));

    assert_eq!(
        rx.try_recv().unwrap(),
        RouteEvent::BusRemoved {
            bus_id: "BUS1".to_string()
        }
    );
    assert_eq!(rx.try_recv().unwrap(), RouteEvent::BusCount { count: 0 });
    assert!(tracker.active_buses("R1").unwrap().is_empty());
    assert!(matches!(
        tracker.passenger_distance("R1", "BUS1", 2),
        Err(LookupError::BusNotFound(_))
    ));
}

fn tracker(config: TrackerConfig) -> Tracker {
    let routes = load_routes(ROUTES).unwrap();
    let profiles = RouteProfiles::load(PROFILES).unwrap();
    let tables = build_tables(&routes, &profiles);
    Tracker::new(Arc::new(RouteNetwork::new(routes, tables)), config)
}

fn report(route_id: &str, bus_id: &str, at: Coordinate, secs: i64) -> LocationReport {
    LocationReport {
        route_id: route_id.to_string(),
        bus_id: bus_id.to_string(),
        driver_id: Some("DRV1".to_string()),
        at,
        traffic_level: 1.0,
        timestamp: start() + Duration::seconds(secs),
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap()
}

fn count_rows(path: &std::path::Path) -> usize {
    csv::Reader::from_path(path)
        .map(|mut r| r.records().count())
        .unwrap_or(0)
}
