//! The live tracking service.
//!
//! [`Tracker`] owns every piece of live state (bus registry, seat ledger,
//! waiting board, route-distance memo, event hub) and is shared by handle
//! with every connection handler. Handlers never fail on degraded input:
//! invalid events are dropped and unknown routes, buses or stops come back
//! as [`LookupError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::board::WaitingBoard;
use crate::config::TrackerConfig;
use crate::eta::{EtaModel, FallbackEta};
use crate::geo::Coordinate;
use crate::hub::{BusBroadcast, RouteEvent, RouteHub};
use crate::journal::{ArrivalRecord, Journal, LocationRecord, ReservationRecord};
use crate::model::Route;
use crate::network::RouteNetwork;
use crate::query::{self, RemainingDistance};
use crate::seats::{Assignment, Reservation, ReservationOutcome, SeatLedger, WaitingRequest};
use crate::tracking::registry::lock;
use crate::tracking::{
    BusInfo, BusLiveState, BusRecord, BusRegistry, DirectionResolver, PendingArrival, RouteMetric,
    distance_from_start, progress_pct, route_total_km,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("Route {0} not found")]
    RouteNotFound(String),
    #[error("Bus {0} not found")]
    BusNotFound(String),
    #[error("Stop {0} not found")]
    StopNotFound(u32),
}

/// A location event as received, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLocationEvent {
    pub route_id: Option<String>,
    pub bus_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub traffic_level: Option<f64>,
    pub driver_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawLocationEvent {
    /// Returns `None` when a required field is missing, empty or not a
    /// finite number. Traffic defaults to 1 and the timestamp to now.
    pub fn validate(self) -> Option<LocationReport> {
        let route_id = self.route_id.filter(|s| !s.is_empty())?;
        let bus_id = self.bus_id.filter(|s| !s.is_empty())?;
        let lat = self.lat.filter(|v| v.is_finite())?;
        let lng = self.lng.filter(|v| v.is_finite())?;
        Some(LocationReport {
            route_id,
            bus_id,
            driver_id: self.driver_id,
            at: Coordinate::new(lat, lng),
            traffic_level: self
                .traffic_level
                .filter(|t| t.is_finite() && *t >= 0.0)
                .unwrap_or(1.0),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// A validated location report.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationReport {
    pub route_id: String,
    pub bus_id: String,
    pub driver_id: Option<String>,
    pub at: Coordinate,
    pub traffic_level: f64,
    pub timestamp: DateTime<Utc>,
}

/// What the reporting bus gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationOutcome {
    #[serde(flatten)]
    pub info: BusInfo,
    pub waiting_passengers: BTreeMap<u32, usize>,
    /// Whether the update was broadcast to the route's passengers.
    pub broadcast: bool,
}

/// Sanity figures for one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteCheck {
    pub route_id: String,
    pub stops: usize,
    pub waypoints: usize,
    pub straight_line_km: f64,
    pub total_km: f64,
    pub has_table: bool,
}

pub struct Tracker {
    network: Arc<RouteNetwork>,
    config: TrackerConfig,
    metric: RouteMetric,
    buses: BusRegistry,
    seats: SeatLedger,
    board: WaitingBoard,
    hub: RouteHub,
    eta: Box<dyn EtaModel>,
    journal: Option<Journal>,
}

impl Tracker {
    pub fn new(network: Arc<RouteNetwork>, config: TrackerConfig) -> Self {
        Self {
            metric: RouteMetric::new(config.memo_capacity, config.memo_evict),
            buses: BusRegistry::new(config.clone()),
            seats: SeatLedger::new(config.seats_per_bus),
            board: WaitingBoard::new(),
            hub: RouteHub::default(),
            eta: Box::new(FallbackEta),
            journal: None,
            network,
            config,
        }
    }

    pub fn with_eta(mut self, eta: Box<dyn EtaModel>) -> Self {
        self.eta = eta;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn network(&self) -> &RouteNetwork {
        &self.network
    }

    pub fn hub(&self) -> &RouteHub {
        &self.hub
    }

    fn route(&self, route_id: &str) -> Result<&Route, LookupError> {
        self.network
            .route(route_id)
            .ok_or_else(|| LookupError::RouteNotFound(route_id.to_string()))
    }

    /// Validates and applies a raw location event. Invalid events and events
    /// for unknown routes are dropped.
    pub fn ingest(&self, event: RawLocationEvent) -> Option<LocationOutcome> {
        let report = event.validate()?;
        match self.handle_location(report) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "Location event dropped");
                None
            }
        }
    }

    /// Applies one location report: speed, direction, next stop, progress,
    /// ETA, arrival bookkeeping, journaling and broadcast.
    pub fn handle_location(&self, report: LocationReport) -> Result<LocationOutcome, LookupError> {
        let route = self.route(&report.route_id)?;
        let handle = self.buses.checkout(&report.bus_id, &report.route_id);
        self.apply_location(route, &handle, &report)
    }

    fn apply_location(
        &self,
        route: &Route,
        handle: &Mutex<BusRecord>,
        report: &LocationReport,
    ) -> Result<LocationOutcome, LookupError> {
        let route_id = report.route_id.as_str();
        let bus_id = report.bus_id.as_str();
        let at = report.at;

        let mut record = lock(handle);
        // Disconnected or moved to another route while this report waited.
        if record.is_closed() {
            return Err(LookupError::BusNotFound(bus_id.to_string()));
        }
        if report.driver_id.is_some() {
            record.driver_id = report.driver_id.clone();
        }

        record.history.push(at, report.timestamp);
        let speed_kmh = record
            .history
            .speed_kmh(self.config.min_speed_window_secs, self.config.max_speed_kmh);

        let resolver = DirectionResolver::new(route, &self.metric, &self.config);
        let previous = record.direction;
        let mut marker = record.marker;
        let Some(resolution) = resolver.resolve(&record.history, previous, &mut marker) else {
            return Err(LookupError::BusNotFound(bus_id.to_string()));
        };
        record.marker = marker;
        record.direction = Some(resolution.direction);
        if previous.is_some_and(|p| p != resolution.direction) {
            info!(route_id, bus_id, direction = %resolution.direction, "Bus changed direction");
        }

        let direction = resolution.direction;
        let distance_from_start_km = distance_from_start(
            &self.metric,
            route,
            &mut record.forward_origin,
            &at,
            direction,
        );
        let total_km = route_total_km(&self.metric, route, self.network.table(route_id));
        let progress = progress_pct(distance_from_start_km, total_km);

        let stops = route.stops();
        let target = &stops[resolution.target.stop_index];
        let distance_to_stop_km = resolution.target.distance_km;
        let eta_minutes = self.eta.predict(distance_to_stop_km, report.traffic_level);

        self.seats.update_bus(route_id, bus_id, distance_from_start_km);
        let available_seats = self.seats.available_seats(route_id, bus_id);
        let is_full = self.seats.is_flagged_full(route_id, bus_id) || available_seats == 0;

        let current_stop = resolution.at_stop.map(|i| &stops[i]);
        let info = BusInfo {
            speed_kmh,
            next_stop_id: target.id,
            next_stop_name: target.name.clone(),
            distance_to_stop_km,
            eta_minutes,
            distance_from_start_km,
            progress_pct: progress,
            direction,
            direction_symbol: direction.symbol(),
            stops_passed: record.marker.map(|m| m.stop_index).unwrap_or(0),
            total_stops: stops.len(),
            current_stop_id: current_stop.map(|s| s.id),
            current_stop_name: current_stop.map(|s| s.name.clone()),
            is_full,
            available_seats,
        };

        // Arrival at a stop settles the ETA announced for it.
        let arrival = current_stop.and_then(|stop| {
            let pending = record.pending_arrivals.remove(&stop.id)?;
            let elapsed = report.timestamp - pending.predicted_at;
            Some(ArrivalRecord {
                timestamp: report.timestamp,
                route_id: route_id.to_string(),
                bus_id: bus_id.to_string(),
                driver_id: record.driver_id.clone().unwrap_or_else(|| "N/A".to_string()),
                stop_id: stop.id,
                stop_name: stop.name.clone(),
                predicted_time_min: pending.predicted_minutes,
                actual_time_min: elapsed.num_milliseconds() as f64 / 60_000.0,
                distance_km: distance_to_stop_km,
                distance_from_start_km,
                speed_kmh,
                available_seats,
            })
        });
        if distance_to_stop_km > self.config.at_stop_km {
            record
                .pending_arrivals
                .entry(target.id)
                .or_insert(PendingArrival {
                    predicted_minutes: eta_minutes,
                    predicted_at: report.timestamp,
                });
        }

        let journal_location = self.journal.is_some() && record.first_sighting(&at);
        let driver_id = record.driver_id.clone();

        record.live = Some(BusLiveState {
            lat: at.lat,
            lng: at.lng,
            traffic_level: report.traffic_level,
            updated_at: report.timestamp,
            info: info.clone(),
        });

        // Published under the record lock so a concurrent disconnect's
        // removal event always comes after it.
        let broadcast = !is_full;
        if broadcast {
            self.hub.publish(
                route_id,
                RouteEvent::BusUpdate(BusBroadcast {
                    bus_id: bus_id.to_string(),
                    lat: at.lat,
                    lng: at.lng,
                    info: info.clone(),
                }),
            );
        }
        drop(record);

        debug!(
            route_id,
            bus_id,
            %direction,
            next_stop = target.id,
            distance_to_stop_km,
            distance_from_start_km,
            progress_pct = progress,
            speed_kmh,
            rule = ?resolution.target.rule,
            "Location update"
        );

        if let Some(journal) = &self.journal {
            if journal_location {
                let row = LocationRecord {
                    timestamp: report.timestamp,
                    route_id: route_id.to_string(),
                    bus_id: bus_id.to_string(),
                    driver_id: driver_id.unwrap_or_else(|| "N/A".to_string()),
                    latitude: at.lat,
                    longitude: at.lng,
                    traffic_level: report.traffic_level,
                    nearest_stop_id: target.id,
                    nearest_stop_name: target.name.clone(),
                    distance_to_stop_km,
                    distance_from_start_km,
                    speed_kmh,
                    available_seats,
                };
                if let Err(e) = journal.location(&row) {
                    warn!(error = %e, "Failed to journal location");
                }
            }
            if let Some(row) = &arrival {
                info!(route_id, bus_id, stop_id = row.stop_id, "Arrival recorded");
                if let Err(e) = journal.arrival(row) {
                    warn!(error = %e, "Failed to journal arrival");
                }
            }
        }

        self.publish_bus_count(route_id);

        Ok(LocationOutcome {
            info,
            waiting_passengers: self.board.route(route_id),
            broadcast,
        })
    }

    /// Remaining distance from a bus to a passenger's stop.
    pub fn passenger_distance(
        &self,
        route_id: &str,
        bus_id: &str,
        stop_id: u32,
    ) -> Result<RemainingDistance, LookupError> {
        let route = self.route(route_id)?;
        let not_found = || LookupError::BusNotFound(bus_id.to_string());

        let handle = self.buses.get(bus_id).ok_or_else(not_found)?;
        let (direction, bus_km) = {
            let record = lock(&handle);
            if record.route_id != route_id {
                return Err(not_found());
            }
            let live = record.live.as_ref().ok_or_else(not_found)?;
            (live.info.direction, live.info.distance_from_start_km)
        };

        let stop = route
            .stop_by_id(stop_id)
            .ok_or(LookupError::StopNotFound(stop_id))?;
        let stop_km = query::stop_distance(self.network.table(route_id), stop_id, direction);
        let (distance_to_stop_km, status) = query::remaining(stop_km, bus_km);

        Ok(RemainingDistance {
            route_id: route_id.to_string(),
            bus_id: bus_id.to_string(),
            stop_id,
            stop_name: stop.name.clone(),
            distance_to_stop_km,
            bus_distance_from_start_km: bus_km,
            stop_distance_from_start_km: stop_km,
            direction,
            status,
        })
    }

    pub fn reserve(
        &self,
        route_id: &str,
        passenger_name: &str,
        session_id: &str,
        preferred_bus_id: Option<&str>,
    ) -> Result<ReservationOutcome, LookupError> {
        self.route(route_id)?;
        let outcome = self
            .seats
            .reserve(route_id, passenger_name, session_id, preferred_bus_id);

        if let (true, Some(bus_id)) = (outcome.success, outcome.bus_id.as_deref()) {
            self.journal_reservation(route_id, bus_id, passenger_name, session_id);
            self.hub.publish(
                route_id,
                RouteEvent::ReservationUpdate {
                    bus_id: bus_id.to_string(),
                    available_seats: outcome.seats_left,
                    message: outcome.message.clone(),
                },
            );
            self.publish_bus_count(route_id);
        }
        Ok(outcome)
    }

    /// Cancels a session's reservation or waiting entry on a route. Returns
    /// whether there was anything to cancel.
    pub fn cancel(&self, route_id: &str, session_id: &str) -> Result<bool, LookupError> {
        self.route(route_id)?;
        match self.seats.cancel(route_id, session_id) {
            Some(assigned) => {
                self.publish_assignments(route_id, &assigned);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies a driver's fullness flag and updates what passengers see.
    pub fn capacity_update(
        &self,
        route_id: &str,
        bus_id: &str,
        is_full: bool,
    ) -> Result<Vec<Assignment>, LookupError> {
        self.route(route_id)?;
        let assigned = self.seats.set_full(route_id, bus_id, is_full);
        self.publish_assignments(route_id, &assigned);

        let available_seats = self.seats.available_seats(route_id, bus_id);
        let shown = self.refresh_seats(route_id, bus_id, is_full, available_seats);

        if is_full {
            self.hub.publish(
                route_id,
                RouteEvent::BusRemoved {
                    bus_id: bus_id.to_string(),
                },
            );
        } else if let Some(broadcast) = shown.filter(|b| !b.info.is_full) {
            self.hub.publish(route_id, RouteEvent::BusUpdate(broadcast));
        }
        self.publish_bus_count(route_id);
        Ok(assigned)
    }

    /// Ends tracking of a bus (explicit leave or lost connection), removing
    /// all of its live state at once.
    pub fn disconnect_bus(&self, bus_id: &str) -> Option<String> {
        let route_id = self.buses.remove(bus_id, |record| {
            self.seats.deactivate_bus(&record.route_id, bus_id);
            self.hub.publish(
                &record.route_id,
                RouteEvent::BusRemoved {
                    bus_id: bus_id.to_string(),
                },
            );
            record.route_id.clone()
        })?;
        self.publish_bus_count(&route_id);
        Some(route_id)
    }

    /// Drops a passenger session's reservations and waiting entries on
    /// every route, giving freed seats to waiting passengers.
    pub fn release_session(&self, session_id: &str) -> usize {
        let affected = self.seats.release_session(session_id);
        for (route_id, assigned) in &affected {
            self.publish_assignments(route_id, assigned);
        }
        if !affected.is_empty() {
            info!(session_id, routes = affected.len(), "Passenger session released");
        }
        affected.len()
    }

    /// Marks a passenger as waiting (or no longer waiting) at a stop.
    pub fn passenger_waiting(
        &self,
        route_id: &str,
        stop_id: u32,
        is_waiting: bool,
    ) -> Result<usize, LookupError> {
        let route = self.route(route_id)?;
        route
            .stop_by_id(stop_id)
            .ok_or(LookupError::StopNotFound(stop_id))?;
        let count = self.board.mark(route_id, stop_id, is_waiting);
        self.hub
            .publish(route_id, RouteEvent::WaitingUpdate { stop_id, count });
        Ok(count)
    }

    /// Buses passengers can currently board on a route.
    pub fn active_buses(&self, route_id: &str) -> Result<Vec<BusBroadcast>, LookupError> {
        self.route(route_id)?;
        Ok(self
            .buses
            .on_route(route_id)
            .into_iter()
            .filter(|(bus_id, _)| self.seats.is_open(route_id, bus_id))
            .map(|(bus_id, live)| {
                let mut info = live.info;
                info.available_seats = self.seats.available_seats(route_id, &bus_id);
                BusBroadcast {
                    bus_id,
                    lat: live.lat,
                    lng: live.lng,
                    info,
                }
            })
            .collect())
    }

    pub fn reservations(&self, route_id: &str, bus_id: &str) -> Vec<Reservation> {
        self.seats.reservations(route_id, bus_id)
    }

    pub fn waiting_list(&self, route_id: &str) -> Vec<WaitingRequest> {
        self.seats.waiting(route_id)
    }

    /// Straight-line versus route length figures for a route.
    pub fn route_check(&self, route_id: &str) -> Result<RouteCheck, LookupError> {
        let route = self.route(route_id)?;
        let table = self.network.table(route_id);
        Ok(RouteCheck {
            route_id: route_id.to_string(),
            stops: route.stops().len(),
            waypoints: route.waypoint_count(),
            straight_line_km: route
                .first_stop()
                .coordinate()
                .distance_km(&route.last_stop().coordinate()),
            total_km: route_total_km(&self.metric, route, table),
            has_table: table.is_some(),
        })
    }

    fn refresh_seats(
        &self,
        route_id: &str,
        bus_id: &str,
        flagged_full: bool,
        available_seats: usize,
    ) -> Option<BusBroadcast> {
        let handle = self.buses.get(bus_id)?;
        let mut record = lock(&handle);
        if record.route_id != route_id {
            return None;
        }
        let live = record.live.as_mut()?;
        live.info.available_seats = available_seats;
        live.info.is_full = flagged_full || available_seats == 0;
        Some(BusBroadcast {
            bus_id: bus_id.to_string(),
            lat: live.lat,
            lng: live.lng,
            info: live.info.clone(),
        })
    }

    fn publish_assignments(&self, route_id: &str, assigned: &[Assignment]) {
        for a in assigned {
            info!(route_id, bus_id = %a.bus_id, session_id = %a.session_id, "Waiting passenger assigned");
            self.journal_reservation(route_id, &a.bus_id, &a.passenger_name, &a.session_id);
            self.hub
                .publish(route_id, RouteEvent::ReservationAssigned(a.clone()));
        }
        if !assigned.is_empty() {
            self.publish_bus_count(route_id);
        }
    }

    fn publish_bus_count(&self, route_id: &str) {
        let count = self
            .buses
            .on_route(route_id)
            .iter()
            .filter(|(bus_id, _)| self.seats.is_open(route_id, bus_id))
            .count();
        self.hub.publish(route_id, RouteEvent::BusCount { count });
    }

    fn journal_reservation(
        &self,
        route_id: &str,
        bus_id: &str,
        passenger_name: &str,
        session_id: &str,
    ) {
        let Some(journal) = &self.journal else {
            return;
        };
        let row = ReservationRecord {
            timestamp: Utc::now(),
            route_id: route_id.to_string(),
            bus_id: bus_id.to_string(),
            passenger_name: passenger_name.to_string(),
            session_id: session_id.to_string(),
        };
        if let Err(e) = journal.reservation(&row) {
            warn!(error = %e, "Failed to journal reservation");
        }
    }
}
