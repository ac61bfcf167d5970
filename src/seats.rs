//! Seat reservations, driver capacity flags and the per-route waiting list.
//!
//! Each route has one lock covering all of its buses, so availability checks
//! and assignments on a route are serialized against each other and against
//! capacity updates.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub passenger_name: String,
    pub session_id: String,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitingRequest {
    pub passenger_name: String,
    pub session_id: String,
    pub preferred_bus_id: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Result of a reservation request, as shown to the passenger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationOutcome {
    pub success: bool,
    pub message: String,
    pub bus_id: Option<String>,
    pub seats_left: usize,
    pub waiting: bool,
}

impl ReservationOutcome {
    fn booked(bus_id: &str, seats_left: usize) -> Self {
        Self {
            success: true,
            message: format!("Ticket booked for Bus {bus_id}"),
            bus_id: Some(bus_id.to_string()),
            seats_left,
            waiting: false,
        }
    }

    fn rejected(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            bus_id: None,
            seats_left: 0,
            waiting: false,
        }
    }

    fn waitlisted() -> Self {
        Self {
            waiting: true,
            ..Self::rejected("All buses full. Added to waiting list.")
        }
    }
}

/// A waiting passenger moved onto a bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub bus_id: String,
    pub passenger_name: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default)]
struct BusSeats {
    reservations: Vec<Reservation>,
    driver_full: bool,
    active: bool,
    distance_from_start_km: f64,
}

/// Seat state of one route.
#[derive(Debug)]
struct RouteSeats {
    buses: BTreeMap<String, BusSeats>,
    waiting: VecDeque<WaitingRequest>,
    seats_per_bus: usize,
}

impl RouteSeats {
    fn new(seats_per_bus: usize) -> Self {
        Self {
            buses: BTreeMap::new(),
            waiting: VecDeque::new(),
            seats_per_bus,
        }
    }

    fn available(&self, bus: &BusSeats) -> usize {
        self.seats_per_bus.saturating_sub(bus.reservations.len())
    }

    fn has_capacity(&self, bus_id: &str) -> bool {
        self.buses
            .get(bus_id)
            .is_some_and(|b| b.active && !b.driver_full && self.available(b) > 0)
    }

    /// Buses with capacity, earliest on the route first.
    fn candidates(&self) -> Vec<&str> {
        let mut open: Vec<(&str, f64)> = self
            .buses
            .iter()
            .filter(|(id, _)| self.has_capacity(id))
            .map(|(id, b)| (id.as_str(), b.distance_from_start_km))
            .collect();
        open.sort_by(|a, b| a.1.total_cmp(&b.1));
        open.into_iter().map(|(id, _)| id).collect()
    }

    fn pick(&self, preferred: Option<&str>) -> Option<String> {
        if let Some(p) = preferred.filter(|p| self.has_capacity(p)) {
            return Some(p.to_string());
        }
        self.candidates().first().map(|id| id.to_string())
    }

    fn is_duplicate(&self, passenger_name: &str, session_id: &str) -> Option<&'static str> {
        let name = passenger_name.to_lowercase();
        let reservations = self.buses.values().flat_map(|b| b.reservations.iter());

        let mut by_name = false;
        let mut by_session = false;
        for (n, s) in reservations
            .map(|r| (&r.passenger_name, &r.session_id))
            .chain(self.waiting.iter().map(|w| (&w.passenger_name, &w.session_id)))
        {
            by_name |= n.to_lowercase() == name;
            by_session |= s == session_id;
        }

        if by_name {
            Some("You can only book one ticket per route. You already have a reservation.")
        } else if by_session {
            Some("You already have a reservation on this route")
        } else {
            None
        }
    }

    fn book(&mut self, bus_id: &str, passenger_name: &str, session_id: &str) -> usize {
        let seats_per_bus = self.seats_per_bus;
        let bus = self.buses.entry(bus_id.to_string()).or_default();
        bus.reservations.push(Reservation {
            passenger_name: passenger_name.to_string(),
            session_id: session_id.to_string(),
            reserved_at: Utc::now(),
        });
        seats_per_bus.saturating_sub(bus.reservations.len())
    }

    fn reserve(
        &mut self,
        passenger_name: &str,
        session_id: &str,
        preferred_bus_id: Option<&str>,
    ) -> ReservationOutcome {
        if let Some(message) = self.is_duplicate(passenger_name, session_id) {
            return ReservationOutcome::rejected(message);
        }
        if !self.buses.values().any(|b| b.active) {
            return ReservationOutcome::rejected("No active buses on this route");
        }

        match self.pick(preferred_bus_id) {
            Some(bus_id) => {
                let seats_left = self.book(&bus_id, passenger_name, session_id);
                ReservationOutcome::booked(&bus_id, seats_left)
            }
            None => {
                self.waiting.push_back(WaitingRequest {
                    passenger_name: passenger_name.to_string(),
                    session_id: session_id.to_string(),
                    preferred_bus_id: preferred_bus_id.map(str::to_string),
                    added_at: Utc::now(),
                });
                ReservationOutcome::waitlisted()
            }
        }
    }

    /// Moves waiting passengers onto buses with room, in arrival order.
    fn drain(&mut self) -> Vec<Assignment> {
        let mut assigned = Vec::new();
        while !self.waiting.is_empty() {
            let preferred = self
                .waiting
                .front()
                .and_then(|w| w.preferred_bus_id.clone());
            let Some(bus_id) = self.pick(preferred.as_deref()) else {
                break;
            };
            let Some(request) = self.waiting.pop_front() else {
                break;
            };
            self.book(&bus_id, &request.passenger_name, &request.session_id);
            assigned.push(Assignment {
                bus_id,
                passenger_name: request.passenger_name,
                session_id: request.session_id,
            });
        }
        assigned
    }

    fn drop_session(&mut self, session_id: &str) -> bool {
        let before = self.waiting.len() + self.occupied();
        self.waiting.retain(|w| w.session_id != session_id);
        for bus in self.buses.values_mut() {
            bus.reservations.retain(|r| r.session_id != session_id);
        }
        before != self.waiting.len() + self.occupied()
    }

    fn occupied(&self) -> usize {
        self.buses.values().map(|b| b.reservations.len()).sum()
    }
}

/// Seat ledger for every route.
pub struct SeatLedger {
    routes: DashMap<String, Arc<Mutex<RouteSeats>>>,
    seats_per_bus: usize,
}

impl SeatLedger {
    pub fn new(seats_per_bus: usize) -> Self {
        Self {
            routes: DashMap::new(),
            seats_per_bus,
        }
    }

    pub fn seats_per_bus(&self) -> usize {
        self.seats_per_bus
    }

    fn route(&self, route_id: &str) -> Arc<Mutex<RouteSeats>> {
        Arc::clone(
            self.routes
                .entry(route_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RouteSeats::new(self.seats_per_bus))))
                .value(),
        )
    }

    /// Marks a bus active and records how far along the route it is.
    pub fn update_bus(&self, route_id: &str, bus_id: &str, distance_from_start_km: f64) {
        let route = self.route(route_id);
        let mut seats = lock(&route);
        let bus = seats.buses.entry(bus_id.to_string()).or_default();
        bus.active = true;
        bus.distance_from_start_km = distance_from_start_km;
    }

    /// Takes a bus out of assignment; its existing reservations are kept.
    pub fn deactivate_bus(&self, route_id: &str, bus_id: &str) {
        let route = self.route(route_id);
        if let Some(bus) = lock(&route).buses.get_mut(bus_id) {
            bus.active = false;
        }
    }

    /// Applies a driver's fullness flag. Clearing it drains the waiting list.
    pub fn set_full(&self, route_id: &str, bus_id: &str, is_full: bool) -> Vec<Assignment> {
        let route = self.route(route_id);
        let mut seats = lock(&route);
        seats.buses.entry(bus_id.to_string()).or_default().driver_full = is_full;
        info!(route_id, bus_id, is_full, "Bus capacity flag updated");
        if is_full {
            Vec::new()
        } else {
            seats.drain()
        }
    }

    pub fn reserve(
        &self,
        route_id: &str,
        passenger_name: &str,
        session_id: &str,
        preferred_bus_id: Option<&str>,
    ) -> ReservationOutcome {
        let route = self.route(route_id);
        let outcome = lock(&route).reserve(passenger_name, session_id, preferred_bus_id);
        info!(
            route_id,
            session_id,
            success = outcome.success,
            waiting = outcome.waiting,
            bus_id = ?outcome.bus_id,
            "Reservation request handled"
        );
        outcome
    }

    /// Cancels the session's reservation or waiting entry on a route and
    /// hands freed seats to waiting passengers.
    pub fn cancel(&self, route_id: &str, session_id: &str) -> Option<Vec<Assignment>> {
        let route = self.route(route_id);
        let mut seats = lock(&route);
        if !seats.drop_session(session_id) {
            return None;
        }
        debug!(route_id, session_id, "Reservation cancelled");
        Some(seats.drain())
    }

    /// Removes a session from every route, returning the assignments made
    /// on each route it freed seats on.
    pub fn release_session(&self, session_id: &str) -> Vec<(String, Vec<Assignment>)> {
        let routes: Vec<(String, Arc<Mutex<RouteSeats>>)> = self
            .routes
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();

        let mut affected = Vec::new();
        for (route_id, route) in routes {
            let mut seats = lock(&route);
            if seats.drop_session(session_id) {
                affected.push((route_id, seats.drain()));
            }
        }
        affected
    }

    pub fn available_seats(&self, route_id: &str, bus_id: &str) -> usize {
        let route = self.route(route_id);
        let seats = lock(&route);
        match seats.buses.get(bus_id) {
            Some(bus) => seats.available(bus),
            None => seats.seats_per_bus,
        }
    }

    /// Whether passengers should see the bus: not flagged full and with a
    /// free seat.
    pub fn is_open(&self, route_id: &str, bus_id: &str) -> bool {
        let route = self.route(route_id);
        let seats = lock(&route);
        match seats.buses.get(bus_id) {
            Some(bus) => !bus.driver_full && seats.available(bus) > 0,
            None => seats.seats_per_bus > 0,
        }
    }

    pub fn is_flagged_full(&self, route_id: &str, bus_id: &str) -> bool {
        let route = self.route(route_id);
        let seats = lock(&route);
        seats.buses.get(bus_id).is_some_and(|b| b.driver_full)
    }

    pub fn reservations(&self, route_id: &str, bus_id: &str) -> Vec<Reservation> {
        let route = self.route(route_id);
        let seats = lock(&route);
        seats
            .buses
            .get(bus_id)
            .map(|b| b.reservations.clone())
            .unwrap_or_default()
    }

    pub fn waiting(&self, route_id: &str) -> Vec<WaitingRequest> {
        let route = self.route(route_id);
        let seats = lock(&route);
        seats.waiting.iter().cloned().collect()
    }
}

fn lock(route: &Mutex<RouteSeats>) -> MutexGuard<'_, RouteSeats> {
    route.lock().unwrap_or_else(PoisonError::into_inner)
}
