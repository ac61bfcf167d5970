//! Per-route fan-out of live events to subscribers.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::seats::Assignment;
use crate::tracking::BusInfo;

/// Buffered events per route before slow subscribers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A bus position as broadcast to the other subscribers of its route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusBroadcast {
    pub bus_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(flatten)]
    pub info: BusInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouteEvent {
    BusUpdate(BusBroadcast),
    BusRemoved { bus_id: String },
    BusCount { count: usize },
    /// A seat was booked directly.
    ReservationUpdate {
        bus_id: String,
        available_seats: usize,
        message: String,
    },
    /// A waiting passenger was given a seat.
    ReservationAssigned(Assignment),
    WaitingUpdate { stop_id: u32, count: usize },
}

/// Broadcast channels keyed by route id, created on first use.
pub struct RouteHub {
    channels: DashMap<String, broadcast::Sender<RouteEvent>>,
    capacity: usize,
}

impl Default for RouteHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl RouteHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, route_id: &str) -> broadcast::Receiver<RouteEvent> {
        self.sender(route_id).subscribe()
    }

    /// Sends `event` to the route's subscribers, returning how many got it.
    pub fn publish(&self, route_id: &str, event: RouteEvent) -> usize {
        match self.sender(route_id).send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(route_id, "No subscribers for route event");
                0
            }
        }
    }

    fn sender(&self, route_id: &str) -> broadcast::Sender<RouteEvent> {
        self.channels
            .entry(route_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}
