//! Per-bus ephemeral state.
//!
//! Everything the tracker knows about a connected bus lives in one
//! [`BusRecord`] behind its own mutex, so updates for different buses never
//! contend and a disconnect is a single removal.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::direction::StopMarker;
use super::history::PositionHistory;
use crate::config::TrackerConfig;
use crate::geo::Coordinate;
use crate::model::Direction;

/// Per-report summary sent to the bus's driver and, with its position, to
/// the route's passengers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusInfo {
    pub speed_kmh: f64,
    pub next_stop_id: u32,
    pub next_stop_name: String,
    pub distance_to_stop_km: f64,
    pub eta_minutes: f64,
    pub distance_from_start_km: f64,
    pub progress_pct: f64,
    pub direction: Direction,
    pub direction_symbol: &'static str,
    pub stops_passed: usize,
    pub total_stops: usize,
    pub current_stop_id: Option<u32>,
    pub current_stop_name: Option<String>,
    pub is_full: bool,
    pub available_seats: usize,
}

/// What the rest of the system sees of a bus after its latest report.
#[derive(Debug, Clone, PartialEq)]
pub struct BusLiveState {
    pub lat: f64,
    pub lng: f64,
    pub traffic_level: f64,
    pub updated_at: DateTime<Utc>,
    pub info: BusInfo,
}

/// An ETA announced for a stop, kept until the bus gets there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingArrival {
    pub predicted_minutes: f64,
    pub predicted_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct BusRecord {
    pub bus_id: String,
    pub route_id: String,
    pub driver_id: Option<String>,
    pub live: Option<BusLiveState>,
    pub history: PositionHistory,
    pub direction: Option<Direction>,
    pub marker: Option<StopMarker>,
    /// Forward origin pinned on the first progress computation.
    pub forward_origin: Option<Coordinate>,
    /// Pending ETA per target stop id.
    pub pending_arrivals: HashMap<u32, PendingArrival>,
    journaled: LruCache<(i64, i64), ()>,
    closed: bool,
}

impl BusRecord {
    pub fn new(bus_id: &str, route_id: &str, config: &TrackerConfig) -> Self {
        let window = NonZeroUsize::new(config.journal_dedup_window).unwrap_or(NonZeroUsize::MIN);
        Self {
            bus_id: bus_id.to_string(),
            route_id: route_id.to_string(),
            driver_id: None,
            live: None,
            history: PositionHistory::new(config.history_len),
            direction: None,
            marker: None,
            forward_origin: None,
            pending_arrivals: HashMap::new(),
            journaled: LruCache::new(window),
            closed: false,
        }
    }

    /// Set once the record has been dropped from the registry, by a
    /// disconnect or a route change. Holders of a stale handle must not
    /// apply further reports to it.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether a location at `at` is new for this bus's journal.
    ///
    /// Positions are compared at 1e-6 degrees against the most recent
    /// signatures in the window.
    pub fn first_sighting(&mut self, at: &Coordinate) -> bool {
        let signature = ((at.lat * 1e6).round() as i64, (at.lng * 1e6).round() as i64);
        if self.journaled.contains(&signature) {
            return false;
        }
        self.journaled.put(signature, ());
        true
    }
}

/// A registered bus. The route is kept outside the record lock so lookups
/// never need to lock a record while holding a map shard.
struct Slot {
    route_id: String,
    record: Arc<Mutex<BusRecord>>,
}

/// Owner of every connected bus's record.
pub struct BusRegistry {
    buses: DashMap<String, Slot>,
    config: TrackerConfig,
}

impl BusRegistry {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            buses: DashMap::new(),
            config,
        }
    }

    fn slot(&self, bus_id: &str, route_id: &str) -> Slot {
        Slot {
            route_id: route_id.to_string(),
            record: Arc::new(Mutex::new(BusRecord::new(bus_id, route_id, &self.config))),
        }
    }

    /// Returns the record of `bus_id`, creating it on first report.
    ///
    /// A bus that shows up on a different route starts over with a fresh
    /// record and its old one is closed.
    pub fn checkout(&self, bus_id: &str, route_id: &str) -> Arc<Mutex<BusRecord>> {
        let existing = self
            .buses
            .get(bus_id)
            .filter(|slot| slot.route_id == route_id)
            .map(|slot| Arc::clone(&slot.record));
        if let Some(record) = existing {
            return record;
        }

        let mut replaced = None;
        let record = {
            let mut entry = self.buses.entry(bus_id.to_string()).or_insert_with(|| {
                debug!(bus_id, route_id, "Tracking new bus");
                self.slot(bus_id, route_id)
            });
            if entry.route_id != route_id {
                let old = std::mem::replace(entry.value_mut(), self.slot(bus_id, route_id));
                replaced = Some(old);
            }
            Arc::clone(&entry.record)
        };

        if let Some(old) = replaced {
            lock(&old.record).closed = true;
            info!(bus_id, from = %old.route_id, to = route_id, "Bus changed route, resetting tracking");
        }
        record
    }

    pub fn get(&self, bus_id: &str) -> Option<Arc<Mutex<BusRecord>>> {
        self.buses.get(bus_id).map(|slot| Arc::clone(&slot.record))
    }

    /// Drops every piece of state held for `bus_id`.
    ///
    /// The record is closed and `on_close` runs under its lock, so no report
    /// racing with the removal can be applied after `on_close` has seen it.
    pub fn remove<R>(&self, bus_id: &str, on_close: impl FnOnce(&BusRecord) -> R) -> Option<R> {
        let (_, slot) = self.buses.remove(bus_id)?;
        let mut record = lock(&slot.record);
        record.closed = true;
        let result = on_close(&record);
        drop(record);
        info!(bus_id, route_id = %slot.route_id, "Bus tracking state cleared");
        Some(result)
    }

    /// Snapshots of the buses on `route_id` that have reported at least once.
    pub fn on_route(&self, route_id: &str) -> Vec<(String, BusLiveState)> {
        let records: Vec<Arc<Mutex<BusRecord>>> = self
            .buses
            .iter()
            .filter(|slot| slot.route_id == route_id)
            .map(|slot| Arc::clone(&slot.record))
            .collect();

        let mut buses: Vec<(String, BusLiveState)> = records
            .iter()
            .filter_map(|r| {
                let record = lock(r);
                if record.closed {
                    return None;
                }
                record.live.clone().map(|live| (record.bus_id.clone(), live))
            })
            .collect();
        buses.sort_by(|a, b| a.0.cmp(&b.0));
        buses
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

/// Locks a record, recovering it if a previous holder panicked.
pub fn lock(record: &Mutex<BusRecord>) -> MutexGuard<'_, BusRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}
