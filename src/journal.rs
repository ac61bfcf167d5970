//! Append-only CSV journals of locations, arrivals and reservations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub const LOCATIONS_FILE: &str = "bus_locations.csv";
pub const ARRIVALS_FILE: &str = "bus_history.csv";
pub const RESERVATIONS_FILE: &str = "seat_reservations.csv";

#[derive(Debug, Clone, Serialize)]
pub struct LocationRecord {
    pub timestamp: DateTime<Utc>,
    pub route_id: String,
    pub bus_id: String,
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub traffic_level: f64,
    pub nearest_stop_id: u32,
    pub nearest_stop_name: String,
    pub distance_to_stop_km: f64,
    pub distance_from_start_km: f64,
    pub speed_kmh: f64,
    pub available_seats: usize,
}

/// Predicted versus observed travel time to a stop.
#[derive(Debug, Clone, Serialize)]
pub struct ArrivalRecord {
    pub timestamp: DateTime<Utc>,
    pub route_id: String,
    pub bus_id: String,
    pub driver_id: String,
    pub stop_id: u32,
    pub stop_name: String,
    pub predicted_time_min: f64,
    pub actual_time_min: f64,
    pub distance_km: f64,
    pub distance_from_start_km: f64,
    pub speed_kmh: f64,
    pub available_seats: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationRecord {
    pub timestamp: DateTime<Utc>,
    pub route_id: String,
    pub bus_id: String,
    pub passenger_name: String,
    pub session_id: String,
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("opening journal '{}'", path.display()))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// The three journals of one tracker, kept in a single directory.
pub struct Journal {
    dir: PathBuf,
    write: Mutex<()>,
}

impl Journal {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating journal directory '{}'", dir.display()))?;
        Ok(Self {
            dir,
            write: Mutex::new(()),
        })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn location(&self, record: &LocationRecord) -> Result<()> {
        self.append(LOCATIONS_FILE, record)
    }

    pub fn arrival(&self, record: &ArrivalRecord) -> Result<()> {
        self.append(ARRIVALS_FILE, record)
    }

    pub fn reservation(&self, record: &ReservationRecord) -> Result<()> {
        self.append(RESERVATIONS_FILE, record)
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        append_record(&self.path(file), record)
    }
}
