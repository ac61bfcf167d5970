//! Tunables of the live tracker.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Thresholds and bounds used by the live tracking engine.
///
/// Every field has a default, so a config file only needs the values it
/// overrides:
///
/// ```json
/// { "at_stop_km": 0.08, "seats_per_bus": 40 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Radius within which a bus counts as being at a stop.
    pub at_stop_km: f64,
    /// Stops closer than this are skipped when scanning for the next target.
    pub overlap_km: f64,
    /// Number of recent fixes kept per bus.
    pub history_len: usize,
    /// Fixes required before direction is inferred from history.
    pub min_direction_samples: usize,
    /// Minimum time span for a speed estimate.
    pub min_speed_window_secs: f64,
    pub max_speed_kmh: f64,
    pub seats_per_bus: usize,
    /// Route-distance memo size that triggers eviction.
    pub memo_capacity: usize,
    /// Entries dropped per eviction round.
    pub memo_evict: usize,
    /// Location signatures remembered per bus for journal de-duplication.
    pub journal_dedup_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            at_stop_km: 0.100,
            overlap_km: 0.050,
            history_len: 5,
            min_direction_samples: 3,
            min_speed_window_secs: 0.1,
            max_speed_kmh: 100.0,
            seats_per_bus: 50,
            memo_capacity: 5000,
            memo_evict: 1000,
            journal_dedup_window: 200,
        }
    }
}

impl TrackerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading tracker config '{path}'"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing tracker config '{path}'"))
    }
}
