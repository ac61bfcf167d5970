//! Arrival-time prediction.
//!
//! The tracker only needs `predict(distance, traffic) -> minutes`; the
//! trained model is optional and the deterministic fallback is always
//! available.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Free-flow bus speed assumed by the fallback estimate.
pub const BASE_SPEED_KMH: f64 = 30.0;

/// Shortest ETA a trained model may report.
pub const MIN_MODEL_MINUTES: f64 = 0.5;

pub trait EtaModel: Send + Sync {
    /// Minutes to cover `distance_km` at the given traffic level.
    fn predict(&self, distance_km: f64, traffic_level: f64) -> f64;
}

/// Fixed-speed estimate slowed down by the traffic level.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackEta;

impl EtaModel for FallbackEta {
    fn predict(&self, distance_km: f64, traffic_level: f64) -> f64 {
        let speed = if traffic_level > 0.0 {
            BASE_SPEED_KMH / traffic_level
        } else {
            BASE_SPEED_KMH
        };
        distance_km / speed * 60.0
    }
}

/// Linear regression over `[distance_km, traffic_level]`.
///
/// ```json
/// { "weights": [2.1, 1.4], "bias": 0.3 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearEta {
    pub weights: [f64; 2],
    pub bias: f64,
}

impl LinearEta {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading ETA model '{path}'"))?;
        let model: Self =
            serde_json::from_str(&content).with_context(|| format!("parsing ETA model '{path}'"))?;
        if !model.weights.iter().all(|w| w.is_finite()) || !model.bias.is_finite() {
            bail!("ETA model '{path}' has non-finite coefficients");
        }
        Ok(model)
    }
}

impl EtaModel for LinearEta {
    fn predict(&self, distance_km: f64, traffic_level: f64) -> f64 {
        let minutes =
            self.weights[0] * distance_km + self.weights[1] * traffic_level + self.bias;
        if !minutes.is_finite() {
            warn!(distance_km, traffic_level, "ETA model produced a non-finite value");
            return distance_km / BASE_SPEED_KMH * 60.0;
        }
        minutes.max(MIN_MODEL_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_scales_with_traffic() {
        let eta = FallbackEta;
        assert_eq!(eta.predict(15.0, 1.0), 30.0);
        assert_eq!(eta.predict(15.0, 2.0), 60.0);
        assert_eq!(eta.predict(15.0, 0.0), 30.0);
    }

    #[test]
    fn test_linear_floor() {
        let eta = LinearEta {
            weights: [2.0, 1.0],
            bias: -5.0,
        };
        assert_eq!(eta.predict(1.0, 1.0), MIN_MODEL_MINUTES);
        assert_eq!(eta.predict(4.0, 1.0), 4.0);
    }

    #[test]
    fn test_linear_non_finite_input_falls_back() {
        let eta = LinearEta {
            weights: [2.0, 1.0],
            bias: 0.0,
        };
        let minutes = eta.predict(3.0, f64::INFINITY);
        assert_eq!(minutes, 6.0);
    }

    #[test]
    fn test_load_model_file() {
        let path = format!("{}/bus_tracker_test_eta.json", std::env::temp_dir().display());
        std::fs::write(&path, r#"{"weights": [2.5, 0.8], "bias": 1.0}"#).unwrap();
        let eta = LinearEta::load(&path).unwrap();
        assert_eq!(eta.weights, [2.5, 0.8]);
        std::fs::remove_file(&path).unwrap();
    }
}
