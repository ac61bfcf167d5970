use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Road character of a route, used to pick a straight-line inflation factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    City,
    Highway,
    #[default]
    Unknown,
}

impl RouteKind {
    pub fn default_factor(&self) -> f64 {
        match self {
            RouteKind::City => 1.07,
            RouteKind::Highway => 1.25,
            RouteKind::Unknown => 1.15,
        }
    }
}

/// Distance inputs known for one route.
///
/// ```json
/// {
///   "segments_km": [0.046, 0.775, 1.465],
///   "total_distance_km": 17.6,
///   "kind": "city"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteProfile {
    #[serde(default)]
    pub segments_km: Option<Vec<f64>>,
    #[serde(default)]
    pub total_distance_km: Option<f64>,
    #[serde(default)]
    pub kind: RouteKind,
    #[serde(default)]
    pub fallback_factor: Option<f64>,
}

impl RouteProfile {
    pub fn factor(&self) -> f64 {
        self.fallback_factor
            .unwrap_or_else(|| self.kind.default_factor())
    }

    /// Segments usable as authoritative input. An empty list or one starting
    /// with a zero-length segment is treated as absent.
    pub fn segments(&self) -> Option<&[f64]> {
        match self.segments_km.as_deref() {
            Some(s) if !s.is_empty() && s[0] > 0.0 => Some(s),
            _ => None,
        }
    }

    pub fn verified_total(&self) -> Option<f64> {
        self.total_distance_km.filter(|t| t.is_finite() && *t > 0.0)
    }
}

/// Maps route ids to their [`RouteProfile`], stored as a JSON object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteProfiles {
    entries: HashMap<String, RouteProfile>,
}

impl RouteProfiles {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading route profiles '{path}'"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing route profiles '{path}'"))
    }

    /// Returns the profile for `route_id`, or an `unknown`-kind default.
    pub fn get(&self, route_id: &str) -> RouteProfile {
        self.entries.get(route_id).cloned().unwrap_or_default()
    }

    pub fn insert(&mut self, route_id: &str, profile: RouteProfile) {
        self.entries.insert(route_id.to_string(), profile);
    }
}
