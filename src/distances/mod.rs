//! Directional stop-distance tables.
//!
//! Each route gets a [`RouteDistanceTable`] mapping stop ids to their
//! cumulative distance from the forward origin and from the backward origin.
//! Tables are built once ([`build`]), persisted ([`store`]) and only read
//! while serving.

pub mod build;
pub mod profiles;
pub mod store;

pub use build::{BuildError, build_route_table, build_tables};
pub use profiles::{RouteKind, RouteProfile, RouteProfiles};
pub use store::{load_or_build, load_tables, save_tables};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::model::Direction;

/// Accuracy tier of a table, decided by which inputs the build had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceSource {
    /// Per-segment road distances supplied externally.
    AuthoritativeSegments,
    /// A verified route total spread over segments by straight-line share.
    ProportionalScaled,
    /// Straight-line segments inflated by the route kind's factor.
    HaversineFallback,
}

/// Cumulative distances of one stop, in kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopDistance {
    pub forward: f64,
    pub backward: f64,
}

/// The directional distance table of a single route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDistanceTable {
    pub route_id: String,
    pub source: DistanceSource,
    pub total_km: f64,
    pub stops: BTreeMap<u32, StopDistance>,
}

impl RouteDistanceTable {
    /// Builds the table from forward cumulative distances, deriving every
    /// backward distance as `total - forward`.
    pub fn from_forward(
        route_id: &str,
        source: DistanceSource,
        total_km: f64,
        forward: impl IntoIterator<Item = (u32, f64)>,
    ) -> Self {
        let stops = forward
            .into_iter()
            .map(|(id, fwd)| {
                (
                    id,
                    StopDistance {
                        forward: fwd,
                        backward: total_km - fwd,
                    },
                )
            })
            .collect();

        Self {
            route_id: route_id.to_string(),
            source,
            total_km,
            stops,
        }
    }

    /// Distance of `stop_id` from the origin of `direction`.
    pub fn distance(&self, stop_id: u32, direction: Direction) -> Option<f64> {
        self.stops.get(&stop_id).map(|d| match direction {
            Direction::Forward => d.forward,
            Direction::Backward => d.backward,
        })
    }

    pub fn forward(&self, stop_id: u32) -> Option<f64> {
        self.distance(stop_id, Direction::Forward)
    }
}

/// All route tables, keyed by route id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceTables {
    pub routes: HashMap<String, RouteDistanceTable>,
}

impl DistanceTables {
    pub fn get(&self, route_id: &str) -> Option<&RouteDistanceTable> {
        self.routes.get(route_id)
    }

    pub fn insert(&mut self, table: RouteDistanceTable) {
        self.routes.insert(table.route_id.clone(), table);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
