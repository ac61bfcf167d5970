//! The read-only route network served by the tracker.

use std::collections::HashMap;

use crate::distances::{DistanceTables, RouteDistanceTable};
use crate::model::Route;

/// Routes plus their directional distance tables.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it while
/// serving, so reads need no locking.
#[derive(Debug, Default)]
pub struct RouteNetwork {
    routes: HashMap<String, Route>,
    tables: DistanceTables,
}

impl RouteNetwork {
    pub fn new(routes: Vec<Route>, tables: DistanceTables) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|r| (r.route_id.clone(), r))
                .collect(),
            tables,
        }
    }

    pub fn route(&self, route_id: &str) -> Option<&Route> {
        self.routes.get(route_id)
    }

    pub fn table(&self, route_id: &str) -> Option<&RouteDistanceTable> {
        self.tables.get(route_id)
    }

    pub fn route_ids(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn tables(&self) -> &DistanceTables {
        &self.tables
    }
}
