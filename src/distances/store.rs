//! Persistence for directional distance tables.
//!
//! Tables are stored as a single JSON document so a restart can skip the
//! precompute step entirely.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use super::{DistanceTables, RouteDistanceTable, RouteProfiles, build_tables};
use crate::model::Route;

const SCHEMA_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedTables {
    schema_version: u8,
    generated_at: DateTime<Utc>,
    routes: HashMap<String, RouteDistanceTable>,
}

/// Writes `tables` to `path` as pretty-printed JSON.
pub fn save_tables(path: &str, tables: &DistanceTables) -> Result<()> {
    let doc = PersistedTables {
        schema_version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        routes: tables.routes.clone(),
    };
    let json = serde_json::to_string_pretty(&doc)?;
    std::fs::write(path, json).with_context(|| format!("writing distance tables '{path}'"))?;
    info!(path, routes = tables.len(), "Distance tables saved");
    Ok(())
}

/// Reads tables from `path`, rejecting files from another schema version or
/// whose directional distances are negative or do not add up to their route
/// total.
pub fn load_tables(path: &str) -> Result<DistanceTables> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading distance tables '{path}'"))?;
    let doc: PersistedTables = serde_json::from_str(&content)
        .with_context(|| format!("parsing distance tables '{path}'"))?;

    if doc.schema_version != SCHEMA_VERSION {
        bail!(
            "distance tables '{path}' have schema version {}, expected {SCHEMA_VERSION}",
            doc.schema_version
        );
    }

    for table in doc.routes.values() {
        for (stop_id, d) in &table.stops {
            if d.forward < -1e-6 || d.backward < -1e-6 {
                bail!(
                    "route '{}' stop {stop_id}: negative distance",
                    table.route_id
                );
            }
            if (d.forward + d.backward - table.total_km).abs() > 1e-6 {
                bail!(
                    "route '{}' stop {stop_id}: forward + backward != total",
                    table.route_id
                );
            }
        }
    }

    info!(path, routes = doc.routes.len(), "Distance tables loaded");
    Ok(DistanceTables { routes: doc.routes })
}

/// Loads cached tables, rebuilding and re-saving them when the cache is
/// absent, unreadable, or `force` is set.
pub fn load_or_build(
    path: &str,
    routes: &[Route],
    profiles: &RouteProfiles,
    force: bool,
) -> Result<DistanceTables> {
    if !force && Path::new(path).exists() {
        match load_tables(path) {
            Ok(tables) => return Ok(tables),
            Err(e) => warn!(path, error = %e, "Distance cache unusable, rebuilding"),
        }
    }

    let tables = build_tables(routes, profiles);
    save_tables(path, &tables)?;
    Ok(tables)
}
