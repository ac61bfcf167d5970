//! CLI entry point for the bus tracker.
//!
//! Provides subcommands for precomputing directional distance tables,
//! densifying routes with road waypoints, inspecting tables, and replaying
//! recorded GPS fixes through the live tracker.

mod replay;

use anyhow::Result;
use bus_tracker::config::TrackerConfig;
use bus_tracker::distances::{RouteProfiles, load_or_build, load_tables};
use bus_tracker::eta::LinearEta;
use bus_tracker::journal::Journal;
use bus_tracker::model::{load_routes, save_routes};
use bus_tracker::network::RouteNetwork;
use bus_tracker::routing::osrm::DEFAULT_OSRM_URL;
use bus_tracker::routing::{CALL_PAUSE, OsrmClient, densify_route, measure_missing_segments};
use bus_tracker::tracker::Tracker;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bus_tracker")]
#[command(about = "Real-time bus tracking along fixed routes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and persist the directional distance tables
    Precompute {
        /// Route network JSON file
        #[arg(long, default_value = "routes.json")]
        routes: String,

        /// Route profiles JSON file (segments, verified totals, route kinds)
        #[arg(long, default_value = "route_profiles.json")]
        profiles: String,

        /// Where to write the distance tables
        #[arg(short, long, default_value = "route_distances.json")]
        output: String,

        /// Rebuild even when a valid cache exists
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Measure missing segments with an OSRM server
        #[arg(long)]
        osrm_url: Option<String>,
    },
    /// Densify a stops-only route network with waypoints along the road
    Waypoints {
        /// Route network JSON file with stops only
        #[arg(long)]
        stops: String,

        /// Where to write the densified network
        #[arg(short, long, default_value = "routes.json")]
        output: String,

        #[arg(long, default_value = DEFAULT_OSRM_URL)]
        osrm_url: String,

        /// Target number of waypoints per kilometre
        #[arg(long, default_value_t = 10.0)]
        per_km: f64,
    },
    /// Print distance tables and route self-checks
    Table {
        #[arg(long, default_value = "routes.json")]
        routes: String,

        #[arg(long, default_value = "route_distances.json")]
        cache: String,

        /// Only show this route
        #[arg(long)]
        route: Option<String>,
    },
    /// Feed a CSV of recorded fixes through the tracker
    Replay {
        #[arg(long, default_value = "routes.json")]
        routes: String,

        #[arg(long, default_value = "route_distances.json")]
        cache: String,

        /// CSV with columns timestamp,route_id,bus_id,lat,lng,traffic_level
        #[arg(long)]
        fixes: String,

        /// Directory to write CSV journals to
        #[arg(long)]
        journal_dir: Option<String>,

        /// Print every bus's remaining distance to this stop at the end
        #[arg(long)]
        query_stop: Option<u32>,

        /// Linear ETA model JSON file
        #[arg(long)]
        eta_model: Option<String>,

        /// Tracker config JSON file
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bus_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bus_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::try_from_env("RUST_LOG_JSON").unwrap_or_else(|_| EnvFilter::new("debug")),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Precompute {
            routes,
            profiles,
            output,
            force,
            osrm_url,
        } => {
            precompute(&routes, &profiles, &output, force, osrm_url.as_deref()).await?;
        }
        Commands::Waypoints {
            stops,
            output,
            osrm_url,
            per_km,
        } => {
            waypoints(&stops, &output, &osrm_url, per_km).await?;
        }
        Commands::Table {
            routes,
            cache,
            route,
        } => {
            show_tables(&routes, &cache, route.as_deref())?;
        }
        Commands::Replay {
            routes,
            cache,
            fixes,
            journal_dir,
            query_stop,
            eta_model,
            config,
        } => {
            let config = match config {
                Some(path) => TrackerConfig::load(&path)?,
                None => TrackerConfig::default(),
            };
            let mut tracker = Tracker::new(load_network(&routes, &cache)?, config);
            if let Some(path) = eta_model {
                tracker = tracker.with_eta(Box::new(LinearEta::load(&path)?));
            }
            if let Some(dir) = journal_dir {
                tracker = tracker.with_journal(Journal::open(dir)?);
            }

            let fixes = replay::read_fixes(&fixes)?;
            let summary = replay::replay(&tracker, fixes);

            if let Some(stop_id) = query_stop {
                for (route_id, buses) in &summary.buses {
                    for bus_id in buses {
                        match tracker.passenger_distance(route_id, bus_id, stop_id) {
                            Ok(answer) => println!("{}", serde_json::to_string(&answer)?),
                            Err(e) => warn!(route_id = %route_id, bus_id = %bus_id, error = %e, "Query failed"),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Builds the distance tables, measuring missing segments first when a
/// routing server is given. A valid cache is reused unless `force` is set.
#[tracing::instrument(skip(osrm_url))]
async fn precompute(
    routes_path: &str,
    profiles_path: &str,
    output: &str,
    force: bool,
    osrm_url: Option<&str>,
) -> Result<()> {
    let routes = load_routes(routes_path)?;
    let mut profiles = if Path::new(profiles_path).exists() {
        RouteProfiles::load(profiles_path)?
    } else {
        warn!(path = profiles_path, "No route profiles, using defaults");
        RouteProfiles::default()
    };

    if !force && Path::new(output).exists() {
        match load_tables(output) {
            Ok(tables) => {
                info!(path = output, routes = tables.len(), "Valid cache found, nothing to do");
                return Ok(());
            }
            Err(e) => warn!(path = output, error = %e, "Cache unusable, rebuilding"),
        }
    }

    if let Some(url) = osrm_url {
        let client = OsrmClient::new(url)?;
        let measured = measure_missing_segments(&client, &routes, &mut profiles, CALL_PAUSE).await;
        info!(measured, "Segments measured with routing server");
    }

    let tables = load_or_build(output, &routes, &profiles, true)?;
    info!(path = output, routes = tables.len(), "Distance tables written");
    Ok(())
}

/// Rewrites every route with routed waypoints between its stops.
#[tracing::instrument]
async fn waypoints(stops_path: &str, output: &str, osrm_url: &str, per_km: f64) -> Result<()> {
    let routes = load_routes(stops_path)?;
    let client = OsrmClient::new(osrm_url)?;

    let mut dense = Vec::with_capacity(routes.len());
    for route in &routes {
        match densify_route(&client, route, per_km, CALL_PAUSE).await {
            Ok(d) => dense.push(d),
            Err(e) => {
                error!(route_id = %route.route_id, error = %e, "Densifying failed, keeping stops only");
                dense.push(route.clone());
            }
        }
    }

    save_routes(output, &dense)?;
    info!(path = output, routes = dense.len(), "Route network written");
    Ok(())
}

fn show_tables(routes_path: &str, cache: &str, only: Option<&str>) -> Result<()> {
    let network = load_network(routes_path, cache)?;
    let tracker = Tracker::new(Arc::clone(&network), TrackerConfig::default());

    let mut route_ids: Vec<&str> = network
        .route_ids()
        .filter(|id| only.is_none_or(|o| o == *id))
        .collect();
    route_ids.sort_unstable();

    for route_id in route_ids {
        let check = tracker.route_check(route_id)?;
        println!(
            "{route_id}: {} stops, {} waypoints, straight {:.2} km, route {:.2} km",
            check.stops, check.waypoints, check.straight_line_km, check.total_km
        );
        match network.table(route_id) {
            Some(table) => {
                println!("  source: {:?}", table.source);
                for (stop_id, d) in &table.stops {
                    println!("  {stop_id:>4}  fwd {:>7.3}  bwd {:>7.3}", d.forward, d.backward);
                }
            }
            None => println!("  no distance table"),
        }
    }
    Ok(())
}

fn load_network(routes_path: &str, cache: &str) -> Result<Arc<RouteNetwork>> {
    let routes = load_routes(routes_path)?;
    let tables = load_tables(cache)?;
    for route in &routes {
        if tables.get(&route.route_id).is_none() {
            warn!(route_id = %route.route_id, "Route has no distance table");
        }
    }
    Ok(Arc::new(RouteNetwork::new(routes, tables)))
}
