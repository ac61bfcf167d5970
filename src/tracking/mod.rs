//! Live bus tracking: recent-position history, route-aware distance,
//! direction and next-stop resolution, progress, and the per-bus registry.

pub mod direction;
pub mod history;
pub mod metric;
pub mod progress;
pub mod registry;

pub use direction::{DirectionResolver, NextStop, Resolution, StopMarker, TargetRule};
pub use history::{PositionHistory, Sample};
pub use metric::RouteMetric;
pub use progress::{distance_from_start, progress_pct, route_total_km};
pub use registry::{BusInfo, BusLiveState, BusRecord, BusRegistry, PendingArrival};
