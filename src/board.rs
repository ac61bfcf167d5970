use dashmap::DashMap;
use std::collections::BTreeMap;

/// Count of passengers waiting at each stop, per route.
#[derive(Default)]
pub struct WaitingBoard {
    routes: DashMap<String, BTreeMap<u32, usize>>,
}

impl WaitingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts the count at a stop and returns the new value. Decrements
    /// stop at zero.
    pub fn mark(&self, route_id: &str, stop_id: u32, is_waiting: bool) -> usize {
        let mut route = self.routes.entry(route_id.to_string()).or_default();
        let count = route.entry(stop_id).or_default();
        *count = if is_waiting {
            *count + 1
        } else {
            count.saturating_sub(1)
        };
        *count
    }

    pub fn route(&self, route_id: &str) -> BTreeMap<u32, usize> {
        self.routes
            .get(route_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}
