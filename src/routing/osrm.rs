use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

use super::http::{BasicClient, HttpClient};
use super::{RoutedLeg, RoutingService};
use crate::geo::{Coordinate, decode_polyline};

pub const DEFAULT_OSRM_URL: &str = "http://router.project-osrm.org";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

#[derive(Deserialize)]
struct RouteEntry {
    /// Metres.
    distance: f64,
    #[serde(default)]
    geometry: Option<String>,
}

/// Driving legs from an OSRM `route/v1` endpoint.
pub struct OsrmClient<C: HttpClient = BasicClient> {
    http: C,
    base_url: String,
}

impl OsrmClient<BasicClient> {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::with_client(BasicClient::new(DEFAULT_TIMEOUT)?, base_url))
    }
}

impl<C: HttpClient> OsrmClient<C> {
    pub fn with_client(http: C, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn leg_url(&self, from: &Coordinate, to: &Coordinate) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=polyline&continue_straight=false",
            self.base_url, from.lng, from.lat, to.lng, to.lat
        )
    }
}

#[async_trait]
impl<C: HttpClient> RoutingService for OsrmClient<C> {
    async fn leg(&self, from: &Coordinate, to: &Coordinate) -> Result<RoutedLeg> {
        let url = self.leg_url(from, to);
        trace!(url = %url, "Requesting route leg");

        let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);
        let resp = self.http.execute(req).await?.error_for_status()?;
        let body: RouteResponse = resp.json().await?;

        if body.code != "Ok" {
            bail!("routing service answered '{}'", body.code);
        }
        let Some(route) = body.routes.into_iter().next() else {
            bail!("routing service returned no route");
        };

        Ok(RoutedLeg {
            distance_km: route.distance / 1000.0,
            geometry: route
                .geometry
                .as_deref()
                .map(decode_polyline)
                .unwrap_or_default(),
        })
    }
}
