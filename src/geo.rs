//! Geographic primitives: great-circle distance, segment projection and the
//! polyline helpers used when densifying routes offline.

use serde::{Deserialize, Serialize};

/// Mean spherical Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        haversine(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Position of `p` along the segment `a -> b`, as a fraction of its length.
///
/// Uses a local equirectangular frame centred on the segment, which is
/// accurate enough at the scale of a single route segment. `0.0` is `a`,
/// `1.0` is `b`; values outside `[0, 1]` lie beyond an endpoint. Returns
/// `None` for a degenerate segment.
pub fn projection_fraction(p: &Coordinate, a: &Coordinate, b: &Coordinate) -> Option<f64> {
    let scale = ((a.lat + b.lat) / 2.0).to_radians().cos();
    let (bx, by) = ((b.lng - a.lng) * scale, b.lat - a.lat);
    let (px, py) = ((p.lng - a.lng) * scale, p.lat - a.lat);
    let len_sq = bx * bx + by * by;
    if len_sq <= f64::EPSILON {
        return None;
    }
    Some((px * bx + py * by) / len_sq)
}

/// Sum of consecutive great-circle distances along `points`.
pub fn path_length_km(points: &[Coordinate]) -> f64 {
    points.windows(2).map(|w| w[0].distance_km(&w[1])).sum()
}

/// Decodes an encoded polyline (precision 1e5) into coordinates.
///
/// Truncated input yields the points decoded so far.
pub fn decode_polyline(encoded: &str) -> Vec<Coordinate> {
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let (mut lat, mut lng) = (0i64, 0i64);
    let mut coordinates = Vec::new();

    while index < bytes.len() {
        let Some(dlat) = next_polyline_value(bytes, &mut index) else {
            break;
        };
        let Some(dlng) = next_polyline_value(bytes, &mut index) else {
            break;
        };
        lat += dlat;
        lng += dlng;
        coordinates.push(Coordinate::new(lat as f64 / 1e5, lng as f64 / 1e5));
    }

    coordinates
}

fn next_polyline_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut result = 0i64;
    let mut shift = 0;
    loop {
        let b = (*bytes.get(*index)? as i64) - 63;
        *index += 1;
        result |= (b & 0x1f) << shift;
        shift += 5;
        if b < 0x20 {
            break;
        }
    }
    Some(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}

/// Thins a dense leg geometry down to roughly `per_km` points per kilometre.
///
/// Legs shorter than 50 m are returned untouched. The last input point is
/// always kept.
pub fn sample_waypoints(geometry: &[Coordinate], per_km: f64, leg_km: f64) -> Vec<Coordinate> {
    if geometry.is_empty() || leg_km <= 0.0 {
        return Vec::new();
    }
    if leg_km < 0.05 {
        return geometry.to_vec();
    }

    let target = ((leg_km * per_km) as usize).max(1);
    if geometry.len() <= target {
        return geometry.to_vec();
    }

    let step = geometry.len() as f64 / target as f64;
    let mut sampled: Vec<Coordinate> = (0..target)
        .map(|i| (i as f64 * step) as usize)
        .filter(|&idx| idx < geometry.len())
        .map(|idx| geometry[idx])
        .collect();

    if let (Some(last_sampled), Some(last)) = (sampled.last(), geometry.last()) {
        if last_sampled != last {
            sampled.push(*last);
        }
    }

    sampled
}
