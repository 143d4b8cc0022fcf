//! Deterministic route estimation from straight-line distance.

use super::{RouteEstimate, RouteError, RouteEstimator};
use crate::domain::{haversine_km, GeoPoint};
use async_trait::async_trait;

/// Average urban driving speed assumed when converting distance to duration.
const DEFAULT_SPEED_KMH: f64 = 30.0;

/// Road distance is longer than the great-circle line; scale by a flat
/// detour factor.
const DETOUR_FACTOR: f64 = 1.3;

/// Estimator that derives distance from the haversine formula and duration
/// from a fixed average speed. No I/O, fully deterministic.
#[derive(Debug, Clone)]
pub struct HaversineEstimator {
    speed_kmh: f64,
}

impl HaversineEstimator {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }
}

impl Default for HaversineEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_KMH)
    }
}

#[async_trait]
impl RouteEstimator for HaversineEstimator {
    async fn estimate(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate, RouteError> {
        let distance_km = haversine_km(from, to) * DETOUR_FACTOR;
        let duration_secs = distance_km / self.speed_kmh * 3600.0;
        Ok(RouteEstimate {
            distance_km,
            duration_secs,
        })
    }
}
