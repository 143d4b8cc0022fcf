//! Route/fare estimation collaborator.
//!
//! The core treats route estimation as a black-box call: given two points it
//! returns distance and duration. The HTTP implementation talks to an
//! external routing service; the haversine implementation is deterministic
//! and used in tests and as the default when no service is configured.

use crate::domain::GeoPoint;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod haversine;
pub mod http;

pub use haversine::HaversineEstimator;
pub use http::HttpRouteEstimator;

/// Distance and duration for a route between two points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    /// Rate limit exceeded (retried with backoff before surfacing).
    #[error("Rate limited")]
    RateLimited,
}

#[async_trait]
pub trait RouteEstimator: Send + Sync + fmt::Debug {
    /// Estimate the driving route from `from` to `to`.
    async fn estimate(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate, RouteError>;
}
