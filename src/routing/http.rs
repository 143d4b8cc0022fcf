//! HTTP client for an external routing service.

use super::{RouteEstimate, RouteError, RouteEstimator};
use crate::domain::GeoPoint;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Route estimator backed by an HTTP routing service exposing
/// `POST {base}/route` with pickup/dropoff coordinates.
#[derive(Debug, Clone)]
pub struct HttpRouteEstimator {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    distance_km: f64,
    duration_secs: f64,
}

impl HttpRouteEstimator {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl RouteEstimator for HttpRouteEstimator {
    async fn estimate(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate, RouteError> {
        let url = format!("{}/route", self.base_url);
        let payload = serde_json::json!({
            "pickup": { "lat": from.lat, "lng": from.lng },
            "dropoff": { "lat": to.lat, "lng": to.lng },
        });
        debug!("Requesting route estimate from {}", url);

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let body = retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(RouteError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(RouteError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(RouteError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(RouteError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<RouteResponse>()
                .await
                .map_err(|e| backoff::Error::permanent(RouteError::Parse(e.to_string())))
        })
        .await?;

        if !body.distance_km.is_finite()
            || !body.duration_secs.is_finite()
            || body.distance_km < 0.0
            || body.duration_secs < 0.0
        {
            return Err(RouteError::Parse(format!(
                "routing service returned unusable values: distance_km={}, duration_secs={}",
                body.distance_km, body.duration_secs
            )));
        }

        Ok(RouteEstimate {
            distance_km: body.distance_km,
            duration_secs: body.duration_secs,
        })
    }
}
