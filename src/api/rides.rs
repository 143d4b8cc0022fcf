use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{
    haversine_km, Cancellation, FareBreakdown, GeoPoint, Location, Rating, Ride, RideId,
    VehicleType,
};
use crate::error::{AppError, CoreError};

const DEFAULT_RIDE_LIMIT: i64 = 20;
const MAX_RIDE_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideDto {
    pub ride_id: String,
    pub rider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    pub vehicle_type: String,
    pub pickup: Location,
    pub dropoff: Location,
    pub status: String,
    pub distance_km: f64,
    pub duration_secs: f64,
    pub fare: FareBreakdown,
    pub requested_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<Cancellation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_rating: Option<Rating>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider_rating: Option<Rating>,
    pub payment_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

impl From<Ride> for RideDto {
    fn from(ride: Ride) -> Self {
        RideDto {
            ride_id: ride.ride_id.to_string(),
            rider_id: ride.rider_id.to_string(),
            driver_id: ride.driver_id.map(|d| d.to_string()),
            vehicle_type: ride.vehicle_type.to_string(),
            pickup: ride.pickup,
            dropoff: ride.dropoff,
            status: ride.status.as_str().to_string(),
            distance_km: ride.distance_km,
            duration_secs: ride.duration_secs,
            fare: ride.fare,
            requested_at: ride.requested_at.to_rfc3339(),
            accepted_at: ride.accepted_at.map(|t| t.to_rfc3339()),
            started_at: ride.started_at.map(|t| t.to_rfc3339()),
            completed_at: ride.completed_at.map(|t| t.to_rfc3339()),
            cancelled_at: ride.cancelled_at.map(|t| t.to_rfc3339()),
            cancellation: ride.cancellation,
            driver_rating: ride.driver_rating,
            rider_rating: ride.rider_rating,
            payment_status: ride.payment_status.as_str().to_string(),
            payment_method: ride.payment_method,
        }
    }
}

pub async fn get_ride(
    Path(ride_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RideDto>, AppError> {
    let ride = state
        .repo
        .fetch_ride(&RideId::new(ride_id.clone()))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("ride {}", ride_id)))?;
    Ok(Json(RideDto::from(ride)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RidesQuery {
    pub actor_id: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RidesResponse {
    pub rides: Vec<RideDto>,
}

pub async fn list_rides(
    Query(params): Query<RidesQuery>,
    State(state): State<AppState>,
) -> Result<Json<RidesResponse>, AppError> {
    if params.actor_id.trim().is_empty() {
        return Err(CoreError::Validation("actorId must not be empty".into()).into());
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RIDE_LIMIT)
        .clamp(1, MAX_RIDE_LIMIT);

    let rides = state.repo.rides_for_actor(&params.actor_id, limit).await?;
    Ok(Json(RidesResponse {
        rides: rides.into_iter().map(RideDto::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PointPayload {
    pub lat: f64,
    pub lng: f64,
}

impl PointPayload {
    fn checked(&self) -> Result<GeoPoint, AppError> {
        GeoPoint::checked(self.lat, self.lng).ok_or_else(|| {
            CoreError::Validation(format!("invalid coordinates ({}, {})", self.lat, self.lng))
                .into()
        })
    }
}

fn default_vehicle() -> VehicleType {
    VehicleType::Economy
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareEstimateRequest {
    pub pickup: PointPayload,
    pub dropoff: PointPayload,
    #[serde(default = "default_vehicle")]
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FareEstimateResponse {
    pub vehicle_type: String,
    pub distance_km: f64,
    pub duration_secs: f64,
    pub fare: FareBreakdown,
}

pub async fn estimate_fare(
    State(state): State<AppState>,
    Json(body): Json<FareEstimateRequest>,
) -> Result<Json<FareEstimateResponse>, AppError> {
    let pickup = body.pickup.checked()?;
    let dropoff = body.dropoff.checked()?;

    let plan = state
        .repo
        .pricing_for(body.vehicle_type)
        .await?
        .ok_or_else(|| {
            CoreError::NotFound(format!("pricing plan for vehicle type {}", body.vehicle_type))
        })?;

    let route = state
        .estimator
        .estimate(pickup, dropoff)
        .await
        .map_err(|e| CoreError::Estimation(e.to_string()))?;

    let fare = FareBreakdown::compute(&plan, route.distance_km, route.duration_secs)
        .ok_or_else(|| {
            CoreError::Validation("route estimate produced unusable distance/duration".into())
        })?;

    Ok(Json(FareEstimateResponse {
        vehicle_type: body.vehicle_type.to_string(),
        distance_km: route.distance_km,
        duration_secs: route.duration_secs,
        fare,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyDriverDto {
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_km: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyResponse {
    pub drivers: Vec<NearbyDriverDto>,
}

pub async fn nearby_drivers(
    Query(params): Query<NearbyQuery>,
    State(state): State<AppState>,
) -> Result<Json<NearbyResponse>, AppError> {
    let origin = GeoPoint::checked(params.lat, params.lng).ok_or_else(|| {
        CoreError::Validation(format!(
            "invalid coordinates ({}, {})",
            params.lat, params.lng
        ))
    })?;
    let radius_km = params.radius_km.unwrap_or(state.config.matching_radius_km);
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(CoreError::Validation("radiusKm must be positive".into()).into());
    }

    let mut drivers: Vec<NearbyDriverDto> = state
        .geo
        .online_snapshot()
        .into_iter()
        .filter_map(|(driver_id, position)| {
            let distance_km = haversine_km(origin, position);
            (distance_km <= radius_km).then(|| NearbyDriverDto {
                driver_id: driver_id.to_string(),
                lat: position.lat,
                lng: position.lng,
                distance_km,
            })
        })
        .collect();
    drivers.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(Json(NearbyResponse { drivers }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRequest {
    pub rater_id: String,
    pub score: u8,
    pub review: Option<String>,
}

pub async fn rate_ride(
    Path(ride_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rating = Rating::new(body.score, body.review)?;
    state
        .coordinator
        .rate(&RideId::new(ride_id), &body.rater_id, rating)
        .await?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}
