//! Wire messages for the realtime channel.
//!
//! Inbound operations and outbound events are tagged unions keyed by a
//! `type` field; unknown or malformed shapes fail deserialization before
//! they reach the dispatcher.

use crate::domain::{
    ActorId, CancelledBy, FareBreakdown, Location, Money, VehicleType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coordinates as they appear on the wire (address optional).
#[derive(Debug, Clone, Deserialize)]
pub struct LocationPayload {
    pub address: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

fn default_vehicle() -> VehicleType {
    VehicleType::Economy
}

/// Inbound actor operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "driver.goOnline", rename_all = "camelCase")]
    DriverGoOnline {
        driver_id: String,
        lat: f64,
        lng: f64,
    },
    #[serde(rename = "driver.goOffline", rename_all = "camelCase")]
    DriverGoOffline { driver_id: String },
    #[serde(rename = "driver.locationUpdate", rename_all = "camelCase")]
    DriverLocationUpdate {
        driver_id: String,
        lat: f64,
        lng: f64,
        #[serde(default)]
        ride_id: Option<String>,
    },
    #[serde(rename = "rider.register", rename_all = "camelCase")]
    RiderRegister { rider_id: String },
    #[serde(rename = "ride.request", rename_all = "camelCase")]
    RideRequest {
        rider_id: String,
        pickup: LocationPayload,
        dropoff: LocationPayload,
        #[serde(default = "default_vehicle")]
        vehicle_type: VehicleType,
    },
    #[serde(rename = "ride.accept", rename_all = "camelCase")]
    RideAccept { ride_id: String, driver_id: String },
    #[serde(rename = "ride.start", rename_all = "camelCase")]
    RideStart { ride_id: String, driver_id: String },
    #[serde(rename = "ride.complete", rename_all = "camelCase")]
    RideComplete {
        ride_id: String,
        driver_id: String,
        #[serde(default)]
        final_fare: Option<f64>,
    },
    #[serde(rename = "ride.cancel", rename_all = "camelCase")]
    RideCancel {
        ride_id: String,
        actor_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "payment.complete", rename_all = "camelCase")]
    PaymentComplete {
        ride_id: String,
        method: String,
        amount: f64,
    },
}

/// Which side of the marketplace a connection speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Driver,
    Rider,
}

impl ClientMessage {
    /// The actor this message speaks for, and the role it implies (if any).
    /// `ride.cancel` carries an actor id but does not reveal a role;
    /// `payment.complete` names no actor at all.
    pub fn actor(&self) -> Option<(ActorId, Option<ActorRole>)> {
        match self {
            ClientMessage::DriverGoOnline { driver_id, .. }
            | ClientMessage::DriverGoOffline { driver_id }
            | ClientMessage::DriverLocationUpdate { driver_id, .. }
            | ClientMessage::RideAccept { driver_id, .. }
            | ClientMessage::RideStart { driver_id, .. }
            | ClientMessage::RideComplete { driver_id, .. } => {
                Some((ActorId::new(driver_id.clone()), Some(ActorRole::Driver)))
            }
            ClientMessage::RiderRegister { rider_id }
            | ClientMessage::RideRequest { rider_id, .. } => {
                Some((ActorId::new(rider_id.clone()), Some(ActorRole::Rider)))
            }
            ClientMessage::RideCancel { actor_id, .. } => {
                Some((ActorId::new(actor_id.clone()), None))
            }
            ClientMessage::PaymentComplete { .. } => None,
        }
    }
}

/// Outbound events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "ride.searching", rename_all = "camelCase")]
    RideSearching { message: String },
    #[serde(rename = "ride.offer", rename_all = "camelCase")]
    RideOffer {
        ride_id: String,
        pickup: Location,
        dropoff: Location,
        /// Driver's distance from the pickup point.
        distance_km: f64,
        fare_estimate: Money,
    },
    #[serde(rename = "ride.noDriverAvailable", rename_all = "camelCase")]
    NoDriverAvailable { reason: String },
    #[serde(rename = "ride.accepted", rename_all = "camelCase")]
    RideAccepted {
        ride_id: String,
        driver_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_minutes: Option<u32>,
    },
    #[serde(rename = "ride.started", rename_all = "camelCase")]
    RideStarted { ride_id: String },
    #[serde(rename = "ride.completed", rename_all = "camelCase")]
    RideCompleted { ride_id: String, fare: FareBreakdown },
    #[serde(rename = "ride.cancelled", rename_all = "camelCase")]
    RideCancelled {
        ride_id: String,
        reason: String,
        by: CancelledBy,
    },
    #[serde(rename = "driver.location", rename_all = "camelCase")]
    DriverLocation {
        ride_id: String,
        driver_id: String,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    },
    #[serde(rename = "payment.completed", rename_all = "camelCase")]
    PaymentCompleted {
        ride_id: String,
        method: String,
        amount: Money,
    },
    #[serde(rename = "error", rename_all = "camelCase")]
    Error { code: String, message: String },
}
