//! The coordination engine: live driver presence, matching, and the ride
//! lifecycle coordinator.

use crate::domain::{
    CancelledBy, DriverId, FareBreakdown, GeoPoint, Location, Money, RideId, RiderId,
};
use chrono::{DateTime, Utc};

pub mod geo_index;
pub mod lifecycle;
pub mod matching;

pub use geo_index::{DriverPresence, GeoIndex, NearestDriver};
pub use lifecycle::RideCoordinator;
pub use matching::{MatchConfig, MatchedOffer, MatchingEngine, OfferBook, RideRequest};

/// Events produced by the matching engine and the ride state machine. The
/// event router decides which connections each one reaches.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// Matching has begun for a rider's request.
    RideSearching { rider_id: RiderId },
    /// A driver was reserved and should be shown the offer.
    RideOffered {
        ride_id: RideId,
        driver_id: DriverId,
        rider_id: RiderId,
        pickup: Location,
        dropoff: Location,
        /// Driver's distance from the pickup point at match time.
        pickup_distance_km: f64,
        fare_estimate: Money,
    },
    /// No eligible driver within radius, or the offer lapsed unanswered.
    NoDriverAvailable { rider_id: RiderId, reason: String },
    RideAccepted {
        ride_id: RideId,
        driver_id: DriverId,
        eta_minutes: Option<u32>,
    },
    RideStarted { ride_id: RideId },
    RideCompleted {
        ride_id: RideId,
        fare: FareBreakdown,
    },
    RideCancelled {
        ride_id: RideId,
        reason: String,
        by: CancelledBy,
    },
    /// Assigned driver's position during an active ride.
    DriverLocation {
        ride_id: RideId,
        driver_id: DriverId,
        position: GeoPoint,
        at: DateTime<Utc>,
    },
    PaymentCompleted {
        ride_id: RideId,
        method: String,
        amount: Money,
    },
}
