//! Domain types for ride coordination.
//!
//! This module provides:
//! - Id/coordinate/vehicle primitives
//! - Decimal money handling
//! - Haversine distance
//! - Pricing plans and the fare formula
//! - The ride record and its lifecycle state machine

pub mod fare;
pub mod geo;
pub mod money;
pub mod primitives;
pub mod ride;

pub use fare::{FareBreakdown, PricingPlan};
pub use geo::haversine_km;
pub use money::Money;
pub use primitives::{ActorId, DriverId, GeoPoint, Location, RideId, RiderId, VehicleType};
pub use ride::{
    cancelling_party, CancelledBy, Cancellation, PaymentStatus, RaterRole, Rating, Ride,
    RideStatus,
};
