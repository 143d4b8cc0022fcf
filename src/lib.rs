pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod routing;
pub mod ws;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    haversine_km, ActorId, CancelledBy, DriverId, FareBreakdown, GeoPoint, Location, Money,
    PricingPlan, Rating, Ride, RideId, RideStatus, RiderId, VehicleType,
};
pub use engine::{
    DomainEvent, GeoIndex, MatchConfig, MatchingEngine, OfferBook, RideCoordinator, RideRequest,
};
pub use error::{AppError, CoreError};
pub use routing::{HaversineEstimator, HttpRouteEstimator, RouteEstimate, RouteEstimator};
pub use ws::{ConnectionRegistry, EventRouter};
