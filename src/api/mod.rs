pub mod health;
pub mod rides;
pub mod ws;

use crate::config::Config;
use crate::db::Repository;
use crate::engine::{GeoIndex, RideCoordinator};
use crate::routing::RouteEstimator;
use crate::ws::{ConnectionRegistry, EventRouter};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub geo: Arc<GeoIndex>,
    pub coordinator: Arc<RideCoordinator>,
    pub estimator: Arc<dyn RouteEstimator>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<EventRouter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<Repository>,
        config: Config,
        geo: Arc<GeoIndex>,
        coordinator: Arc<RideCoordinator>,
        estimator: Arc<dyn RouteEstimator>,
        registry: Arc<ConnectionRegistry>,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            repo,
            config,
            geo,
            coordinator,
            estimator,
            registry,
            router,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/rides", get(rides::list_rides))
        .route("/v1/rides/:ride_id", get(rides::get_ride))
        .route("/v1/rides/:ride_id/rate", post(rides::rate_ride))
        .route("/v1/fare/estimate", post(rides::estimate_fare))
        .route("/v1/drivers/nearby", get(rides::nearby_drivers))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}
