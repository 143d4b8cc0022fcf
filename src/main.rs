use ridelink::api;
use ridelink::config::Config;
use ridelink::db::init_db;
use ridelink::engine::{MatchConfig, MatchingEngine, OfferBook, RideCoordinator};
use ridelink::routing::{HaversineEstimator, HttpRouteEstimator, RouteEstimator};
use ridelink::ws::{spawn_event_pump, ConnectionRegistry, EventRouter};
use ridelink::{GeoIndex, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));

    // Rebuild the live driver view from the durable rows.
    let geo = Arc::new(GeoIndex::new());
    match repo.driver_presence_rows().await {
        Ok(rows) => {
            let count = rows.len();
            geo.rebuild_from(rows);
            tracing::info!(drivers = count, "driver presence rebuilt from store");
        }
        Err(e) => {
            eprintln!("Failed to load driver presence: {}", e);
            std::process::exit(1);
        }
    }

    let estimator: Arc<dyn RouteEstimator> = match &config.route_api_url {
        Some(url) => Arc::new(HttpRouteEstimator::new(url.clone())),
        None => Arc::new(HaversineEstimator::default()),
    };

    let offers = Arc::new(OfferBook::new());
    let coordinator = Arc::new(RideCoordinator::new(
        repo.clone(),
        geo.clone(),
        offers.clone(),
    ));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let matching = Arc::new(MatchingEngine::new(
        geo.clone(),
        repo.clone(),
        estimator.clone(),
        coordinator.clone(),
        offers.clone(),
        MatchConfig {
            radius_km: config.matching_radius_km,
            offer_timeout: config.offer_timeout,
        },
        events_tx,
    ));

    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(EventRouter::new(
        geo.clone(),
        repo.clone(),
        matching,
        coordinator.clone(),
        registry.clone(),
    ));
    spawn_event_pump(router.clone(), events_rx);

    // Create router
    let app = api::create_router(api::AppState::new(
        repo,
        config,
        geo,
        coordinator,
        estimator,
        registry,
        router,
    ));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
