//! Matching engine integration: nearest-driver selection, reservation
//! exclusivity, and offer expiry against a real SQLite store.

use ridelink::db::init_db;
use ridelink::domain::{DriverId, GeoPoint, Location, RiderId, VehicleType};
use ridelink::engine::{
    DomainEvent, GeoIndex, MatchConfig, MatchingEngine, OfferBook, RideCoordinator, RideRequest,
};
use ridelink::error::CoreError;
use ridelink::routing::HaversineEstimator;
use ridelink::Repository;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Harness {
    _guard: TempDir,
    repo: Arc<Repository>,
    geo: Arc<GeoIndex>,
    offers: Arc<OfferBook>,
    coordinator: Arc<RideCoordinator>,
    matching: Arc<MatchingEngine>,
    events: mpsc::UnboundedReceiver<DomainEvent>,
}

async fn harness(offer_timeout: Duration) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.unwrap();
    let repo = Arc::new(Repository::new(pool));
    let geo = Arc::new(GeoIndex::new());
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
        Arc::new(HaversineEstimator::default()),
        coordinator.clone(),
        offers.clone(),
        MatchConfig {
            radius_km: 5.0,
            offer_timeout,
        },
        events_tx,
    ));
    Harness {
        _guard: temp_dir,
        repo,
        geo,
        offers,
        coordinator,
        matching,
        events: events_rx,
    }
}

fn request(rider: &str) -> RideRequest {
    RideRequest {
        rider_id: RiderId::new(rider),
        pickup: Location::new("Connaught Place", GeoPoint::new(28.70, 77.10)),
        dropoff: Location::new("Airport", GeoPoint::new(28.76, 77.14)),
        vehicle_type: VehicleType::Economy,
    }
}

#[tokio::test]
async fn test_nearest_driver_wins_and_ride_is_durable() {
    let h = harness(Duration::from_secs(30)).await;
    h.geo
        .upsert(DriverId::new("near"), GeoPoint::new(28.705, 77.10), true);
    h.geo
        .upsert(DriverId::new("far"), GeoPoint::new(28.73, 77.10), true);

    let offer = h.matching.match_request(request("rider-1")).await.unwrap();
    assert_eq!(offer.driver_id, DriverId::new("near"));
    assert!(offer.pickup_distance_km < 1.0);

    // Persisted as requested, unassigned.
    let stored = h
        .repo
        .fetch_ride(&offer.ride.ride_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status.as_str(), "requested");
    assert!(stored.driver_id.is_none());

    // The reserved driver is claimable by exactly that driver.
    h.offers
        .claim(&offer.ride.ride_id, &DriverId::new("near"))
        .unwrap();
}

#[tokio::test]
async fn test_no_driver_available_leaves_nothing_behind() {
    let h = harness(Duration::from_secs(30)).await;
    // One driver, far outside the 5 km radius.
    h.geo
        .upsert(DriverId::new("remote"), GeoPoint::new(28.90, 77.10), true);

    let err = h
        .matching
        .match_request(request("rider-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoDriverAvailable { .. }));

    // No ride record, no reservation.
    let rides = h.repo.rides_for_actor("rider-1", 10).await.unwrap();
    assert!(rides.is_empty());
    assert!(h
        .geo
        .nearest(GeoPoint::new(28.90, 77.10), 1.0)
        .is_some(), "remote driver must stay matchable");
}

#[tokio::test]
async fn test_reserved_driver_is_skipped_for_next_request() {
    let h = harness(Duration::from_secs(30)).await;
    h.geo
        .upsert(DriverId::new("a"), GeoPoint::new(28.705, 77.10), true);
    h.geo
        .upsert(DriverId::new("b"), GeoPoint::new(28.71, 77.10), true);

    let first = h.matching.match_request(request("rider-1")).await.unwrap();
    let second = h.matching.match_request(request("rider-2")).await.unwrap();
    assert_eq!(first.driver_id, DriverId::new("a"));
    assert_eq!(second.driver_id, DriverId::new("b"));

    // Both drivers held: a third request finds nobody.
    let err = h
        .matching
        .match_request(request("rider-3"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoDriverAvailable { .. }));
}

#[tokio::test]
async fn test_offer_expiry_frees_the_driver_and_notifies_the_rider() {
    let mut h = harness(Duration::from_millis(50)).await;
    h.geo
        .upsert(DriverId::new("slow"), GeoPoint::new(28.705, 77.10), true);

    let offer = h.matching.match_request(request("rider-1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    // The expiry task told the rider nobody took the ride.
    let event = h.events.recv().await.unwrap();
    match event {
        DomainEvent::NoDriverAvailable { rider_id, .. } => {
            assert_eq!(rider_id, RiderId::new("rider-1"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The lapsed offer can no longer be claimed.
    assert!(matches!(
        h.offers.claim(&offer.ride.ride_id, &DriverId::new("slow")),
        Err(CoreError::ReservationConflict(_))
    ));

    // The driver is matchable again.
    let next = h.matching.match_request(request("rider-2")).await.unwrap();
    assert_eq!(next.driver_id, DriverId::new("slow"));
}

#[tokio::test]
async fn test_offer_expiry_closes_the_orphaned_ride() {
    let mut h = harness(Duration::from_millis(50)).await;
    h.geo
        .upsert(DriverId::new("slow"), GeoPoint::new(28.705, 77.10), true);

    let offer = h.matching.match_request(request("rider-1")).await.unwrap();
    let ride_id = offer.ride.ride_id.clone();
    assert!(h.coordinator.is_active(&ride_id).await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    h.events.recv().await.unwrap();

    // No live entry survives; the durable record is closed on system
    // authority, so nothing can transition it later.
    assert!(!h.coordinator.is_active(&ride_id).await);
    let stored = h.repo.fetch_ride(&ride_id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_str(), "cancelled");
    let cancellation = stored.cancellation.unwrap();
    assert_eq!(cancellation.by.as_str(), "admin");
    assert_eq!(cancellation.reason, "offer expired");
    assert!(h
        .coordinator
        .accept(&ride_id, &DriverId::new("slow"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_fare_estimate_matches_pricing_plan() {
    let h = harness(Duration::from_secs(30)).await;
    h.geo
        .upsert(DriverId::new("a"), GeoPoint::new(28.705, 77.10), true);

    let offer = h.matching.match_request(request("rider-1")).await.unwrap();

    let plan = h
        .repo
        .pricing_for(VehicleType::Economy)
        .await
        .unwrap()
        .unwrap();
    let expected = ridelink::FareBreakdown::compute(
        &plan,
        offer.ride.distance_km,
        offer.ride.duration_secs,
    )
    .unwrap();
    assert_eq!(offer.ride.fare, expected);
    assert!(offer.ride.fare.final_fare >= plan.min_fare);
}
