//! Matching: pair an incoming ride request with the nearest eligible driver.

use crate::db::Repository;
use crate::domain::{DriverId, FareBreakdown, Location, Ride, RideId, RiderId, VehicleType};
use crate::engine::{DomainEvent, GeoIndex, RideCoordinator};
use crate::error::CoreError;
use crate::routing::RouteEstimator;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// A ride request as received from a rider.
#[derive(Debug, Clone)]
pub struct RideRequest {
    pub rider_id: RiderId,
    pub pickup: Location,
    pub dropoff: Location,
    pub vehicle_type: VehicleType,
}

/// Successful match: a persisted requested ride plus the reserved driver.
#[derive(Debug, Clone)]
pub struct MatchedOffer {
    pub ride: Ride,
    pub driver_id: DriverId,
    pub pickup_distance_km: f64,
}

#[derive(Debug, Clone)]
struct PendingOffer {
    driver_id: DriverId,
    expires_at: Instant,
}

/// Offers awaiting a driver's accept. Shared between the matching engine
/// (which records and expires offers) and the coordinator (which claims them
/// on accept).
#[derive(Debug, Default)]
pub struct OfferBook {
    inner: Mutex<HashMap<RideId, PendingOffer>>,
}

impl OfferBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, ride_id: RideId, driver_id: DriverId, ttl: Duration) {
        let mut map = self.inner.lock().expect("offer book poisoned");
        map.insert(
            ride_id,
            PendingOffer {
                driver_id,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Consume the pending offer for this ride if `driver_id` holds it and
    /// it has not lapsed.
    ///
    /// # Errors
    /// `ReservationConflict` otherwise; the offer entry is only removed on
    /// success or expiry, never for a losing claimant.
    pub fn claim(&self, ride_id: &RideId, driver_id: &DriverId) -> Result<(), CoreError> {
        let mut map = self.inner.lock().expect("offer book poisoned");
        match map.get(ride_id) {
            None => Err(CoreError::ReservationConflict(format!(
                "no pending offer for ride {}",
                ride_id
            ))),
            Some(offer) if offer.driver_id != *driver_id => Err(CoreError::ReservationConflict(
                format!("ride {} is offered to another driver", ride_id),
            )),
            Some(offer) if offer.expires_at <= Instant::now() => {
                map.remove(ride_id);
                Err(CoreError::ReservationConflict(format!(
                    "offer for ride {} has expired",
                    ride_id
                )))
            }
            Some(_) => {
                map.remove(ride_id);
                Ok(())
            }
        }
    }

    /// Remove the offer on expiry, but only if `driver_id` still holds it.
    fn expire(&self, ride_id: &RideId, driver_id: &DriverId) -> bool {
        let mut map = self.inner.lock().expect("offer book poisoned");
        match map.get(ride_id) {
            Some(offer) if offer.driver_id == *driver_id => {
                map.remove(ride_id);
                true
            }
            _ => false,
        }
    }

    /// Drop any offer for this ride (cancellation path).
    pub fn remove(&self, ride_id: &RideId) -> bool {
        let mut map = self.inner.lock().expect("offer book poisoned");
        map.remove(ride_id).is_some()
    }
}

/// Matching configuration, lifted from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    pub radius_km: f64,
    pub offer_timeout: Duration,
}

pub struct MatchingEngine {
    geo: Arc<GeoIndex>,
    repo: Arc<Repository>,
    estimator: Arc<dyn RouteEstimator>,
    coordinator: Arc<RideCoordinator>,
    offers: Arc<OfferBook>,
    config: MatchConfig,
    /// Channel for events produced outside an inbound call (offer expiry).
    events: mpsc::UnboundedSender<DomainEvent>,
}

impl MatchingEngine {
    pub fn new(
        geo: Arc<GeoIndex>,
        repo: Arc<Repository>,
        estimator: Arc<dyn RouteEstimator>,
        coordinator: Arc<RideCoordinator>,
        offers: Arc<OfferBook>,
        config: MatchConfig,
        events: mpsc::UnboundedSender<DomainEvent>,
    ) -> Self {
        Self {
            geo,
            repo,
            estimator,
            coordinator,
            offers,
            config,
            events,
        }
    }

    /// Match a ride request to the nearest eligible driver.
    ///
    /// On success the driver is reserved, the requested ride is durable, and
    /// an offer-timeout task is armed. `NoDriverAvailable` leaves no state
    /// behind: no reservation, no persisted ride.
    pub async fn match_request(&self, request: RideRequest) -> Result<MatchedOffer, CoreError> {
        let plan = self
            .repo
            .pricing_for(request.vehicle_type)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "pricing plan for vehicle type {}",
                    request.vehicle_type
                ))
            })?;

        let route = self
            .estimator
            .estimate(request.pickup.point, request.dropoff.point)
            .await
            .map_err(|e| CoreError::Estimation(e.to_string()))?;

        let fare = FareBreakdown::compute(&plan, route.distance_km, route.duration_secs)
            .ok_or_else(|| {
                CoreError::Validation("route estimate produced unusable distance/duration".into())
            })?;

        let ride_id = RideId::generate();
        let Some(found) =
            self.geo
                .reserve_nearest(request.pickup.point, self.config.radius_km, &ride_id)
        else {
            return Err(CoreError::NoDriverAvailable {
                radius_km: self.config.radius_km,
            });
        };

        let ride = Ride::new(
            ride_id.clone(),
            request.rider_id.clone(),
            request.vehicle_type,
            request.pickup,
            request.dropoff,
            route.distance_km,
            route.duration_secs,
            fare,
            Utc::now(),
        );

        if let Err(err) = self.repo.insert_ride(&ride).await {
            // The reservation must not outlive a ride that never existed.
            self.geo.release_reservation_if(&found.driver_id, &ride_id);
            return Err(err.into());
        }

        self.coordinator.track(ride.clone());
        self.offers.record(
            ride_id.clone(),
            found.driver_id.clone(),
            self.config.offer_timeout,
        );
        self.arm_offer_timeout(ride_id.clone(), found.driver_id.clone(), ride.rider_id.clone());

        info!(
            ride = %ride_id,
            driver = %found.driver_id,
            distance_km = found.distance_km,
            "ride offered to nearest driver"
        );

        Ok(MatchedOffer {
            ride,
            driver_id: found.driver_id,
            pickup_distance_km: found.distance_km,
        })
    }

    /// Release the reservation if the driver has not accepted in time. The
    /// rider is told no driver took the ride, and the orphaned ride record
    /// is closed out; the rider may retry with a fresh request.
    fn arm_offer_timeout(&self, ride_id: RideId, driver_id: DriverId, rider_id: RiderId) {
        let offers = Arc::clone(&self.offers);
        let geo = Arc::clone(&self.geo);
        let coordinator = Arc::clone(&self.coordinator);
        let events = self.events.clone();
        let timeout = self.config.offer_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if offers.expire(&ride_id, &driver_id) {
                geo.release_reservation_if(&driver_id, &ride_id);
                warn!(ride = %ride_id, driver = %driver_id, "offer expired unanswered");
                if let Err(err) = coordinator.expire_offer(&ride_id).await {
                    error!(ride = %ride_id, %err, "expired ride not closed");
                }
                let _ = events.send(DomainEvent::NoDriverAvailable {
                    rider_id,
                    reason: "driver did not respond in time".to_string(),
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(id: &str) -> DriverId {
        DriverId::new(id)
    }

    fn r(id: &str) -> RideId {
        RideId::new(id)
    }

    #[tokio::test]
    async fn test_offer_book_claim_happy_path() {
        let book = OfferBook::new();
        book.record(r("ride-1"), d("driver-1"), Duration::from_secs(30));
        book.claim(&r("ride-1"), &d("driver-1")).unwrap();
        // Consumed: a second claim conflicts.
        assert!(matches!(
            book.claim(&r("ride-1"), &d("driver-1")),
            Err(CoreError::ReservationConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_offer_book_rejects_other_driver() {
        let book = OfferBook::new();
        book.record(r("ride-1"), d("driver-1"), Duration::from_secs(30));
        assert!(matches!(
            book.claim(&r("ride-1"), &d("driver-2")),
            Err(CoreError::ReservationConflict(_))
        ));
        // The rightful driver can still claim afterwards.
        book.claim(&r("ride-1"), &d("driver-1")).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_book_expiry() {
        let book = OfferBook::new();
        book.record(r("ride-1"), d("driver-1"), Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(
            book.claim(&r("ride-1"), &d("driver-1")),
            Err(CoreError::ReservationConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_offer_book_expire_only_for_holder() {
        let book = OfferBook::new();
        book.record(r("ride-1"), d("driver-1"), Duration::from_secs(30));
        assert!(!book.expire(&r("ride-1"), &d("driver-2")));
        assert!(book.expire(&r("ride-1"), &d("driver-1")));
        assert!(!book.expire(&r("ride-1"), &d("driver-1")));
    }
}
