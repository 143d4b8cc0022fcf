//! Ride lifecycle coordination.
//!
//! The coordinator owns the live view of non-terminal rides and serializes
//! all transitions per ride behind a per-ride async mutex: two drivers
//! racing the same accept produce exactly one winner. Transitions are
//! applied to a working copy, persisted, and only then committed to the
//! live view and surfaced as events — a broadcast therefore implies the
//! durable store already has the transition.

use crate::db::Repository;
use crate::domain::{
    haversine_km, DriverId, FareBreakdown, Money, Rating, Ride, RideId, RideStatus,
};
use crate::engine::matching::OfferBook;
use crate::engine::{DomainEvent, GeoIndex};
use crate::error::CoreError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Assumed driver speed when deriving a pickup ETA from distance.
const ETA_SPEED_KMH: f64 = 30.0;

pub struct RideCoordinator {
    /// Live non-terminal rides. The outer mutex guards map membership only;
    /// the per-ride mutex serializes transitions.
    live: Mutex<HashMap<RideId, Arc<tokio::sync::Mutex<Ride>>>>,
    repo: Arc<Repository>,
    geo: Arc<GeoIndex>,
    offers: Arc<OfferBook>,
}

impl RideCoordinator {
    pub fn new(repo: Arc<Repository>, geo: Arc<GeoIndex>, offers: Arc<OfferBook>) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            repo,
            geo,
            offers,
        }
    }

    /// Register a freshly created ride in the live view.
    pub fn track(&self, ride: Ride) {
        let mut live = self.live.lock().expect("live ride map poisoned");
        live.insert(ride.ride_id.clone(), Arc::new(tokio::sync::Mutex::new(ride)));
    }

    fn untrack(&self, ride_id: &RideId) {
        let mut live = self.live.lock().expect("live ride map poisoned");
        live.remove(ride_id);
    }

    /// Whether the ride is live (known to this process and non-terminal).
    pub async fn is_active(&self, ride_id: &RideId) -> bool {
        let entry = {
            let live = self.live.lock().expect("live ride map poisoned");
            live.get(ride_id).cloned()
        };
        match entry {
            Some(entry) => !entry.lock().await.status.is_terminal(),
            None => false,
        }
    }

    /// Live entry for a ride, falling back to the durable store. Rides
    /// loaded from the store are re-tracked unless already terminal.
    async fn entry(&self, ride_id: &RideId) -> Result<Arc<tokio::sync::Mutex<Ride>>, CoreError> {
        if let Some(entry) = self
            .live
            .lock()
            .expect("live ride map poisoned")
            .get(ride_id)
            .cloned()
        {
            return Ok(entry);
        }

        let ride = self
            .repo
            .fetch_ride(ride_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("ride {}", ride_id)))?;

        let terminal = ride.status.is_terminal();
        let entry = Arc::new(tokio::sync::Mutex::new(ride));
        if !terminal {
            let mut live = self.live.lock().expect("live ride map poisoned");
            // A concurrent loader may have won; use whichever Arc is mapped.
            return Ok(live
                .entry(ride_id.clone())
                .or_insert_with(|| Arc::clone(&entry))
                .clone());
        }
        Ok(entry)
    }

    /// requested → accepted. Claims the offer and the driver reservation,
    /// persists, then commits.
    pub async fn accept(
        &self,
        ride_id: &RideId,
        driver_id: &DriverId,
    ) -> Result<Vec<DomainEvent>, CoreError> {
        let entry = self.entry(ride_id).await?;
        let mut guard = entry.lock().await;

        let mut updated = guard.clone();
        updated.accept(driver_id, Utc::now())?;

        self.offers.claim(ride_id, driver_id)?;
        self.geo.confirm_reservation(driver_id, ride_id)?;

        if let Err(err) = self.repo.update_ride(&updated).await {
            // Durable write failed before anything was broadcast: hand the
            // driver back to the pool and fail the accept.
            self.geo.clear_active_ride(driver_id, ride_id);
            error!(ride = %ride_id, driver = %driver_id, %err, "accept not persisted; reverted");
            return Err(err.into());
        }

        let eta_minutes = self
            .geo
            .position_of(driver_id)
            .map(|pos| haversine_km(pos, guard.pickup.point))
            .map(|km| (km / ETA_SPEED_KMH * 60.0).ceil() as u32);

        *guard = updated;
        info!(ride = %ride_id, driver = %driver_id, "ride accepted");

        Ok(vec![DomainEvent::RideAccepted {
            ride_id: ride_id.clone(),
            driver_id: driver_id.clone(),
            eta_minutes,
        }])
    }

    /// accepted → started by the assigned driver.
    pub async fn start(
        &self,
        ride_id: &RideId,
        driver_id: &DriverId,
    ) -> Result<Vec<DomainEvent>, CoreError> {
        let entry = self.entry(ride_id).await?;
        let mut guard = entry.lock().await;

        let mut updated = guard.clone();
        updated.start(driver_id, Utc::now())?;
        self.repo.update_ride(&updated).await?;
        *guard = updated;

        info!(ride = %ride_id, "trip started");
        Ok(vec![DomainEvent::RideStarted {
            ride_id: ride_id.clone(),
        }])
    }

    /// started → completed by the assigned driver. The final fare comes
    /// from the caller's override when given, otherwise it is recomputed
    /// from the recorded distance/duration (the request-time estimate when
    /// no better telemetry exists).
    pub async fn complete(
        &self,
        ride_id: &RideId,
        driver_id: &DriverId,
        final_fare: Option<Money>,
    ) -> Result<Vec<DomainEvent>, CoreError> {
        let entry = self.entry(ride_id).await?;
        let mut guard = entry.lock().await;

        let fare = match final_fare {
            Some(amount) => guard.fare.clone().with_final_fare(amount),
            None => {
                let plan = self
                    .repo
                    .pricing_for(guard.vehicle_type)
                    .await?
                    .ok_or_else(|| {
                        CoreError::NotFound(format!(
                            "pricing plan for vehicle type {}",
                            guard.vehicle_type
                        ))
                    })?;
                FareBreakdown::compute(&plan, guard.distance_km, guard.duration_secs).ok_or_else(
                    || CoreError::Validation("recorded distance/duration is unusable".into()),
                )?
            }
        };

        let mut updated = guard.clone();
        updated.complete(driver_id, fare, Utc::now())?;
        self.repo.update_ride(&updated).await?;

        let fare = updated.fare.clone();
        *guard = updated;
        drop(guard);

        self.geo.clear_active_ride(driver_id, ride_id);
        self.untrack(ride_id);

        info!(ride = %ride_id, fare = %fare.final_fare, "trip completed");
        Ok(vec![DomainEvent::RideCompleted {
            ride_id: ride_id.clone(),
            fare,
        }])
    }

    /// any non-terminal → cancelled by rider, assigned driver, or admin.
    /// Releases the driver's reservation/active-ride claim.
    pub async fn cancel(
        &self,
        ride_id: &RideId,
        actor_id: &str,
        actor_is_admin: bool,
        reason: String,
    ) -> Result<Vec<DomainEvent>, CoreError> {
        let entry = self.entry(ride_id).await?;
        let mut guard = entry.lock().await;

        let mut updated = guard.clone();
        updated.cancel(actor_id, actor_is_admin, reason, Utc::now())?;
        self.repo.update_ride(&updated).await?;

        let cancellation = updated
            .cancellation
            .clone()
            .expect("cancel sets cancellation metadata");
        let assigned = updated.driver_id.clone();
        *guard = updated;
        drop(guard);

        self.offers.remove(ride_id);
        self.geo.release_reservation_for_ride(ride_id);
        if let Some(driver) = assigned {
            self.geo.clear_active_ride(&driver, ride_id);
        }
        self.untrack(ride_id);

        info!(ride = %ride_id, by = cancellation.by.as_str(), "ride cancelled");
        Ok(vec![DomainEvent::RideCancelled {
            ride_id: ride_id.clone(),
            reason: cancellation.reason,
            by: cancellation.by,
        }])
    }

    /// Terminate a requested ride whose offer lapsed unanswered. The rider
    /// never saw the ride id, so nobody could transition it otherwise; it is
    /// cancelled on the system's authority and removed from the live view.
    pub async fn expire_offer(&self, ride_id: &RideId) -> Result<(), CoreError> {
        let entry = self.entry(ride_id).await?;
        let mut guard = entry.lock().await;

        let mut updated = guard.clone();
        updated.cancel("system", true, "offer expired".into(), Utc::now())?;
        self.repo.update_ride(&updated).await?;
        *guard = updated;
        drop(guard);

        self.untrack(ride_id);
        info!(ride = %ride_id, "unanswered offer expired, ride closed");
        Ok(())
    }

    /// Attach a rating to a completed ride. Validation runs on the loaded
    /// record; the write is guarded so a concurrent duplicate from the same
    /// role cannot slip through.
    pub async fn rate(
        &self,
        ride_id: &RideId,
        caller: &str,
        rating: Rating,
    ) -> Result<(), CoreError> {
        let ride = self
            .repo
            .fetch_ride(ride_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("ride {}", ride_id)))?;

        let mut probe = ride.clone();
        let role = probe.attach_rating(caller, rating.clone())?;
        let rates_driver = matches!(role, crate::domain::RaterRole::Rider);

        if !self.repo.attach_rating(ride_id, rates_driver, &rating).await? {
            return Err(CoreError::InvalidTransition(format!(
                "ride {} has already been rated by this party",
                ride_id
            )));
        }
        Ok(())
    }

    /// Record a completed payment on a completed ride.
    pub async fn payment_completed(
        &self,
        ride_id: &RideId,
        method: String,
        amount: Money,
    ) -> Result<Vec<DomainEvent>, CoreError> {
        let entry = self.entry(ride_id).await?;
        let mut guard = entry.lock().await;

        let mut updated = guard.clone();
        updated.mark_payment_completed(method.clone())?;
        self.repo.update_ride(&updated).await?;
        *guard = updated;

        info!(ride = %ride_id, "payment recorded");
        Ok(vec![DomainEvent::PaymentCompleted {
            ride_id: ride_id.clone(),
            method,
            amount,
        }])
    }

    /// Rider id for a live or stored ride (used for event routing).
    pub async fn rider_of(&self, ride_id: &RideId) -> Result<crate::domain::RiderId, CoreError> {
        let entry = self.entry(ride_id).await?;
        let guard = entry.lock().await;
        Ok(guard.rider_id.clone())
    }

    /// Current status snapshot; None if the ride does not exist anywhere.
    pub async fn status_of(&self, ride_id: &RideId) -> Option<RideStatus> {
        match self.entry(ride_id).await {
            Ok(entry) => Some(entry.lock().await.status),
            Err(_) => None,
        }
    }
}
