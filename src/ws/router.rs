//! Dispatch inbound operations and fan events out to the right connections.
//!
//! Validation failures and rejected transitions go back to the originating
//! connection only; domain events reach the rider, the driver, or the ride
//! room per event kind. Matching begins only after the message has passed
//! validation, so a malformed request never touches engine state.

use crate::db::Repository;
use crate::domain::{ActorId, DriverId, GeoPoint, Location, Money, RideId, RiderId};
use crate::engine::{DomainEvent, GeoIndex, MatchingEngine, RideCoordinator, RideRequest};
use crate::error::CoreError;
use crate::ws::messages::{ActorRole, ClientMessage, LocationPayload, ServerEvent};
use crate::ws::registry::ConnectionRegistry;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

fn location_from(payload: LocationPayload) -> Result<Location, CoreError> {
    let point = GeoPoint::checked(payload.lat, payload.lng).ok_or_else(|| {
        CoreError::Validation(format!(
            "invalid coordinates ({}, {})",
            payload.lat, payload.lng
        ))
    })?;
    let address = payload
        .address
        .unwrap_or_else(|| format!("({:.5}, {:.5})", point.lat, point.lng));
    Ok(Location::new(address, point))
}

pub struct EventRouter {
    geo: Arc<GeoIndex>,
    repo: Arc<Repository>,
    matching: Arc<MatchingEngine>,
    coordinator: Arc<RideCoordinator>,
    registry: Arc<ConnectionRegistry>,
}

impl EventRouter {
    pub fn new(
        geo: Arc<GeoIndex>,
        repo: Arc<Repository>,
        matching: Arc<MatchingEngine>,
        coordinator: Arc<RideCoordinator>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            geo,
            repo,
            matching,
            coordinator,
            registry,
        }
    }

    /// Handle one inbound operation. Errors become an `error` event on the
    /// originating connection; they never fan out.
    pub async fn handle_message(&self, origin: &ActorId, msg: ClientMessage) {
        match self.dispatch(origin, msg).await {
            Ok(events) => {
                for event in events {
                    self.dispatch_event(&event);
                }
            }
            Err(err) => {
                debug!(actor = %origin, code = err.code(), %err, "operation rejected");
                self.registry.send_to_actor(
                    origin,
                    ServerEvent::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    },
                );
            }
        }
    }

    async fn dispatch(
        &self,
        origin: &ActorId,
        msg: ClientMessage,
    ) -> Result<Vec<DomainEvent>, CoreError> {
        match msg {
            ClientMessage::DriverGoOnline {
                driver_id,
                lat,
                lng,
            } => {
                let point = GeoPoint::checked(lat, lng).ok_or_else(|| {
                    CoreError::Validation(format!("invalid coordinates ({}, {})", lat, lng))
                })?;
                let driver = DriverId::new(driver_id);
                self.geo.upsert(driver.clone(), point, true);
                self.persist_driver(driver.clone(), Some(point), true);
                info!(driver = %driver, "driver online");
                Ok(vec![])
            }

            ClientMessage::DriverGoOffline { driver_id } => {
                let driver = DriverId::new(driver_id);
                self.geo.set_online(&driver, false);
                self.persist_driver(driver.clone(), None, false);
                info!(driver = %driver, "driver offline");
                Ok(vec![])
            }

            ClientMessage::DriverLocationUpdate {
                driver_id,
                lat,
                lng,
                ride_id,
            } => {
                let point = GeoPoint::checked(lat, lng).ok_or_else(|| {
                    CoreError::Validation(format!("invalid coordinates ({}, {})", lat, lng))
                })?;
                let driver = DriverId::new(driver_id);
                if !self.geo.update_position(&driver, point) {
                    // Position before goOnline: remember it, stay unmatchable.
                    self.geo.upsert(driver.clone(), point, false);
                }
                self.persist_driver(driver.clone(), Some(point), self.geo.is_online(&driver));

                if let Some(ride_id) = ride_id {
                    let ride_id = RideId::new(ride_id);
                    if self.coordinator.is_active(&ride_id).await {
                        return Ok(vec![DomainEvent::DriverLocation {
                            ride_id,
                            driver_id: driver,
                            position: point,
                            at: Utc::now(),
                        }]);
                    }
                }
                Ok(vec![])
            }

            ClientMessage::RiderRegister { rider_id } => {
                // Registration itself happened when the session saw this
                // message; nothing further to do.
                debug!(rider = %rider_id, "rider registered");
                Ok(vec![])
            }

            ClientMessage::RideRequest {
                rider_id,
                pickup,
                dropoff,
                vehicle_type,
            } => {
                let rider = RiderId::new(rider_id);
                let request = RideRequest {
                    rider_id: rider.clone(),
                    pickup: location_from(pickup)?,
                    dropoff: location_from(dropoff)?,
                    vehicle_type,
                };

                self.dispatch_event(&DomainEvent::RideSearching {
                    rider_id: rider.clone(),
                });

                match self.matching.match_request(request).await {
                    Ok(offer) => Ok(vec![DomainEvent::RideOffered {
                        ride_id: offer.ride.ride_id.clone(),
                        driver_id: offer.driver_id,
                        rider_id: rider,
                        pickup: offer.ride.pickup.clone(),
                        dropoff: offer.ride.dropoff.clone(),
                        pickup_distance_km: offer.pickup_distance_km,
                        fare_estimate: offer.ride.fare.final_fare.clone(),
                    }]),
                    // An empty radius is an outcome for the rider, not an
                    // error on the connection.
                    Err(CoreError::NoDriverAvailable { radius_km }) => {
                        Ok(vec![DomainEvent::NoDriverAvailable {
                            rider_id: rider,
                            reason: format!("no drivers available within {} km", radius_km),
                        }])
                    }
                    Err(err) => Err(err),
                }
            }

            ClientMessage::RideAccept { ride_id, driver_id } => {
                self.coordinator
                    .accept(&RideId::new(ride_id), &DriverId::new(driver_id))
                    .await
            }

            ClientMessage::RideStart { ride_id, driver_id } => {
                self.coordinator
                    .start(&RideId::new(ride_id), &DriverId::new(driver_id))
                    .await
            }

            ClientMessage::RideComplete {
                ride_id,
                driver_id,
                final_fare,
            } => {
                let fare = final_fare
                    .map(|amount| {
                        Money::from_f64(amount).ok_or_else(|| {
                            CoreError::Validation(format!("invalid final fare {}", amount))
                        })
                    })
                    .transpose()?;
                self.coordinator
                    .complete(&RideId::new(ride_id), &DriverId::new(driver_id), fare)
                    .await
            }

            ClientMessage::RideCancel {
                ride_id,
                actor_id,
                reason,
            } => {
                if actor_id != origin.as_str() {
                    return Err(CoreError::Validation(
                        "actorId does not match this connection".into(),
                    ));
                }
                self.coordinator
                    .cancel(
                        &RideId::new(ride_id),
                        &actor_id,
                        false,
                        reason.unwrap_or_else(|| "cancelled".to_string()),
                    )
                    .await
            }

            ClientMessage::PaymentComplete {
                ride_id,
                method,
                amount,
            } => {
                let amount = Money::from_f64(amount).ok_or_else(|| {
                    CoreError::Validation(format!("invalid payment amount {}", amount))
                })?;
                self.coordinator
                    .payment_completed(&RideId::new(ride_id), method, amount)
                    .await
            }
        }
    }

    /// Fan one domain event out to its audience.
    pub fn dispatch_event(&self, event: &DomainEvent) {
        match event {
            DomainEvent::RideSearching { rider_id } => {
                self.registry.send_to_actor(
                    &ActorId::from(rider_id),
                    ServerEvent::RideSearching {
                        message: "looking for a driver near you".to_string(),
                    },
                );
            }

            DomainEvent::RideOffered {
                ride_id,
                driver_id,
                rider_id,
                pickup,
                dropoff,
                pickup_distance_km,
                fare_estimate,
            } => {
                // The rider joins the ride room now so the accepted/started
                // stream reaches them; the offer itself is driver-only.
                self.registry.subscribe(ride_id, ActorId::from(rider_id));
                self.registry.send_to_actor(
                    &ActorId::from(driver_id),
                    ServerEvent::RideOffer {
                        ride_id: ride_id.to_string(),
                        pickup: pickup.clone(),
                        dropoff: dropoff.clone(),
                        distance_km: *pickup_distance_km,
                        fare_estimate: fare_estimate.clone(),
                    },
                );
            }

            DomainEvent::NoDriverAvailable { rider_id, reason } => {
                self.registry.send_to_actor(
                    &ActorId::from(rider_id),
                    ServerEvent::NoDriverAvailable {
                        reason: reason.clone(),
                    },
                );
            }

            DomainEvent::RideAccepted {
                ride_id,
                driver_id,
                eta_minutes,
            } => {
                self.registry.subscribe(ride_id, ActorId::from(driver_id));
                self.registry.broadcast_ride(
                    ride_id,
                    &ServerEvent::RideAccepted {
                        ride_id: ride_id.to_string(),
                        driver_id: driver_id.to_string(),
                        eta_minutes: *eta_minutes,
                    },
                    None,
                );
            }

            DomainEvent::RideStarted { ride_id } => {
                self.registry.broadcast_ride(
                    ride_id,
                    &ServerEvent::RideStarted {
                        ride_id: ride_id.to_string(),
                    },
                    None,
                );
            }

            DomainEvent::RideCompleted { ride_id, fare } => {
                self.registry.broadcast_ride(
                    ride_id,
                    &ServerEvent::RideCompleted {
                        ride_id: ride_id.to_string(),
                        fare: fare.clone(),
                    },
                    None,
                );
            }

            DomainEvent::RideCancelled {
                ride_id,
                reason,
                by,
            } => {
                self.registry.broadcast_ride(
                    ride_id,
                    &ServerEvent::RideCancelled {
                        ride_id: ride_id.to_string(),
                        reason: reason.clone(),
                        by: *by,
                    },
                    None,
                );
                self.registry.drop_room(ride_id);
            }

            DomainEvent::DriverLocation {
                ride_id,
                driver_id,
                position,
                at,
            } => {
                self.registry.broadcast_ride(
                    ride_id,
                    &ServerEvent::DriverLocation {
                        ride_id: ride_id.to_string(),
                        driver_id: driver_id.to_string(),
                        lat: position.lat,
                        lng: position.lng,
                        at: *at,
                    },
                    Some(&ActorId::from(driver_id)),
                );
            }

            DomainEvent::PaymentCompleted {
                ride_id,
                method,
                amount,
            } => {
                self.registry.broadcast_ride(
                    ride_id,
                    &ServerEvent::PaymentCompleted {
                        ride_id: ride_id.to_string(),
                        method: method.clone(),
                        amount: amount.clone(),
                    },
                    None,
                );
            }
        }
    }

    /// Connection teardown. A driver dropping off the wire goes invisible to
    /// matching; any in-flight ride stays in its last persisted state.
    pub fn handle_disconnect(&self, actor: &ActorId, role: Option<ActorRole>) {
        self.registry.unregister(actor);
        if role == Some(ActorRole::Driver) {
            let driver = DriverId::new(actor.as_str());
            self.geo.set_online(&driver, false);
            self.persist_driver(driver.clone(), None, false);
            info!(driver = %driver, "driver disconnected, marked offline");
        } else {
            debug!(actor = %actor, "connection closed");
        }
    }

    /// Best-effort async write of the driver profile row. The live view is
    /// already updated; a failed write only degrades restart recovery.
    fn persist_driver(&self, driver: DriverId, position: Option<GeoPoint>, online: bool) {
        let repo = Arc::clone(&self.repo);
        tokio::spawn(async move {
            if let Err(err) = repo.upsert_driver(&driver, position, online).await {
                error!(driver = %driver, %err, "driver profile write failed");
            }
        });
    }
}

/// Drain engine-originated events (offer expiry) into the router's fan-out.
pub fn spawn_event_pump(router: Arc<EventRouter>, mut events: mpsc::UnboundedReceiver<DomainEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            router.dispatch_event(&event);
        }
    });
}
