//! The ride record and its lifecycle state machine.
//!
//! All transition methods are pure with respect to the outside world: they
//! validate the requested edge against the current status and the caller's
//! authority, and either mutate the record in full or return an error and
//! leave it untouched. Persistence and event fan-out live in the engine
//! layer, never here.

use crate::domain::{DriverId, FareBreakdown, Location, RideId, RiderId, VehicleType};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ride lifecycle status. Legal edges:
/// requested → accepted → started → completed, with cancelled reachable from
/// any non-terminal status. Completed and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Requested,
    Accepted,
    Started,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Accepted => "accepted",
            RideStatus::Started => "started",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(RideStatus::Requested),
            "accepted" => Some(RideStatus::Accepted),
            "started" => Some(RideStatus::Started),
            "completed" => Some(RideStatus::Completed),
            "cancelled" => Some(RideStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which party triggered a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    Rider,
    Driver,
    Admin,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Rider => "rider",
            CancelledBy::Driver => "driver",
            CancelledBy::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rider" => Some(CancelledBy::Rider),
            "driver" => Some(CancelledBy::Driver),
            "admin" => Some(CancelledBy::Admin),
            _ => None,
        }
    }
}

/// Derive the cancelling party from the caller identity.
///
/// Inputs: the caller's id, the ride's rider id, and whether the caller is an
/// administrative actor. An admin flag wins outright; otherwise a caller id
/// equal to the rider id means the rider cancelled, and anything else is
/// attributed to the driver.
pub fn cancelling_party(caller: &str, rider: &RiderId, caller_is_admin: bool) -> CancelledBy {
    if caller_is_admin {
        CancelledBy::Admin
    } else if caller == rider.as_str() {
        CancelledBy::Rider
    } else {
        CancelledBy::Driver
    }
}

/// Cancellation metadata recorded on the ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub by: CancelledBy,
}

/// A 1-5 rating with an optional free-text review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    pub review: Option<String>,
}

impl Rating {
    /// Validate and construct a rating.
    ///
    /// # Errors
    /// Returns `Validation` if the score is outside 1..=5.
    pub fn new(score: u8, review: Option<String>) -> Result<Self, CoreError> {
        if !(1..=5).contains(&score) {
            return Err(CoreError::Validation(format!(
                "rating score must be between 1 and 5, got {}",
                score
            )));
        }
        Ok(Rating { score, review })
    }
}

/// Which side of the ride a rating came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaterRole {
    /// The rider rating the driver.
    Rider,
    /// The driver rating the rider.
    Driver,
}

/// Payment state attached to a completed ride. Payment processing itself is
/// out of scope; the core only records the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            _ => None,
        }
    }
}

/// The authoritative ride record. This exact shape round-trips through the
/// durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub ride_id: RideId,
    pub rider_id: RiderId,
    pub driver_id: Option<DriverId>,
    pub vehicle_type: VehicleType,
    pub pickup: Location,
    pub dropoff: Location,
    pub status: RideStatus,
    /// Estimated route distance in kilometers, locked at request time.
    pub distance_km: f64,
    /// Estimated route duration in seconds, locked at request time.
    pub duration_secs: f64,
    pub fare: FareBreakdown,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation: Option<Cancellation>,
    /// Rating given by the rider to the driver.
    pub driver_rating: Option<Rating>,
    /// Rating given by the driver to the rider.
    pub rider_rating: Option<Rating>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
}

impl Ride {
    /// Create a new requested ride.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ride_id: RideId,
        rider_id: RiderId,
        vehicle_type: VehicleType,
        pickup: Location,
        dropoff: Location,
        distance_km: f64,
        duration_secs: f64,
        fare: FareBreakdown,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Ride {
            ride_id,
            rider_id,
            driver_id: None,
            vehicle_type,
            pickup,
            dropoff,
            status: RideStatus::Requested,
            distance_km,
            duration_secs,
            fare,
            requested_at,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation: None,
            driver_rating: None,
            rider_rating: None,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
        }
    }

    fn illegal(&self, action: &str) -> CoreError {
        CoreError::InvalidTransition(format!(
            "cannot {} ride {} in status {}",
            action, self.ride_id, self.status
        ))
    }

    fn require_assigned_driver(&self, caller: &DriverId, action: &str) -> Result<(), CoreError> {
        match &self.driver_id {
            Some(d) if d == caller => Ok(()),
            _ => Err(CoreError::InvalidTransition(format!(
                "driver {} is not assigned to ride {} and cannot {}",
                caller, self.ride_id, action
            ))),
        }
    }

    /// requested → accepted. Records the accepting driver and timestamp.
    pub fn accept(&mut self, driver: &DriverId, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != RideStatus::Requested {
            return Err(self.illegal("accept"));
        }
        self.driver_id = Some(driver.clone());
        self.status = RideStatus::Accepted;
        self.accepted_at = Some(at);
        Ok(())
    }

    /// accepted → started. Caller must be the assigned driver.
    pub fn start(&mut self, caller: &DriverId, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != RideStatus::Accepted {
            return Err(self.illegal("start"));
        }
        self.require_assigned_driver(caller, "start")?;
        self.status = RideStatus::Started;
        self.started_at = Some(at);
        Ok(())
    }

    /// started → completed. Caller must be the assigned driver. The locked
    /// fare and payment-pending marker are recorded here.
    pub fn complete(
        &mut self,
        caller: &DriverId,
        fare: FareBreakdown,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.status != RideStatus::Started {
            return Err(self.illegal("complete"));
        }
        self.require_assigned_driver(caller, "complete")?;
        self.status = RideStatus::Completed;
        self.completed_at = Some(at);
        self.fare = fare;
        self.payment_status = PaymentStatus::Pending;
        Ok(())
    }

    /// any non-terminal → cancelled. Caller must be the rider, the assigned
    /// driver, or an administrative actor.
    pub fn cancel(
        &mut self,
        caller: &str,
        caller_is_admin: bool,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(self.illegal("cancel"));
        }
        let is_rider = caller == self.rider_id.as_str();
        let is_driver = self
            .driver_id
            .as_ref()
            .map(|d| d.as_str() == caller)
            .unwrap_or(false);
        if !caller_is_admin && !is_rider && !is_driver {
            return Err(CoreError::InvalidTransition(format!(
                "actor {} has no authority to cancel ride {}",
                caller, self.ride_id
            )));
        }
        let by = cancelling_party(caller, &self.rider_id, caller_is_admin);
        self.status = RideStatus::Cancelled;
        self.cancelled_at = Some(at);
        self.cancellation = Some(Cancellation { reason, by });
        Ok(())
    }

    /// Attach a rating to a completed ride. The rider rates the driver and
    /// the driver rates the rider; a second rating from the same role is
    /// rejected.
    pub fn attach_rating(&mut self, caller: &str, rating: Rating) -> Result<RaterRole, CoreError> {
        if self.status != RideStatus::Completed {
            return Err(self.illegal("rate"));
        }
        let is_rider = caller == self.rider_id.as_str();
        let is_driver = self
            .driver_id
            .as_ref()
            .map(|d| d.as_str() == caller)
            .unwrap_or(false);

        if is_rider {
            if self.driver_rating.is_some() {
                return Err(CoreError::InvalidTransition(format!(
                    "ride {} has already been rated by the rider",
                    self.ride_id
                )));
            }
            self.driver_rating = Some(rating);
            Ok(RaterRole::Rider)
        } else if is_driver {
            if self.rider_rating.is_some() {
                return Err(CoreError::InvalidTransition(format!(
                    "ride {} has already been rated by the driver",
                    self.ride_id
                )));
            }
            self.rider_rating = Some(rating);
            Ok(RaterRole::Driver)
        } else {
            Err(CoreError::InvalidTransition(format!(
                "actor {} is not a party to ride {}",
                caller, self.ride_id
            )))
        }
    }

    /// Record a completed payment on a completed ride.
    pub fn mark_payment_completed(&mut self, method: String) -> Result<(), CoreError> {
        if self.status != RideStatus::Completed {
            return Err(self.illegal("record payment for"));
        }
        self.payment_status = PaymentStatus::Completed;
        self.payment_method = Some(method);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FareBreakdown, GeoPoint, Money, PricingPlan};

    fn fare() -> FareBreakdown {
        FareBreakdown::compute(&PricingPlan::defaults()[0], 10.0, 1200.0).unwrap()
    }

    fn ride() -> Ride {
        Ride::new(
            RideId::new("r-1"),
            RiderId::new("rider-1"),
            VehicleType::Economy,
            Location::new("A", GeoPoint::new(28.70, 77.10)),
            Location::new("B", GeoPoint::new(28.76, 77.14)),
            10.0,
            1200.0,
            fare(),
            Utc::now(),
        )
    }

    fn driver() -> DriverId {
        DriverId::new("driver-1")
    }

    #[test]
    fn test_full_happy_path() {
        let mut r = ride();
        let d = driver();
        r.accept(&d, Utc::now()).unwrap();
        assert_eq!(r.status, RideStatus::Accepted);
        assert!(r.accepted_at.is_some());

        r.start(&d, Utc::now()).unwrap();
        assert_eq!(r.status, RideStatus::Started);

        r.complete(&d, fare(), Utc::now()).unwrap();
        assert_eq!(r.status, RideStatus::Completed);
        assert_eq!(r.payment_status, PaymentStatus::Pending);
        assert_eq!(r.fare.final_fare, Money::from_i64(230));
    }

    #[test]
    fn test_illegal_edges_leave_state_unchanged() {
        let mut r = ride();
        let d = driver();

        // start before accept
        let before = r.clone();
        assert!(matches!(
            r.start(&d, Utc::now()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(r, before);

        // complete before start
        assert!(matches!(
            r.complete(&d, fare(), Utc::now()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(r, before);

        // double accept
        r.accept(&d, Utc::now()).unwrap();
        let accepted = r.clone();
        assert!(matches!(
            r.accept(&d, Utc::now()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(r, accepted);
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut r = ride();
        let d = driver();
        r.accept(&d, Utc::now()).unwrap();
        r.start(&d, Utc::now()).unwrap();
        r.complete(&d, fare(), Utc::now()).unwrap();

        assert!(matches!(
            r.cancel("rider-1", false, "changed my mind".into(), Utc::now()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            r.start(&d, Utc::now()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(r.status, RideStatus::Completed);
    }

    #[test]
    fn test_only_assigned_driver_may_start_or_complete() {
        let mut r = ride();
        r.accept(&driver(), Utc::now()).unwrap();

        let other = DriverId::new("driver-2");
        assert!(matches!(
            r.start(&other, Utc::now()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(r.status, RideStatus::Accepted);
    }

    #[test]
    fn test_cancel_from_each_non_terminal_state() {
        for advance in 0..3 {
            let mut r = ride();
            let d = driver();
            if advance >= 1 {
                r.accept(&d, Utc::now()).unwrap();
            }
            if advance >= 2 {
                r.start(&d, Utc::now()).unwrap();
            }
            r.cancel("rider-1", false, "plans changed".into(), Utc::now())
                .unwrap();
            assert_eq!(r.status, RideStatus::Cancelled);
            assert!(r.cancelled_at.is_some());
            assert_eq!(r.cancellation.as_ref().unwrap().by, CancelledBy::Rider);
        }
    }

    #[test]
    fn test_cancel_requires_authority() {
        let mut r = ride();
        assert!(matches!(
            r.cancel("stranger", false, "nope".into(), Utc::now()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(r.status, RideStatus::Requested);

        // An admin may cancel any ride.
        r.cancel("ops-1", true, "fraud review".into(), Utc::now())
            .unwrap();
        assert_eq!(r.cancellation.as_ref().unwrap().by, CancelledBy::Admin);
    }

    #[test]
    fn test_cancelling_party_rule() {
        let rider = RiderId::new("rider-1");
        assert_eq!(cancelling_party("rider-1", &rider, false), CancelledBy::Rider);
        assert_eq!(
            cancelling_party("driver-1", &rider, false),
            CancelledBy::Driver
        );
        assert_eq!(cancelling_party("rider-1", &rider, true), CancelledBy::Admin);
    }

    #[test]
    fn test_rating_only_on_completed_and_once_per_role() {
        let mut r = ride();
        let d = driver();

        let rating = Rating::new(5, Some("great".into())).unwrap();
        assert!(matches!(
            r.attach_rating("rider-1", rating.clone()),
            Err(CoreError::InvalidTransition(_))
        ));

        r.accept(&d, Utc::now()).unwrap();
        r.start(&d, Utc::now()).unwrap();
        r.complete(&d, fare(), Utc::now()).unwrap();

        assert_eq!(
            r.attach_rating("rider-1", rating.clone()).unwrap(),
            RaterRole::Rider
        );
        // Second rating by the same role is rejected; the first one stands.
        assert!(matches!(
            r.attach_rating("rider-1", Rating::new(1, None).unwrap()),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(r.driver_rating.as_ref().unwrap().score, 5);

        // The driver side is independent.
        assert_eq!(
            r.attach_rating("driver-1", Rating::new(4, None).unwrap())
                .unwrap(),
            RaterRole::Driver
        );

        // A stranger may not rate.
        assert!(matches!(
            r.attach_rating("stranger", Rating::new(3, None).unwrap()),
            Err(CoreError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_rating_score_bounds() {
        assert!(Rating::new(0, None).is_err());
        assert!(Rating::new(6, None).is_err());
        assert!(Rating::new(1, None).is_ok());
        assert!(Rating::new(5, None).is_ok());
    }

    #[test]
    fn test_payment_only_after_completion() {
        let mut r = ride();
        assert!(matches!(
            r.mark_payment_completed("card".into()),
            Err(CoreError::InvalidTransition(_))
        ));

        let d = driver();
        r.accept(&d, Utc::now()).unwrap();
        r.start(&d, Utc::now()).unwrap();
        r.complete(&d, fare(), Utc::now()).unwrap();
        r.mark_payment_completed("card".into()).unwrap();
        assert_eq!(r.payment_status, PaymentStatus::Completed);
        assert_eq!(r.payment_method.as_deref(), Some("card"));
    }
}
