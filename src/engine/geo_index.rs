//! In-memory registry of driver presence with nearest-driver queries.
//!
//! This is the live view used for matching. It is rebuilt from the durable
//! driver table on restart and owned exclusively by this service object; the
//! durable store never drives routing decisions directly.

use crate::domain::{haversine_km, DriverId, GeoPoint, RideId};
use crate::error::CoreError;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Live presence entry for one driver.
#[derive(Debug, Clone, Default)]
pub struct DriverPresence {
    pub position: Option<GeoPoint>,
    pub online: bool,
    /// Ride currently holding an offer reservation on this driver.
    pub reserved_for: Option<RideId>,
    /// Ride this driver is actively serving (accepted or started).
    pub active_ride: Option<RideId>,
}

impl DriverPresence {
    /// A driver is matchable when online, positioned, and not already
    /// claimed by a reservation or an active ride.
    fn is_matchable(&self) -> bool {
        self.online
            && self.position.is_some()
            && self.reserved_for.is_none()
            && self.active_ride.is_none()
    }
}

/// A matched candidate returned from a nearest query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestDriver {
    pub driver_id: DriverId,
    pub distance_km: f64,
}

/// Mutex-guarded presence map. All mutations to a single driver's entry go
/// through this lock, so updates to the same driver never interleave. The
/// critical sections are short and never await.
#[derive(Debug, Default)]
pub struct GeoIndex {
    inner: Mutex<HashMap<DriverId, DriverPresence>>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a driver's presence entry. Idempotent; an existing
    /// reservation or active ride survives a re-upsert.
    pub fn upsert(&self, driver_id: DriverId, position: GeoPoint, online: bool) {
        let mut map = self.inner.lock().expect("geo index poisoned");
        let entry = map.entry(driver_id).or_default();
        entry.position = Some(position);
        entry.online = online;
    }

    /// Toggle visibility without deleting the entry. Going offline releases
    /// any pending offer reservation.
    pub fn set_online(&self, driver_id: &DriverId, online: bool) {
        let mut map = self.inner.lock().expect("geo index poisoned");
        if let Some(entry) = map.get_mut(driver_id) {
            entry.online = online;
            if !online {
                entry.reserved_for = None;
            }
        } else if online {
            map.insert(
                driver_id.clone(),
                DriverPresence {
                    online: true,
                    ..Default::default()
                },
            );
        }
    }

    pub fn remove(&self, driver_id: &DriverId) {
        let mut map = self.inner.lock().expect("geo index poisoned");
        map.remove(driver_id);
    }

    /// Update a known driver's position. Returns false if the driver has no
    /// presence entry (e.g. never went online on this process).
    pub fn update_position(&self, driver_id: &DriverId, position: GeoPoint) -> bool {
        let mut map = self.inner.lock().expect("geo index poisoned");
        match map.get_mut(driver_id) {
            Some(entry) => {
                entry.position = Some(position);
                true
            }
            None => false,
        }
    }

    pub fn position_of(&self, driver_id: &DriverId) -> Option<GeoPoint> {
        let map = self.inner.lock().expect("geo index poisoned");
        map.get(driver_id).and_then(|e| e.position)
    }

    /// Nearest matchable driver within `radius_km` of `origin`, or None.
    /// Linear scan; ties go to the first entry found.
    pub fn nearest(&self, origin: GeoPoint, radius_km: f64) -> Option<NearestDriver> {
        let map = self.inner.lock().expect("geo index poisoned");
        Self::nearest_locked(&map, origin, radius_km)
    }

    fn nearest_locked(
        map: &HashMap<DriverId, DriverPresence>,
        origin: GeoPoint,
        radius_km: f64,
    ) -> Option<NearestDriver> {
        let mut best: Option<NearestDriver> = None;
        for (driver_id, presence) in map.iter() {
            if !presence.is_matchable() {
                continue;
            }
            let position = presence.position.expect("matchable driver has a position");
            let distance_km = haversine_km(origin, position);
            if distance_km > radius_km {
                continue;
            }
            match &best {
                Some(current) if current.distance_km <= distance_km => {}
                _ => {
                    best = Some(NearestDriver {
                        driver_id: driver_id.clone(),
                        distance_km,
                    })
                }
            }
        }
        best
    }

    /// Find the nearest matchable driver and reserve them for `ride_id` in
    /// one critical section, so two concurrent requests can never pick the
    /// same driver.
    pub fn reserve_nearest(
        &self,
        origin: GeoPoint,
        radius_km: f64,
        ride_id: &RideId,
    ) -> Option<NearestDriver> {
        let mut map = self.inner.lock().expect("geo index poisoned");
        let found = Self::nearest_locked(&map, origin, radius_km)?;
        let entry = map
            .get_mut(&found.driver_id)
            .expect("candidate exists under the same lock");
        entry.reserved_for = Some(ride_id.clone());
        debug!(driver = %found.driver_id, ride = %ride_id, "driver reserved for offer");
        Some(found)
    }

    /// Convert a reservation into an active-ride pointer at accept time.
    ///
    /// # Errors
    /// `ReservationConflict` if the driver no longer holds a reservation for
    /// this ride (offer expired, released, or claimed by another request).
    pub fn confirm_reservation(&self, driver_id: &DriverId, ride_id: &RideId) -> Result<(), CoreError> {
        let mut map = self.inner.lock().expect("geo index poisoned");
        let entry = map.get_mut(driver_id).ok_or_else(|| {
            CoreError::ReservationConflict(format!("driver {} has no presence entry", driver_id))
        })?;
        if entry.reserved_for.as_ref() != Some(ride_id) {
            return Err(CoreError::ReservationConflict(format!(
                "driver {} is not reserved for ride {}",
                driver_id, ride_id
            )));
        }
        entry.reserved_for = None;
        entry.active_ride = Some(ride_id.clone());
        Ok(())
    }

    /// Release a reservation if the driver is still held for this ride.
    /// Returns true if a reservation was actually released. Used by the
    /// offer-timeout task, which must not clobber a newer reservation.
    pub fn release_reservation_if(&self, driver_id: &DriverId, ride_id: &RideId) -> bool {
        let mut map = self.inner.lock().expect("geo index poisoned");
        if let Some(entry) = map.get_mut(driver_id) {
            if entry.reserved_for.as_ref() == Some(ride_id) {
                entry.reserved_for = None;
                return true;
            }
        }
        false
    }

    /// Release any reservation held for this ride, whichever driver holds it.
    pub fn release_reservation_for_ride(&self, ride_id: &RideId) {
        let mut map = self.inner.lock().expect("geo index poisoned");
        for entry in map.values_mut() {
            if entry.reserved_for.as_ref() == Some(ride_id) {
                entry.reserved_for = None;
            }
        }
    }

    /// Clear a driver's active-ride pointer when the ride reaches a terminal
    /// state.
    pub fn clear_active_ride(&self, driver_id: &DriverId, ride_id: &RideId) {
        let mut map = self.inner.lock().expect("geo index poisoned");
        if let Some(entry) = map.get_mut(driver_id) {
            if entry.active_ride.as_ref() == Some(ride_id) {
                entry.active_ride = None;
            }
        }
    }

    /// Whether the driver is currently visible to matching.
    pub fn is_online(&self, driver_id: &DriverId) -> bool {
        let map = self.inner.lock().expect("geo index poisoned");
        map.get(driver_id).map(|e| e.online).unwrap_or(false)
    }

    /// Whether the driver currently has an active (non-terminal) ride.
    pub fn has_active_ride(&self, driver_id: &DriverId) -> bool {
        let map = self.inner.lock().expect("geo index poisoned");
        map.get(driver_id)
            .map(|e| e.active_ride.is_some())
            .unwrap_or(false)
    }

    /// Snapshot of online, positioned drivers (for read endpoints).
    pub fn online_snapshot(&self) -> Vec<(DriverId, GeoPoint)> {
        let map = self.inner.lock().expect("geo index poisoned");
        map.iter()
            .filter(|(_, p)| p.online)
            .filter_map(|(id, p)| p.position.map(|pos| (id.clone(), pos)))
            .collect()
    }

    /// Rebuild the live view from durable driver rows after a restart.
    /// Connection-scoped state (reservations, active rides) starts empty.
    pub fn rebuild_from(&self, rows: impl IntoIterator<Item = (DriverId, GeoPoint, bool)>) {
        let mut map = self.inner.lock().expect("geo index poisoned");
        map.clear();
        for (driver_id, position, online) in rows {
            map.insert(
                driver_id,
                DriverPresence {
                    position: Some(position),
                    online,
                    reserved_for: None,
                    active_ride: None,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(id: &str) -> DriverId {
        DriverId::new(id)
    }

    fn ride(id: &str) -> RideId {
        RideId::new(id)
    }

    #[test]
    fn test_nearest_picks_strictly_closer_driver() {
        let geo = GeoIndex::new();
        // ~1.1 km and ~3.3 km north of the origin.
        geo.upsert(d("near"), GeoPoint::new(28.71, 77.10), true);
        geo.upsert(d("far"), GeoPoint::new(28.73, 77.10), true);

        let found = geo.nearest(GeoPoint::new(28.70, 77.10), 5.0).unwrap();
        assert_eq!(found.driver_id, d("near"));
        assert!(found.distance_km < 1.5);
    }

    #[test]
    fn test_nearest_respects_radius() {
        let geo = GeoIndex::new();
        geo.upsert(d("far"), GeoPoint::new(28.80, 77.10), true); // ~11 km
        assert!(geo.nearest(GeoPoint::new(28.70, 77.10), 5.0).is_none());
        assert!(geo.nearest(GeoPoint::new(28.70, 77.10), 15.0).is_some());
    }

    #[test]
    fn test_offline_reserved_and_active_drivers_are_skipped() {
        let geo = GeoIndex::new();
        let origin = GeoPoint::new(28.70, 77.10);

        geo.upsert(d("offline"), GeoPoint::new(28.701, 77.10), false);
        assert!(geo.nearest(origin, 5.0).is_none());

        geo.upsert(d("reserved"), GeoPoint::new(28.701, 77.10), true);
        geo.reserve_nearest(origin, 5.0, &ride("r-1")).unwrap();
        assert!(geo.nearest(origin, 5.0).is_none());

        geo.upsert(d("busy"), GeoPoint::new(28.702, 77.10), true);
        let found = geo.reserve_nearest(origin, 5.0, &ride("r-2")).unwrap();
        assert_eq!(found.driver_id, d("busy"));
        geo.confirm_reservation(&d("busy"), &ride("r-2")).unwrap();
        assert!(geo.nearest(origin, 5.0).is_none());
    }

    #[test]
    fn test_reserve_nearest_is_exclusive() {
        let geo = GeoIndex::new();
        let origin = GeoPoint::new(28.70, 77.10);
        geo.upsert(d("only"), GeoPoint::new(28.701, 77.10), true);

        let first = geo.reserve_nearest(origin, 5.0, &ride("r-1"));
        let second = geo.reserve_nearest(origin, 5.0, &ride("r-2"));
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn test_confirm_reservation_conflicts() {
        let geo = GeoIndex::new();
        geo.upsert(d("a"), GeoPoint::new(28.701, 77.10), true);
        geo.reserve_nearest(GeoPoint::new(28.70, 77.10), 5.0, &ride("r-1"))
            .unwrap();

        // Wrong ride id.
        assert!(matches!(
            geo.confirm_reservation(&d("a"), &ride("r-2")),
            Err(CoreError::ReservationConflict(_))
        ));
        // Right ride id.
        geo.confirm_reservation(&d("a"), &ride("r-1")).unwrap();
        // Reservation is consumed.
        assert!(matches!(
            geo.confirm_reservation(&d("a"), &ride("r-1")),
            Err(CoreError::ReservationConflict(_))
        ));
    }

    #[test]
    fn test_release_reservation_if_only_matching_ride() {
        let geo = GeoIndex::new();
        geo.upsert(d("a"), GeoPoint::new(28.701, 77.10), true);
        geo.reserve_nearest(GeoPoint::new(28.70, 77.10), 5.0, &ride("r-1"))
            .unwrap();

        assert!(!geo.release_reservation_if(&d("a"), &ride("other")));
        assert!(geo.release_reservation_if(&d("a"), &ride("r-1")));
        // Driver is matchable again.
        assert!(geo.nearest(GeoPoint::new(28.70, 77.10), 5.0).is_some());
    }

    #[test]
    fn test_going_offline_releases_reservation() {
        let geo = GeoIndex::new();
        geo.upsert(d("a"), GeoPoint::new(28.701, 77.10), true);
        geo.reserve_nearest(GeoPoint::new(28.70, 77.10), 5.0, &ride("r-1"))
            .unwrap();

        geo.set_online(&d("a"), false);
        geo.set_online(&d("a"), true);
        assert!(geo.nearest(GeoPoint::new(28.70, 77.10), 5.0).is_some());
    }

    #[test]
    fn test_update_position_requires_presence() {
        let geo = GeoIndex::new();
        assert!(!geo.update_position(&d("ghost"), GeoPoint::new(1.0, 1.0)));
        geo.upsert(d("a"), GeoPoint::new(1.0, 1.0), true);
        assert!(geo.update_position(&d("a"), GeoPoint::new(1.1, 1.0)));
        assert_eq!(geo.position_of(&d("a")).unwrap().lat, 1.1);
    }

    #[test]
    fn test_rebuild_from_durable_rows() {
        let geo = GeoIndex::new();
        geo.upsert(d("stale"), GeoPoint::new(0.0, 0.0), true);
        geo.rebuild_from(vec![
            (d("a"), GeoPoint::new(28.701, 77.10), true),
            (d("b"), GeoPoint::new(28.72, 77.10), false),
        ]);
        let online = geo.online_snapshot();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].0, d("a"));
    }
}
