//! Ride record operations.

use super::{money_column, Repository};
use crate::domain::{
    CancelledBy, Cancellation, DriverId, FareBreakdown, GeoPoint, Location, PaymentStatus, Rating,
    Ride, RideId, RideStatus, RiderId, VehicleType,
};
use chrono::{DateTime, Utc};
use sqlx::Row;

fn ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn parse_ts(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                sqlx::Error::Decode(
                    format!("column {}: invalid timestamp {:?}: {}", column, s, e).into(),
                )
            }),
    }
}

fn ride_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Ride, sqlx::Error> {
    let decode = |column: &str, raw: &str| {
        sqlx::Error::Decode(format!("column {}: unknown value {:?}", column, raw).into())
    };

    let status_raw: String = row.try_get("status")?;
    let status =
        RideStatus::parse(&status_raw).ok_or_else(|| decode("status", &status_raw))?;

    let vehicle_raw: String = row.try_get("vehicle_type")?;
    let vehicle_type =
        VehicleType::parse(&vehicle_raw).ok_or_else(|| decode("vehicle_type", &vehicle_raw))?;

    let payment_raw: String = row.try_get("payment_status")?;
    let payment_status = PaymentStatus::parse(&payment_raw)
        .ok_or_else(|| decode("payment_status", &payment_raw))?;

    let cancellation = match row.try_get::<Option<String>, _>("cancelled_by")? {
        None => None,
        Some(by_raw) => {
            let by = CancelledBy::parse(&by_raw).ok_or_else(|| decode("cancelled_by", &by_raw))?;
            let reason: Option<String> = row.try_get("cancellation_reason")?;
            Some(Cancellation {
                reason: reason.unwrap_or_default(),
                by,
            })
        }
    };

    let rating_from = |score_col: &str, review_col: &str| -> Result<Option<Rating>, sqlx::Error> {
        let score: Option<i64> = row.try_get(score_col)?;
        match score {
            None => Ok(None),
            Some(s) => Ok(Some(Rating {
                score: s as u8,
                review: row.try_get(review_col)?,
            })),
        }
    };

    let requested_raw: String = row.try_get("requested_at")?;
    let requested_at = parse_ts(Some(requested_raw), "requested_at")?
        .expect("requested_at is non-null by schema");

    Ok(Ride {
        ride_id: RideId::new(row.try_get::<String, _>("ride_id")?),
        rider_id: RiderId::new(row.try_get::<String, _>("rider_id")?),
        driver_id: row
            .try_get::<Option<String>, _>("driver_id")?
            .map(DriverId::new),
        vehicle_type,
        pickup: Location::new(
            row.try_get::<String, _>("pickup_address")?,
            GeoPoint::new(row.try_get("pickup_lat")?, row.try_get("pickup_lng")?),
        ),
        dropoff: Location::new(
            row.try_get::<String, _>("dropoff_address")?,
            GeoPoint::new(row.try_get("dropoff_lat")?, row.try_get("dropoff_lng")?),
        ),
        status,
        distance_km: row.try_get("distance_km")?,
        duration_secs: row.try_get("duration_secs")?,
        fare: FareBreakdown {
            base_fare: money_column(row, "base_fare")?,
            distance_fare: money_column(row, "distance_fare")?,
            duration_fare: money_column(row, "duration_fare")?,
            total_fare: money_column(row, "total_fare")?,
            discount: money_column(row, "discount")?,
            final_fare: money_column(row, "final_fare")?,
        },
        requested_at,
        accepted_at: parse_ts(row.try_get("accepted_at")?, "accepted_at")?,
        started_at: parse_ts(row.try_get("started_at")?, "started_at")?,
        completed_at: parse_ts(row.try_get("completed_at")?, "completed_at")?,
        cancelled_at: parse_ts(row.try_get("cancelled_at")?, "cancelled_at")?,
        cancellation,
        driver_rating: rating_from("driver_rating_score", "driver_rating_review")?,
        rider_rating: rating_from("rider_rating_score", "rider_rating_review")?,
        payment_status,
        payment_method: row.try_get("payment_method")?,
    })
}

impl Repository {
    /// Insert a freshly requested ride.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_ride(&self, ride: &Ride) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO rides (
                ride_id, rider_id, driver_id, vehicle_type,
                pickup_address, pickup_lat, pickup_lng,
                dropoff_address, dropoff_lat, dropoff_lng,
                status, distance_km, duration_secs,
                base_fare, distance_fare, duration_fare, total_fare, discount, final_fare,
                requested_at, payment_status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ride.ride_id.as_str())
        .bind(ride.rider_id.as_str())
        .bind(ride.driver_id.as_ref().map(|d| d.as_str().to_string()))
        .bind(ride.vehicle_type.as_str())
        .bind(&ride.pickup.address)
        .bind(ride.pickup.point.lat)
        .bind(ride.pickup.point.lng)
        .bind(&ride.dropoff.address)
        .bind(ride.dropoff.point.lat)
        .bind(ride.dropoff.point.lng)
        .bind(ride.status.as_str())
        .bind(ride.distance_km)
        .bind(ride.duration_secs)
        .bind(ride.fare.base_fare.to_canonical_string())
        .bind(ride.fare.distance_fare.to_canonical_string())
        .bind(ride.fare.duration_fare.to_canonical_string())
        .bind(ride.fare.total_fare.to_canonical_string())
        .bind(ride.fare.discount.to_canonical_string())
        .bind(ride.fare.final_fare.to_canonical_string())
        .bind(ride.requested_at.to_rfc3339())
        .bind(ride.payment_status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the mutable lifecycle fields of a ride after a transition.
    ///
    /// # Errors
    /// Returns `RowNotFound` if the ride does not exist.
    pub async fn update_ride(&self, ride: &Ride) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE rides SET
                driver_id = ?,
                status = ?,
                base_fare = ?, distance_fare = ?, duration_fare = ?,
                total_fare = ?, discount = ?, final_fare = ?,
                accepted_at = ?, started_at = ?, completed_at = ?, cancelled_at = ?,
                cancellation_reason = ?, cancelled_by = ?,
                driver_rating_score = ?, driver_rating_review = ?,
                rider_rating_score = ?, rider_rating_review = ?,
                payment_status = ?, payment_method = ?
            WHERE ride_id = ?
            "#,
        )
        .bind(ride.driver_id.as_ref().map(|d| d.as_str().to_string()))
        .bind(ride.status.as_str())
        .bind(ride.fare.base_fare.to_canonical_string())
        .bind(ride.fare.distance_fare.to_canonical_string())
        .bind(ride.fare.duration_fare.to_canonical_string())
        .bind(ride.fare.total_fare.to_canonical_string())
        .bind(ride.fare.discount.to_canonical_string())
        .bind(ride.fare.final_fare.to_canonical_string())
        .bind(ts(&ride.accepted_at))
        .bind(ts(&ride.started_at))
        .bind(ts(&ride.completed_at))
        .bind(ts(&ride.cancelled_at))
        .bind(ride.cancellation.as_ref().map(|c| c.reason.clone()))
        .bind(ride.cancellation.as_ref().map(|c| c.by.as_str()))
        .bind(ride.driver_rating.as_ref().map(|r| r.score as i64))
        .bind(ride.driver_rating.as_ref().and_then(|r| r.review.clone()))
        .bind(ride.rider_rating.as_ref().map(|r| r.score as i64))
        .bind(ride.rider_rating.as_ref().and_then(|r| r.review.clone()))
        .bind(ride.payment_status.as_str())
        .bind(ride.payment_method.clone())
        .bind(ride.ride_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Fetch a ride by id.
    pub async fn fetch_ride(&self, ride_id: &RideId) -> Result<Option<Ride>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM rides WHERE ride_id = ?")
            .bind(ride_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ride_from_row).transpose()
    }

    /// Ride history for an actor (as rider or driver), newest first.
    pub async fn rides_for_actor(
        &self,
        actor_id: &str,
        limit: i64,
    ) -> Result<Vec<Ride>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM rides
            WHERE rider_id = ? OR driver_id = ?
            ORDER BY requested_at DESC
            LIMIT ?
            "#,
        )
        .bind(actor_id)
        .bind(actor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ride_from_row).collect()
    }

    /// Write one role's rating, guarded against overwriting a previous one.
    /// Returns false if that role already rated the ride (first write wins).
    pub async fn attach_rating(
        &self,
        ride_id: &RideId,
        rates_driver: bool,
        rating: &Rating,
    ) -> Result<bool, sqlx::Error> {
        let sql = if rates_driver {
            r#"
            UPDATE rides SET driver_rating_score = ?, driver_rating_review = ?
            WHERE ride_id = ? AND status = 'completed' AND driver_rating_score IS NULL
            "#
        } else {
            r#"
            UPDATE rides SET rider_rating_score = ?, rider_rating_review = ?
            WHERE ride_id = ? AND status = 'completed' AND rider_rating_score IS NULL
            "#
        };
        let result = sqlx::query(sql)
            .bind(rating.score as i64)
            .bind(rating.review.clone())
            .bind(ride_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
