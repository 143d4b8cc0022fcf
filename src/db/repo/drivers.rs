//! Durable driver profile rows: last known location and online flag.
//!
//! The live presence view in the GeoIndex is authoritative for matching;
//! these rows exist so the view can be rebuilt after a restart.

use super::Repository;
use crate::domain::{DriverId, GeoPoint};
use chrono::Utc;
use sqlx::Row;

impl Repository {
    /// Insert or update a driver's profile row.
    pub async fn upsert_driver(
        &self,
        driver_id: &DriverId,
        position: Option<GeoPoint>,
        online: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO drivers (driver_id, lat, lng, online, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(driver_id) DO UPDATE SET
                lat = COALESCE(excluded.lat, drivers.lat),
                lng = COALESCE(excluded.lng, drivers.lng),
                online = excluded.online,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(driver_id.as_str())
        .bind(position.map(|p| p.lat))
        .bind(position.map(|p| p.lng))
        .bind(online)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Flip the online flag without touching the stored location.
    pub async fn set_driver_online(
        &self,
        driver_id: &DriverId,
        online: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE drivers SET online = ?, updated_at = ? WHERE driver_id = ?")
            .bind(online)
            .bind(Utc::now().to_rfc3339())
            .bind(driver_id.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// All driver rows with a known location, for rebuilding the live view.
    pub async fn driver_presence_rows(
        &self,
    ) -> Result<Vec<(DriverId, GeoPoint, bool)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT driver_id, lat, lng, online FROM drivers WHERE lat IS NOT NULL AND lng IS NOT NULL",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    DriverId::new(row.try_get::<String, _>("driver_id")?),
                    GeoPoint::new(row.try_get("lat")?, row.try_get("lng")?),
                    row.try_get("online")?,
                ))
            })
            .collect()
    }
}
