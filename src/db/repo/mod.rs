//! Repository layer for database operations.
//!
//! This is the persistence gateway: it translates domain entities to and
//! from the durable store and is never the source of truth for live routing
//! decisions. Methods are organized across submodules by domain:
//! - `rides.rs` - ride records and lifecycle writes
//! - `drivers.rs` - durable driver profile rows
//!
//! Pricing lookups live here in `mod.rs`.

mod drivers;
mod rides;

use crate::domain::{Money, PricingPlan, VehicleType};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Look up the pricing plan for a vehicle type.
    pub async fn pricing_for(
        &self,
        vehicle_type: VehicleType,
    ) -> Result<Option<PricingPlan>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT base_fare, per_km, per_minute, min_fare FROM pricing WHERE vehicle_type = ?",
        )
        .bind(vehicle_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(PricingPlan {
            vehicle_type,
            base_fare: money_column(&row, "base_fare")?,
            per_km: money_column(&row, "per_km")?,
            per_minute: money_column(&row, "per_minute")?,
            min_fare: money_column(&row, "min_fare")?,
        }))
    }
}

/// Decode a canonical money string column.
pub(crate) fn money_column(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Money, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Money::from_str_canonical(&raw).map_err(|e| {
        sqlx::Error::Decode(format!("column {}: invalid decimal {:?}: {}", column, raw, e).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pricing_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.unwrap();
        let repo = Repository::new(pool);

        let plan = repo
            .pricing_for(VehicleType::Economy)
            .await
            .unwrap()
            .expect("economy plan seeded");
        assert_eq!(plan.base_fare, Money::from_i64(40));
        assert_eq!(plan.per_km, Money::from_i64(15));
        assert_eq!(plan.per_minute, Money::from_i64(2));
        assert_eq!(plan.min_fare, Money::from_i64(40));
    }
}
