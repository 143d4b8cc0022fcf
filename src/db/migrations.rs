//! Database migrations and initialization.

use crate::domain::PricingPlan;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Initialize the SQLite database with schema, pragmas and pricing seed data.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;
    seed_pricing(&pool).await?;

    info!("Database initialized successfully at {}", db_path);
    Ok(pool)
}

/// Run all database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");

    for statement in statements(include_str!("schema.sql")) {
        sqlx::query(&statement).execute(pool).await?;
    }

    info!("Migrations completed successfully");
    Ok(())
}

/// Split a schema file into executable statements. `--` comment lines are
/// dropped first so punctuation inside them cannot break the split.
fn statements(schema_sql: &str) -> Vec<String> {
    schema_sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Seed the pricing table with per-vehicle defaults if rows are absent.
async fn seed_pricing(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for plan in PricingPlan::defaults() {
        sqlx::query(
            r#"
            INSERT INTO pricing (vehicle_type, base_fare, per_km, per_minute, min_fare)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(vehicle_type) DO NOTHING
            "#,
        )
        .bind(plan.vehicle_type.as_str())
        .bind(plan.base_fare.to_canonical_string())
        .bind(plan.per_km.to_canonical_string())
        .bind(plan.per_minute.to_canonical_string())
        .bind(plan.min_fare.to_canonical_string())
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Configure SQLite pragmas for reliability under concurrent writers.
async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Row;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode returns the actual mode set; must use fetch to get result
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    info!("SQLite journal_mode set to: {}", journal_mode);

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_statements_ignore_comment_punctuation() {
        let sql = "-- header; with a semicolon\nCREATE TABLE a (x TEXT);\n  -- trailing note\nCREATE TABLE b (y TEXT);\n";
        let stmts = statements(sql);
        assert_eq!(
            stmts,
            vec![
                "CREATE TABLE a (x TEXT)".to_string(),
                "CREATE TABLE b (y TEXT)".to_string(),
            ]
        );
    }

    #[test]
    fn test_embedded_schema_splits_into_clean_statements() {
        for stmt in statements(include_str!("schema.sql")) {
            assert!(
                stmt.starts_with("CREATE TABLE") || stmt.starts_with("CREATE INDEX"),
                "unexpected statement fragment: {}",
                stmt
            );
        }
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();

        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        for table in ["rides", "drivers", "pricing"] {
            let result: (String,) =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                    .bind(table)
                    .fetch_one(&pool)
                    .await
                    .expect("query failed");
            assert_eq!(result.0, table);
        }
    }

    #[tokio::test]
    async fn test_pricing_seeded_once() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();

        let pool = init_db(&db_path).await.expect("init_db failed");
        drop(pool);
        // Re-running init must not duplicate or overwrite rows.
        let pool = init_db(&db_path).await.expect("second init_db failed");

        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pricing")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 3);
    }
}
