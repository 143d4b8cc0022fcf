use axum::extract::State;
use axum::Json;
use sqlx::sqlite::SqlitePool;

use super::AppState;
use crate::error::AppError;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready means the durable store answers; a wedged or missing database file
/// should fail readiness, not just the first ride request.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    probe_store(state.repo.pool()).await?;
    Ok(Json(serde_json::json!({"status": "ready"})))
}

async fn probe_store(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_probe_store_answers_on_live_pool() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.unwrap();
        probe_store(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_store_fails_on_closed_pool() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.unwrap();
        pool.close().await;
        assert!(probe_store(&pool).await.is_err());
    }
}
