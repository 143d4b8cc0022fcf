use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Service configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Base URL of the external route/fare estimation service. When unset,
    /// the built-in haversine estimator is used.
    pub route_api_url: Option<String>,
    /// Maximum distance from pickup within which a driver can be matched.
    pub matching_radius_km: f64,
    /// How long a matched driver holds a reservation before the offer
    /// expires and the driver becomes matchable again.
    pub offer_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let route_api_url = env_map.get("ROUTE_API_URL").cloned();

        let matching_radius_km = env_map
            .get("MATCHING_RADIUS_KM")
            .map(|s| s.as_str())
            .unwrap_or("5.0")
            .parse::<f64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "MATCHING_RADIUS_KM".to_string(),
                    "must be a valid number".to_string(),
                )
            })?;
        if !matching_radius_km.is_finite() || matching_radius_km <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "MATCHING_RADIUS_KM".to_string(),
                "must be positive".to_string(),
            ));
        }

        let offer_timeout_secs = env_map
            .get("OFFER_TIMEOUT_SECS")
            .map(|s| s.as_str())
            .unwrap_or("30")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "OFFER_TIMEOUT_SECS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;
        if offer_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "OFFER_TIMEOUT_SECS".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Config {
            port,
            database_path,
            route_api_url,
            matching_radius_km,
            offer_timeout: Duration::from_secs(offer_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.matching_radius_km, 5.0);
        assert_eq!(config.offer_timeout, Duration::from_secs(30));
        assert!(config.route_api_url.is_none());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_matching_radius() {
        let mut env_map = setup_required_env();
        env_map.insert("MATCHING_RADIUS_KM".to_string(), "-1".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "MATCHING_RADIUS_KM"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_offer_timeout_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("OFFER_TIMEOUT_SECS".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "OFFER_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("MATCHING_RADIUS_KM".to_string(), "7.5".to_string());
        env_map.insert("OFFER_TIMEOUT_SECS".to_string(), "10".to_string());
        env_map.insert(
            "ROUTE_API_URL".to_string(),
            "http://localhost:5000".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.matching_radius_km, 7.5);
        assert_eq!(config.offer_timeout, Duration::from_secs(10));
        assert_eq!(
            config.route_api_url.as_deref(),
            Some("http://localhost:5000")
        );
    }
}
