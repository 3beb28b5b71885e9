use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // Authentication configuration
    pub jwt_secret: String,

    // Notification settings
    pub default_notifications_per_page: usize,
    pub max_notifications_per_page: usize,

    // Realtime stream settings
    pub stream_sweep_interval_secs: u64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),

            default_notifications_per_page: env::var("DEFAULT_NOTIFICATIONS_PER_PAGE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            max_notifications_per_page: env::var("MAX_NOTIFICATIONS_PER_PAGE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            stream_sweep_interval_secs: env::var("STREAM_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: "info".to_string(),
            jwt_secret: "dev-secret".to_string(),
            default_notifications_per_page: 20,
            max_notifications_per_page: 100,
            stream_sweep_interval_secs: 300,
            cors_allowed_origins: "http://localhost:3001".to_string(),
        }
    }
}
