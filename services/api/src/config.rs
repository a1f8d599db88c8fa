//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use lemontree_core::listing::{DEFAULT_PAGE_SIZE, DEFAULT_RADIUS_KM};
use tracing::Level;

const DEFAULT_GEOCODING_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DEFAULT_EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where entities are persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    /// Process-local documents, optionally seeded from a JSON file.
    Memory { seed_file: Option<PathBuf> },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store: StoreBackend,
    pub log_level: Level,
    pub google_maps_api_key: Option<String>,
    pub geocoding_url: String,
    pub expo_push_url: String,
    pub listing_radius_km: f64,
    pub listing_page_size: usize,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Load Server and Storage Settings ---
        let bind_address = parse_or(&var, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let backend = var("STORE_BACKEND").unwrap_or_else(|| "postgres".to_string());
        let store = match backend.to_ascii_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres {
                database_url: var("DATABASE_URL")
                    .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?,
            },
            "memory" => StoreBackend::Memory {
                seed_file: var("SEED_FILE").map(PathBuf::from),
            },
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{}' is not one of postgres, memory", other),
                ))
            }
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load External Services (the API key is optional) ---
        let google_maps_api_key = var("GOOGLE_MAPS_API_KEY").filter(|k| !k.is_empty());
        let geocoding_url = var("GEOCODING_URL").unwrap_or_else(|| DEFAULT_GEOCODING_URL.to_string());
        let expo_push_url = var("EXPO_PUSH_URL").unwrap_or_else(|| DEFAULT_EXPO_PUSH_URL.to_string());

        // --- Load Listing Settings ---
        let listing_radius_km = parse_or(&var, "LISTING_RADIUS_KM", DEFAULT_RADIUS_KM)?;
        if !listing_radius_km.is_finite() || listing_radius_km <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "LISTING_RADIUS_KM".to_string(),
                "must be a positive number of kilometres".to_string(),
            ));
        }
        let listing_page_size = parse_or(&var, "LISTING_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if listing_page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "LISTING_PAGE_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let cors_origin = var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:8081".to_string());

        Ok(Self {
            bind_address,
            store,
            log_level,
            google_maps_api_key,
            geocoding_url,
            expo_push_url,
            listing_radius_km,
            listing_page_size,
            cors_origin,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
