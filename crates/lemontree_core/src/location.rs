//! crates/lemontree_core/src/location.rs
//!
//! Postal code resolution. Everything that turns a postal code into
//! coordinates goes through here so the stored triple is always consistent.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{GeoLocation, SessionContext, User};
use crate::ports::{GeocodingService, PortError, PortResult, UserStore};

/// Country label as picked in the registration form, and the name the
/// geocoder understands for it.
const COUNTRY_ALIASES: &[(&str, &str)] = &[("Korea, Republic of South Korea", "South Korea")];

pub fn normalize_country(country: &str) -> &str {
    let country = country.trim();
    COUNTRY_ALIASES
        .iter()
        .find(|(label, _)| *label == country)
        .map(|(_, alias)| *alias)
        .unwrap_or(country)
}

pub fn normalize_postal_code(postal_code: &str) -> String {
    postal_code.trim().to_uppercase()
}

pub struct LocationResolver {
    geocoder: Arc<dyn GeocodingService>,
    users: Arc<dyn UserStore>,
}

impl LocationResolver {
    pub fn new(geocoder: Arc<dyn GeocodingService>, users: Arc<dyn UserStore>) -> Self {
        Self { geocoder, users }
    }

    /// Geocodes a postal code into a complete location. The country stored
    /// on the location is the one given, not the geocoder alias.
    pub async fn resolve(&self, postal_code: &str, country: &str) -> PortResult<GeoLocation> {
        let postal_code = normalize_postal_code(postal_code);
        if postal_code.is_empty() {
            return Err(PortError::InvalidInput("postal code is required".to_string()));
        }
        if country.trim().is_empty() {
            return Err(PortError::InvalidInput("country is required".to_string()));
        }

        let point = self
            .geocoder
            .geocode(&postal_code, normalize_country(country))
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => PortError::InvalidInput(
                    "Invalid Zipcode. Please enter a valid zipcode.".to_string(),
                ),
                other => other,
            })?;
        if !point.is_valid() {
            return Err(PortError::Unexpected(format!(
                "geocoder returned an invalid coordinate ({}, {})",
                point.latitude, point.longitude
            )));
        }
        Ok(GeoLocation::new(point, country.trim(), postal_code))
    }

    /// Resolves and stores a new location for the signed-in user.
    #[instrument(skip(self, session), fields(user_id = ?session.user_id()))]
    pub async fn update_user_location(
        &self,
        session: &SessionContext,
        postal_code: &str,
        country: Option<&str>,
    ) -> PortResult<User> {
        let user = session.require_user()?;
        let country = match country.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => c.to_string(),
            None => user
                .location
                .as_ref()
                .map(|l| l.country.clone())
                .ok_or_else(|| PortError::InvalidInput("country is required".to_string()))?,
        };

        let location = self.resolve(postal_code, &country).await?;
        self.users.update_location(user.id, &location).await?;
        info!(geohash = location.geohash(), "User location updated");

        let mut updated = user.clone();
        updated.location = Some(location);
        Ok(updated)
    }

    /// Changes the push preference, optionally registering a new token.
    pub async fn update_notifications(
        &self,
        session: &SessionContext,
        allow: bool,
        push_token: Option<String>,
    ) -> PortResult<Uuid> {
        let user = session.require_user()?;
        let push_token = push_token.filter(|t| !t.trim().is_empty());
        self.users
            .set_push_notifications(user.id, allow, push_token)
            .await?;
        Ok(user.id)
    }
}
