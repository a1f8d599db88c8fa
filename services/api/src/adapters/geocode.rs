//! services/api/src/adapters/geocode.rs
//!
//! Resolves postal codes to coordinates with the Google Geocoding API.

use std::time::Duration;

use async_trait::async_trait;
use lemontree_core::geo::GeoPoint;
use lemontree_core::ports::{GeocodingService, PortError, PortResult};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

/// An adapter that implements the `GeocodingService` port using Google.
#[derive(Clone)]
pub struct GoogleGeocoder {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl GoogleGeocoder {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

fn interpret(response: GeocodeResponse, address: &str) -> PortResult<GeoPoint> {
    match response.status.as_str() {
        "OK" => {
            let first = response
                .results
                .first()
                .ok_or_else(|| PortError::NotFound(format!("no geocoding result for {}", address)))?;
            let location = &first.geometry.location;
            let point = GeoPoint::new(location.lat, location.lng);
            if !point.is_valid() {
                return Err(PortError::Unexpected(format!(
                    "geocoder returned out-of-range coordinates {:?}",
                    point
                )));
            }
            Ok(point)
        }
        "ZERO_RESULTS" => Err(PortError::NotFound(format!("no geocoding result for {}", address))),
        other => Err(PortError::Unexpected(format!(
            "geocoding failed with {}: {}",
            other,
            response.error_message.unwrap_or_default()
        ))),
    }
}

#[async_trait]
impl GeocodingService for GoogleGeocoder {
    #[instrument(skip(self))]
    async fn geocode(&self, postal_code: &str, country: &str) -> PortResult<GeoPoint> {
        let address = format!("{}, {}", postal_code, country);
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("address", address.as_str())])
            .timeout(REQUEST_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        } else {
            warn!("Geocoding without an API key");
        }

        let response: GeocodeResponse = request
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Geocoding API request failed");
                PortError::Unexpected(format!("geocoding request failed: {}", e))
            })?
            .json()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to parse geocoding response");
                PortError::Unexpected(format!("unreadable geocoding response: {}", e))
            })?;

        debug!(status = %response.status, "Geocoding response");
        interpret(response, &address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw: &str) -> GeocodeResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn takes_the_first_result() {
        let point = interpret(
            response(
                r#"{"status":"OK","results":[
                    {"geometry":{"location":{"lat":44.97,"lng":-93.26}}},
                    {"geometry":{"location":{"lat":10.0,"lng":10.0}}}]}"#,
            ),
            "55401, United States",
        )
        .unwrap();
        assert_eq!(point, GeoPoint::new(44.97, -93.26));
    }

    #[test]
    fn zero_results_is_not_found() {
        let err = interpret(response(r#"{"status":"ZERO_RESULTS","results":[]}"#), "00000, Nowhere")
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[test]
    fn denied_requests_are_unexpected() {
        let err = interpret(
            response(r#"{"status":"REQUEST_DENIED","error_message":"The provided API key is invalid."}"#),
            "55401, United States",
        )
        .unwrap_err();
        assert!(matches!(err, PortError::Unexpected(ref m) if m.contains("API key is invalid")));
    }
}
