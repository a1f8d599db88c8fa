//! services/api/src/adapters/push.rs
//!
//! Delivers push notifications through the Expo push relay.

use std::time::Duration;

use async_trait::async_trait;
use lemontree_core::ports::{PortError, PortResult, PushNotificationService};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    sound: &'a str,
    title: &'a str,
    body: &'a str,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    data: ExpoTickets,
}

/// The relay answers a single message with one ticket and a batch with a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpoTickets {
    One(ExpoTicket),
    Many(Vec<ExpoTicket>),
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl ExpoResponse {
    fn first_error(&self) -> Option<&ExpoTicket> {
        match &self.data {
            ExpoTickets::One(ticket) => Some(ticket).filter(|t| t.status == "error"),
            ExpoTickets::Many(tickets) => tickets.iter().find(|t| t.status == "error"),
        }
    }
}

/// An adapter that implements the `PushNotificationService` port using Expo.
#[derive(Clone)]
pub struct ExpoPushAdapter {
    client: Client,
    url: String,
}

impl ExpoPushAdapter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PushNotificationService for ExpoPushAdapter {
    async fn send(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> PortResult<()> {
        let message = ExpoMessage {
            to: push_token,
            sound: "default",
            title,
            body,
            data,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("push request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(%status, body = %text, "Expo push failed");
            return Err(PortError::Unexpected(format!("Expo push API error {}", status)));
        }

        let tickets: ExpoResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("unreadable push response: {}", e)))?;
        if let Some(ticket) = tickets.first_error() {
            error!(?ticket, "Expo ticket error");
            return Err(PortError::Unexpected(format!(
                "Expo ticket error: {}",
                ticket.message.as_deref().unwrap_or("unknown")
            )));
        }

        info!("Expo notification sent");
        Ok(())
    }
}
