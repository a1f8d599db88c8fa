//! crates/lemontree_core/src/notify.rs
//!
//! Best-effort push delivery. A notification that cannot be delivered is
//! logged and dropped; it never fails the operation that triggered it.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::User;
use crate::ports::PushNotificationService;

pub const APP_NAME: &str = "Lemontree";

#[derive(Clone)]
pub struct Notifier {
    push: Arc<dyn PushNotificationService>,
}

impl Notifier {
    pub fn new(push: Arc<dyn PushNotificationService>) -> Self {
        Self { push }
    }

    /// Sends to `recipient` if they have a token and have not opted out.
    /// Returns whether a notification was handed to the relay.
    pub async fn notify(&self, recipient: &User, title: &str, body: &str, data: Value) -> bool {
        let Some(token) = recipient.reachable_push_token() else {
            debug!(user_id = %recipient.id, "Recipient is not reachable by push");
            return false;
        };
        match self.push.send(token, title, body, data).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = %recipient.id, error = %e, "Push notification failed");
                false
            }
        }
    }

    /// Sends the same notification to every recipient concurrently.
    pub async fn notify_all(&self, recipients: &[User], title: &str, body: &str, data: Value) -> usize {
        let sends = recipients
            .iter()
            .map(|r| self.notify(r, title, body, data.clone()));
        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }
}
