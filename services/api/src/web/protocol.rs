//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol for live chat between the mobile
//! client and the API server. All frames are JSON text frames.

use serde::{Deserialize, Serialize};

use crate::web::dto::MessageDto;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts streaming a conversation's new messages. Participants only.
    Subscribe { conversation_id: String },

    /// Stops streaming a conversation.
    Unsubscribe { conversation_id: String },

    /// Posts a message; it reaches every subscriber, the sender included.
    Send { conversation_id: String, text: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed { conversation_id: String },

    Unsubscribed { conversation_id: String },

    /// A message stored in a subscribed conversation.
    Message { message: MessageDto },

    /// Reports a failed request. The connection stays open.
    Error { message: String },
}
