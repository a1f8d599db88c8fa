//! services/api/src/web/ws_handler.rs
//!
//! The live chat WebSocket. A connection subscribes to any number of
//! conversations the user takes part in and receives their new messages as
//! they are stored.

use crate::web::{
    dto::MessageDto,
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use lemontree_core::domain::{Message as ChatMessage, SessionContext};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, session))
}

async fn send_frame(ws_sender: &WsSender, frame: &ServerMessage) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to serialize server message");
            return false;
        }
    };
    ws_sender.lock().await.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, session: SessionContext) {
    // The sender is wrapped in an Arc<Mutex<>> so forwarding tasks can share it.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    let Some(user_id) = session.user_id() else {
        let _ = send_frame(
            &ws_sender,
            &ServerMessage::Error {
                message: "Sign in required".to_string(),
            },
        )
        .await;
        return;
    };
    info!(%user_id, "Chat connection established");

    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    // --- Main Message Loop ---
    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(%user_id, error = %e, "Chat connection failed");
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => {
                handle_client_message(message, &app_state, &session, &ws_sender, &mut subscriptions)
                    .await
            }
            Err(e) => Some(ServerMessage::Error {
                message: format!("Unrecognised message: {}", e),
            }),
        };
        if let Some(reply) = reply {
            if !send_frame(&ws_sender, &reply).await {
                break;
            }
        }
    }

    // --- Cleanup ---
    for (_, task) in subscriptions.drain() {
        stop_forwarder(task).await;
    }
    app_state.hub.cleanup().await;
    info!(%user_id, "Chat connection closed");
}

async fn handle_client_message(
    message: ClientMessage,
    app_state: &Arc<AppState>,
    session: &SessionContext,
    ws_sender: &WsSender,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) -> Option<ServerMessage> {
    match message {
        ClientMessage::Subscribe { conversation_id } => {
            if let Err(e) = app_state.messaging.conversation(session, &conversation_id).await {
                return Some(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
            if !subscriptions.contains_key(&conversation_id) {
                let rx = app_state.hub.subscribe(&conversation_id).await;
                let task = spawn_forwarder(rx, ws_sender.clone());
                subscriptions.insert(conversation_id.clone(), task);
            }
            Some(ServerMessage::Subscribed { conversation_id })
        }
        ClientMessage::Unsubscribe { conversation_id } => {
            if let Some(task) = subscriptions.remove(&conversation_id) {
                stop_forwarder(task).await;
            }
            Some(ServerMessage::Unsubscribed { conversation_id })
        }
        ClientMessage::Send {
            conversation_id,
            text,
        } => match app_state
            .messaging
            .send_message(session, &conversation_id, &text)
            .await
        {
            // Subscribers get the message from the hub.
            Ok(_) if subscriptions.contains_key(&conversation_id) => None,
            Ok(stored) => Some(ServerMessage::Message {
                message: MessageDto::from(&stored),
            }),
            Err(e) => Some(ServerMessage::Error {
                message: e.to_string(),
            }),
        },
    }
}

/// Forwards a conversation's broadcast messages to the socket until either
/// side goes away.
fn spawn_forwarder(mut rx: broadcast::Receiver<ChatMessage>, ws_sender: WsSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let frame = ServerMessage::Message {
                        message: MessageDto::from(&message),
                    };
                    if !send_frame(&ws_sender, &frame).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Chat subscriber fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Aborts a forwarder and waits for it, so its receiver is gone before the
/// hub is cleaned up.
async fn stop_forwarder(task: JoinHandle<()>) {
    task.abort();
    let _ = task.await;
}
