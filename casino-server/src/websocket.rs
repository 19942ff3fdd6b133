use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use ledger::LedgerError;
use ledger::types::{LedgerEvent, UserAccount, UserId, from_amount};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use crate::{AppState, routes::blocking};

// Notification types that can be sent to users
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationType {
    #[serde(rename = "balance_changed")]
    BalanceChanged {
        user_id: String,
        points: f64,
        credits: f64,
    },
    #[serde(rename = "connection_established")]
    ConnectionEstablished { user_id: String, message: String },
}

impl NotificationType {
    /// The notification for `user_id`, if the event concerns that user.
    pub fn for_user(event: &LedgerEvent, user_id: UserId) -> Option<Self> {
        match event {
            LedgerEvent::BalanceChanged {
                user_id: changed,
                balances,
            } if *changed == user_id => Some(NotificationType::BalanceChanged {
                user_id: user_id.to_string(),
                points: from_amount(balances.points),
                credits: from_amount(balances.credits),
            }),
            _ => None,
        }
    }
}

// Authentication message structure
#[derive(Debug, Deserialize)]
struct AuthMessage {
    #[serde(rename = "userId")]
    user_id: UserId,
}

// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket_with_auth(socket, state))
}

fn to_text(notification: &NotificationType) -> Option<Message> {
    match serde_json::to_string(notification) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!("Failed to serialize notification: {}", e);
            None
        }
    }
}

// Handle socket with identification via first message
async fn handle_socket_with_auth(socket: WebSocket, state: AppState) {
    tracing::info!("WebSocket connection established, awaiting identification");

    let (mut sender, mut receiver) = socket.split();

    let user_id = match receiver.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<AuthMessage>(&text) {
            Ok(auth_msg) => match lookup_user(&state, auth_msg.user_id).await {
                Ok(account) => account.id,
                Err(e) => {
                    tracing::warn!("Rejected WebSocket for user {}: {}", auth_msg.user_id, e);
                    let rejection = NotificationType::ConnectionEstablished {
                        user_id: auth_msg.user_id.to_string(),
                        message: format!("Connection refused: {e}"),
                    };
                    if let Some(msg) = to_text(&rejection) {
                        let _ = sender.send(msg).await;
                    }
                    return;
                }
            },
            Err(e) => {
                tracing::warn!("Failed to parse WebSocket auth message: {}", e);
                let _ = sender
                    .send(Message::Text(
                        "Connection refused: invalid message format".into(),
                    ))
                    .await;
                return;
            }
        },
        Some(Ok(Message::Close(_))) | None => {
            tracing::info!("WebSocket connection closed before identification");
            return;
        }
        Some(Err(e)) => {
            tracing::error!("WebSocket error during identification: {}", e);
            return;
        }
        _ => {
            tracing::warn!("Unexpected message type during WebSocket identification");
            return;
        }
    };

    // Subscribe before confirming so no change after the confirmation is missed
    let events = BroadcastStream::new(state.ledger.subscribe());

    let connection_msg = NotificationType::ConnectionEstablished {
        user_id: user_id.to_string(),
        message: "Successfully connected to balance notifications".to_string(),
    };
    if let Some(msg) = to_text(&connection_msg) {
        if sender.send(msg).await.is_err() {
            tracing::warn!("Failed to send connection message to user {}", user_id);
            return;
        }
    }

    let incoming_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    tracing::info!("WebSocket connection closed by user {}", user_id);
                    break;
                }
                Err(e) => {
                    tracing::error!("WebSocket error for user {}: {}", user_id, e);
                    break;
                }
                Ok(_) => {}
            }
        }
    });

    let mut notifications = Box::pin(events.filter_map(move |event| async move {
        match event {
            Ok(event) => NotificationType::for_user(&event, user_id),
            Err(e) => {
                tracing::warn!("Notifications for user {} lagged: {}", user_id, e);
                None
            }
        }
    }));
    let outgoing_task = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let Some(msg) = to_text(&notification) else {
                continue;
            };
            if sender.send(msg).await.is_err() {
                tracing::warn!("Failed to send notification to user {}", user_id);
                break;
            }
        }
    });

    // Wait for either side to finish, then stop the other
    let incoming_abort = incoming_task.abort_handle();
    let outgoing_abort = outgoing_task.abort_handle();
    tokio::select! {
        _ = incoming_task => {
            outgoing_abort.abort();
        }
        _ = outgoing_task => {
            incoming_abort.abort();
        }
    }

    tracing::info!("WebSocket connection closed for user {}", user_id);
}

async fn lookup_user(state: &AppState, user_id: UserId) -> Result<UserAccount, LedgerError> {
    let ledger = state.ledger.clone();
    blocking(move || ledger.fetch_user(user_id))
        .await
        .map_err(|e| e.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::types::{Balances, ServerId};

    #[test]
    fn test_events_are_filtered_per_user() {
        let event = LedgerEvent::BalanceChanged {
            user_id: UserId(5),
            balances: Balances {
                points: 1_250,
                credits: 0,
            },
        };
        match NotificationType::for_user(&event, UserId(5)) {
            Some(NotificationType::BalanceChanged { points, .. }) => assert_eq!(points, 12.5),
            other => panic!("unexpected notification {other:?}"),
        }
        assert!(NotificationType::for_user(&event, UserId(6)).is_none());

        let profit = LedgerEvent::ServerProfitChanged {
            server_id: ServerId(1),
            total_profit: 10,
        };
        assert!(NotificationType::for_user(&profit, UserId(5)).is_none());
    }
}
