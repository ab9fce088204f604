//! WebSocket transport for administrative clients.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use svc_control_core::{
    ControlError, ServiceResponse, SessionId, UpdateKind,
    traits::{ClientHello, ClientPayload, Transport},
};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::protocol::{ClientEnvelope, ServerEnvelope};

/// Transport events delivered to the control plane.
#[derive(Debug)]
pub enum TransportEvent {
    Connected(SessionId),
    Payload(SessionId, ClientPayload),
    Disconnected(SessionId),
}

/// Registered connection: the outbound sender plus a close signal the
/// socket's receive loop waits on.
struct Connection {
    tx: mpsc::UnboundedSender<ServerEnvelope>,
    closed: Arc<Notify>,
}

/// Outbound side of the WebSocket transport, keyed by connection id.
/// Dropping a connection's sender ends its forward task.
pub struct WsTransport {
    conns: RwLock<HashMap<SessionId, Connection>>,
}

impl WsTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, id: SessionId) -> (mpsc::UnboundedReceiver<ServerEnvelope>, Arc<Notify>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Notify::new());
        self.conns.write().unwrap().insert(
            id,
            Connection {
                tx,
                closed: Arc::clone(&closed),
            },
        );
        (rx, closed)
    }

    fn unregister(&self, id: SessionId) {
        self.conns.write().unwrap().remove(&id);
    }

    fn sender(&self, id: SessionId) -> Option<mpsc::UnboundedSender<ServerEnvelope>> {
        self.conns.read().unwrap().get(&id).map(|c| c.tx.clone())
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_to(&self, id: SessionId, response: &ServiceResponse) -> Result<(), ControlError> {
        let sender = self
            .sender(id)
            .ok_or_else(|| ControlError::Transport(format!("connection {id} is gone")))?;
        sender
            .send(ServerEnvelope::from(response))
            .map_err(|_| ControlError::Transport(format!("connection {id} is closing")))
    }

    async fn disconnect(&self, id: SessionId) {
        // Removing the entry stops outbound delivery; the notify breaks the
        // socket's receive loop so the connection actually closes.
        if let Some(conn) = self.conns.write().unwrap().remove(&id) {
            conn.closed.notify_one();
        }
    }
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub transport: Arc<WsTransport>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let id = Uuid::new_v4();

    let (mut rx, closed) = state.transport.register(id);
    let _ = state.events.send(TransportEvent::Connected(id));

    // Forward outbound envelopes to the WebSocket. When the channel ends
    // (the connection was unregistered) a close frame completes the handshake.
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize envelope: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        let msg = tokio::select! {
            () = closed.notified() => break,
            msg = receiver.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(%id, "WebSocket error: {e}");
                break;
            }
        };

        let envelope: ClientEnvelope = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                // Malformed payload: report to the sender, keep the connection.
                tracing::warn!(%id, "Invalid client message: {e}");
                let report = ServiceResponse::client_status(
                    UpdateKind::Alarm,
                    "Failed to process request - Request could not be deserialized.",
                );
                let _ = state.transport.send_to(id, &report).await;
                continue;
            }
        };

        match envelope {
            ClientEnvelope::Ping => {
                if let Some(tx) = state.transport.sender(id) {
                    let _ = tx.send(ServerEnvelope::Pong);
                }
            }
            ClientEnvelope::Hello {
                client_name,
                machine_name,
                credentials,
            } => {
                let hello = ClientHello {
                    client_name,
                    machine_name,
                    credentials,
                };
                let _ = state
                    .events
                    .send(TransportEvent::Payload(id, ClientPayload::Hello(hello)));
            }
            ClientEnvelope::Command { text } => {
                let _ = state
                    .events
                    .send(TransportEvent::Payload(id, ClientPayload::Command(text)));
            }
        }
    }

    state.transport.unregister(id);
    let _ = state.events.send(TransportEvent::Disconnected(id));
    // Unregistering dropped the sender, so the forward task flushes its close
    // frame and ends.
    let _ = send_task.await;
}

/// Create the WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new().merge(create_ws_router(state));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let transport = WsTransport::new();
        let err = transport
            .send_to(Uuid::new_v4(), &ServiceResponse::authentication_success())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Transport(_)));
    }

    #[tokio::test]
    async fn registered_connection_receives_envelopes() {
        let transport = WsTransport::new();
        let id = Uuid::new_v4();
        let (mut rx, _closed) = transport.register(id);

        transport
            .send_to(id, &ServiceResponse::telnet_session(true))
            .await
            .unwrap();
        let envelope = rx.recv().await.unwrap();
        match envelope {
            ServerEnvelope::Response { kind, message, .. } => {
                assert_eq!(kind, "TelnetSession");
                assert_eq!(message, "Established");
            }
            ServerEnvelope::Pong => panic!("unexpected pong"),
        }

        transport.disconnect(id).await;
        assert!(transport
            .send_to(id, &ServiceResponse::telnet_session(false))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn disconnect_wakes_the_receive_loop() {
        let transport = WsTransport::new();
        let id = Uuid::new_v4();
        let (_rx, closed) = transport.register(id);

        transport.disconnect(id).await;

        // The notify permit is stored, so the loop's wait completes even when
        // the disconnect raced ahead of it.
        tokio::time::timeout(std::time::Duration::from_secs(1), closed.notified())
            .await
            .expect("close signal was never raised");
        assert!(transport
            .send_to(id, &ServiceResponse::authentication_failure())
            .await
            .is_err());
    }
}
