//! Websocket endpoint: one session per connection, a writer task draining
//! the connection's event channel, and a read loop feeding the event router.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::AppState;
use crate::domain::ActorId;
use crate::ws::{ActorRole, ClientMessage, ServerEvent};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: everything outbound goes through the channel so fan-out
    // never blocks on a slow socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    debug!(%err, "outbound event failed to serialize");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // The connection is anonymous until its first message names an actor.
    let mut identity: Option<(ActorId, Option<ActorRole>)> = None;

    while let Some(result) = stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(err) => {
                debug!(%err, "websocket read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    if let Some((actor, role)) = client_msg.actor() {
                        let rebind = match &identity {
                            Some((current, _)) => *current != actor,
                            None => true,
                        };
                        if rebind {
                            state.registry.register(actor.clone(), tx.clone());
                        }
                        let role = role.or(identity.as_ref().and_then(|(_, r)| *r));
                        identity = Some((actor, role));
                    }
                    let origin = identity
                        .as_ref()
                        .map(|(actor, _)| actor.clone())
                        .unwrap_or_else(|| ActorId::new("anonymous"));
                    state.router.handle_message(&origin, client_msg).await;
                }
                Err(err) => {
                    let _ = tx.send(ServerEvent::Error {
                        code: "validation_error".to_string(),
                        message: format!("malformed message: {}", err),
                    });
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; binary frames are
            // not part of this protocol.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    if let Some((actor, role)) = identity {
        state.router.handle_disconnect(&actor, role);
    }
    writer.abort();
}
