use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{token_digest, Registry, SessionHandle};
use waymark_proto::{
    generate_session_id, ClientMessage, FieldMessage, ServerMessage, SessionIdentity,
};

/// WebSocket upgrade handler for `/ws`.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(registry): State<Registry>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Handle one connection: join handshake, then the publish/status/signal
/// loop until the transport closes.
async fn handle_socket(socket: WebSocket, registry: Registry) {
    let (mut sink, mut stream) = socket.split();

    // Per-connection outbound queue. Fan-out only ever enqueues here, so a
    // slow receiver never stalls a publisher.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // The first well-formed frame must be a join carrying the identity
    // tuple; anything else gets an error reply and another chance.
    let Some(identity) = await_join(&mut stream, &tx).await else {
        drop(tx);
        let _ = writer.await;
        return;
    };

    if identity.group_token.trim().is_empty() {
        let _ = tx.send(ServerMessage::JoinError {
            reason: "group token must not be empty".to_string(),
        });
        // Closing the queue lets the writer drain the rejection before the
        // socket goes away.
        drop(tx);
        let _ = writer.await;
        return;
    }

    let session_id = generate_session_id();
    let group_token = identity.group_token.clone();
    info!(
        group = %token_digest(&group_token),
        session_id,
        is_sender_role = identity.is_sender_role,
        "session joined"
    );

    registry.add_session(SessionHandle::new(
        session_id.clone(),
        identity.clone(),
        tx.clone(),
    ));
    let _ = tx.send(ServerMessage::JoinSuccess {
        session_id: session_id.clone(),
    });
    registry.broadcast_except(
        &group_token,
        &session_id,
        ServerMessage::PeerConnected {
            session_id: session_id.clone(),
            steam_id: identity.steam_id.clone(),
            steam_name: identity.steam_name.clone(),
            is_sender_role: identity.is_sender_role,
        },
    );

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(session_id, error = %err, "websocket error, closing");
                break;
            }
        };
        let text = match frame {
            Message::Text(text) => text.to_string(),
            // Binary frames carrying JSON are accepted for compatibility.
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(session_id, "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        match ClientMessage::decode(&text) {
            Ok(message) => handle_client_message(message, &session_id, &identity, &registry, &tx),
            Err(err) => {
                warn!(session_id, error = %err, "malformed client message");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("invalid message format: {err}"),
                });
            }
        }
    }

    // Clean up and tell the rest of the group who left.
    if let Some(departed) = registry.remove_session(&group_token, &session_id) {
        registry.broadcast_except(
            &group_token,
            &session_id,
            ServerMessage::PeerDisconnected {
                session_id: session_id.clone(),
                steam_id: departed.steam_id,
                steam_name: departed.steam_name,
                is_sender_role: departed.is_sender_role,
            },
        );
    }
    info!(
        group = %token_digest(&group_token),
        session_id,
        "session disconnected"
    );
}

/// Read frames until a join message arrives. Returns `None` once the
/// transport closes without one.
async fn await_join(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Option<SessionIdentity> {
    while let Some(frame) = stream.next().await {
        let text = match frame.ok()? {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => String::from_utf8(data.to_vec()).ok()?,
            Message::Close(_) => return None,
            _ => continue,
        };
        match ClientMessage::decode(&text) {
            Ok(ClientMessage::Join { identity }) => return Some(identity),
            Ok(_) => {
                let _ = tx.send(ServerMessage::Error {
                    message: "expected a join message first".to_string(),
                });
            }
            Err(err) => {
                let _ = tx.send(ServerMessage::Error {
                    message: format!("invalid message format: {err}"),
                });
            }
        }
    }
    None
}

fn handle_client_message(
    message: ClientMessage,
    session_id: &str,
    identity: &SessionIdentity,
    registry: &Registry,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match message {
        ClientMessage::Join { .. } => {
            let _ = tx.send(ServerMessage::Error {
                message: "session has already joined a group".to_string(),
            });
        }
        ClientMessage::Publish { value } => {
            // Transport, not business logic: merge for later snapshots and
            // fan out unmodified, tagged with the publisher's steamId.
            registry.merge_field(&identity.group_token, session_id, &value);
            registry.broadcast_except(
                &identity.group_token,
                session_id,
                ServerMessage::Field {
                    message: FieldMessage {
                        steam_id: identity.steam_id.clone(),
                        value,
                    },
                },
            );
        }
        ClientMessage::Status => {
            let snapshot = registry.snapshot_for(&identity.group_token, session_id);
            let _ = tx.send(snapshot);
        }
        ClientMessage::Signal {
            to_session,
            payload,
        } => {
            registry.send_to_session(
                &identity.group_token,
                &to_session,
                ServerMessage::Signal {
                    from_session: session_id.to_string(),
                    payload,
                },
            );
        }
    }
}
