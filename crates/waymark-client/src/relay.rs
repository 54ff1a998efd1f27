use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ClientResult, Connectivity};
use waymark_proto::{ClientMessage, FieldValue, ServerMessage, SessionIdentity};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay-side event stream delivered to the sync session.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Message(ServerMessage),
    /// Transport closed. Reconnection policy belongs to the caller; a
    /// reconnect is a fresh join plus a status resubscribe.
    Disconnected,
}

/// Cheap cloneable handle for enqueueing outbound messages from tasks
/// that do not own the client.
#[derive(Clone)]
pub struct RelayHandle {
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

impl RelayHandle {
    pub fn publish(&self, value: FieldValue) -> ClientResult<()> {
        self.enqueue(ClientMessage::Publish { value })
    }

    pub fn request_status(&self) -> ClientResult<()> {
        self.enqueue(ClientMessage::Status)
    }

    pub fn signal(&self, to_session: &str, payload: serde_json::Value) -> ClientResult<()> {
        self.enqueue(ClientMessage::Signal {
            to_session: to_session.to_string(),
            payload,
        })
    }

    fn enqueue(&self, message: ClientMessage) -> ClientResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| ClientError::Transport("relay connection closed".to_string()))
    }
}

/// One live connection to the relay: join handshake, outbound queue, and
/// inbound event fan-out.
pub struct RelayClient {
    session_id: String,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    events: broadcast::Sender<RelayEvent>,
    connectivity: Arc<RwLock<Connectivity>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect and join the group named in the identity tuple. Fails on
    /// transport errors, a join rejection, or a join timeout.
    pub async fn connect(relay_url: &str, identity: SessionIdentity) -> ClientResult<Self> {
        let url = Url::parse(relay_url)
            .map_err(|err| ClientError::Transport(format!("invalid relay url: {err}")))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ClientError::Transport(format!(
                    "unsupported relay scheme {other}"
                )))
            }
        }

        let connectivity = Arc::new(RwLock::new(Connectivity::Connecting));
        let (stream, _) = connect_async(relay_url)
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let join = serde_json::to_string(&ClientMessage::Join { identity })?;
        sink.send(Message::Text(join.into()))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        let session_id = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(frame) = source.next().await {
                let frame = frame.map_err(|err| ClientError::Transport(err.to_string()))?;
                let Message::Text(text) = frame else { continue };
                match ServerMessage::decode(&text) {
                    Ok(ServerMessage::JoinSuccess { session_id }) => return Ok(session_id),
                    Ok(ServerMessage::JoinError { reason }) => {
                        return Err(ClientError::JoinRejected(reason))
                    }
                    Ok(other) => debug!(?other, "unexpected message before join ack"),
                    Err(err) => debug!(error = %err, "undecodable frame before join ack"),
                }
            }
            Err(ClientError::Transport("relay closed during join".to_string()))
        })
        .await
        .map_err(|_| ClientError::Transport("join timed out".to_string()))??;

        *connectivity.write() = Connectivity::Connected;

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events, _) = broadcast::channel(256);

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let Ok(json) = serde_json::to_string(&message) else {
                    continue;
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        let reader_events = events.clone();
        let reader_connectivity = connectivity.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(error = %err, "relay stream error");
                        break;
                    }
                };
                let text = match frame {
                    Message::Text(text) => text.to_string(),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Message::Close(_) => break,
                    _ => continue,
                };
                match ServerMessage::decode(&text) {
                    Ok(message) => {
                        let _ = reader_events.send(RelayEvent::Message(message));
                    }
                    // Malformed inbound messages are dropped, never fatal.
                    Err(err) => warn!(error = %err, "dropping malformed relay message"),
                }
            }
            *reader_connectivity.write() = Connectivity::NotConnected;
            let _ = reader_events.send(RelayEvent::Disconnected);
        });

        Ok(Self {
            session_id,
            outbound,
            events,
            connectivity,
            tasks: vec![writer, reader],
        })
    }

    /// The relay-assigned session id for this connection.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.read()
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            outbound: self.outbound.clone(),
        }
    }

    /// Publish one field update. Enqueue-only; never waits on delivery.
    pub fn publish(&self, value: FieldValue) -> ClientResult<()> {
        self.handle().publish(value)
    }

    /// Ask for a point-in-time group snapshot; the response arrives on the
    /// event stream as a `status` message.
    pub fn request_status(&self) -> ClientResult<()> {
        self.handle().request_status()
    }

    /// Forward an opaque negotiation payload to another session.
    pub fn signal(&self, to_session: &str, payload: serde_json::Value) -> ClientResult<()> {
        self.handle().signal(to_session, payload)
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        *self.connectivity.write() = Connectivity::NotConnected;
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
