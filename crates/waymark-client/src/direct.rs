use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::error::{ClientError, ClientResult};
use waymark_proto::FieldMessage;

/// Lifecycle of a direct channel: `Connecting -> Open -> Closed`. No
/// automatic reconnection; the next snapshot cycle re-evaluates candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// An opportunistic direct channel to one peer, additive to the relay
/// path and never required for correctness.
pub trait PeerLink: Send + Sync {
    /// Sanitized id of the remote peer.
    fn peer_id(&self) -> &str;
    fn is_open(&self) -> bool;
    /// Enqueue a field message. Must never block the caller; a closed
    /// link is an error the caller logs and ignores.
    fn send(&self, message: &FieldMessage) -> ClientResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<FieldMessage>;
    fn close(&self);
}

/// The external peer-connection primitive, behind a trait so the protocol
/// core stays independent of any particular NAT-traversal stack. Peer ids
/// passed here are already sanitized to the safe character subset.
#[async_trait]
pub trait DirectConnector: Send + Sync {
    /// Claim this endpoint's own peer id, once known. A session learns its
    /// id only from the join ack, so registration happens after connect.
    fn register(&self, peer_id: &str);
    /// Open a channel to the named remote peer.
    async fn connect(&self, peer_id: &str) -> ClientResult<Arc<dyn PeerLink>>;
    /// Channels opened *to* this endpoint by remote peers.
    fn incoming(&self) -> broadcast::Receiver<Arc<dyn PeerLink>>;
}

type IncomingTx = broadcast::Sender<Arc<dyn PeerLink>>;

#[derive(Default)]
struct HubInner {
    endpoints: RwLock<HashMap<String, IncomingTx>>,
}

/// In-memory direct-channel fabric for tests and same-process loopback.
/// Endpoints register under their sanitized peer id; `connect` wires a
/// pair of link halves together.
#[derive(Clone, Default)]
pub struct LocalDirectHub {
    inner: Arc<HubInner>,
}

impl LocalDirectHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> LocalDirectConnector {
        LocalDirectConnector {
            hub: self.clone(),
            peer_id: Mutex::new(None),
            incoming: broadcast::channel(16).0,
        }
    }
}

pub struct LocalDirectConnector {
    hub: LocalDirectHub,
    peer_id: Mutex<Option<String>>,
    incoming: IncomingTx,
}

#[async_trait]
impl DirectConnector for LocalDirectConnector {
    fn register(&self, peer_id: &str) {
        *self.peer_id.lock() = Some(peer_id.to_string());
        self.hub
            .inner
            .endpoints
            .write()
            .insert(peer_id.to_string(), self.incoming.clone());
    }

    async fn connect(&self, peer_id: &str) -> ClientResult<Arc<dyn PeerLink>> {
        let remote = self
            .hub
            .inner
            .endpoints
            .read()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| ClientError::Upgrade(format!("unknown peer {peer_id}")))?;

        // One shared state cell per link: closing either half closes both.
        let state = Arc::new(RwLock::new(LinkState::Open));
        let (here_to_there, _) = broadcast::channel(256);
        let (there_to_here, _) = broadcast::channel(256);

        let local: Arc<dyn PeerLink> = Arc::new(LocalPeerLink::new(
            peer_id.to_string(),
            state.clone(),
            here_to_there.clone(),
            there_to_here.clone(),
        ));
        let remote_half: Arc<dyn PeerLink> = Arc::new(LocalPeerLink::new(
            self.peer_id.lock().clone().unwrap_or_default(),
            state,
            there_to_here,
            here_to_there,
        ));

        remote
            .send(remote_half)
            .map_err(|_| ClientError::Upgrade(format!("peer {peer_id} not accepting links")))?;
        Ok(local)
    }

    fn incoming(&self) -> broadcast::Receiver<Arc<dyn PeerLink>> {
        self.incoming.subscribe()
    }
}

struct LocalPeerLink {
    peer_id: String,
    state: Arc<RwLock<LinkState>>,
    outbound: broadcast::Sender<FieldMessage>,
    inbound: broadcast::Sender<FieldMessage>,
    // Receiver taken by the first subscriber. Created at link birth so the
    // sender's replay burst is not lost to the attach race.
    buffered: Mutex<Option<broadcast::Receiver<FieldMessage>>>,
}

impl LocalPeerLink {
    fn new(
        peer_id: String,
        state: Arc<RwLock<LinkState>>,
        outbound: broadcast::Sender<FieldMessage>,
        inbound: broadcast::Sender<FieldMessage>,
    ) -> Self {
        let buffered = Mutex::new(Some(inbound.subscribe()));
        Self {
            peer_id,
            state,
            outbound,
            inbound,
            buffered,
        }
    }
}

impl PeerLink for LocalPeerLink {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_open(&self) -> bool {
        *self.state.read() == LinkState::Open
    }

    fn send(&self, message: &FieldMessage) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ClientError::Transport("peer link closed".to_string()));
        }
        // A receiver that is not currently listening just misses the
        // message; the relay path still carries it.
        let _ = self.outbound.send(message.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FieldMessage> {
        self.buffered
            .lock()
            .take()
            .unwrap_or_else(|| self.inbound.subscribe())
    }

    fn close(&self) {
        *self.state.write() = LinkState::Closed;
    }
}

/// Connector for endpoints that opt out of direct channels entirely. Every
/// attempt fails; convergence still happens through the relay alone.
pub struct NoDirectChannel {
    incoming: IncomingTx,
}

impl Default for NoDirectChannel {
    fn default() -> Self {
        Self {
            incoming: broadcast::channel(1).0,
        }
    }
}

impl NoDirectChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectConnector for NoDirectChannel {
    fn register(&self, _peer_id: &str) {}

    async fn connect(&self, peer_id: &str) -> ClientResult<Arc<dyn PeerLink>> {
        Err(ClientError::Upgrade(format!(
            "direct channels disabled, cannot reach {peer_id}"
        )))
    }

    fn incoming(&self) -> broadcast::Receiver<Arc<dyn PeerLink>> {
        self.incoming.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_proto::FieldValue;

    fn msg(steam_id: &str, map: &str) -> FieldMessage {
        FieldMessage {
            steam_id: steam_id.to_string(),
            value: FieldValue::Map(map.to_string()),
        }
    }

    #[tokio::test]
    async fn local_link_round_trip() {
        let hub = LocalDirectHub::new();
        let sender = hub.connector();
        sender.register("sender-peer");
        let receiver = hub.connector();
        receiver.register("receiver-peer");
        let mut incoming = sender.incoming();

        let link = receiver.connect("sender-peer").await.expect("connect");
        let accepted = incoming.recv().await.expect("incoming link");
        assert_eq!(accepted.peer_id(), "receiver-peer");
        assert!(link.is_open());

        let mut inbound = link.subscribe();
        accepted.send(&msg("S1", "overworld")).expect("send");
        let got = inbound.recv().await.expect("recv");
        assert_eq!(got, msg("S1", "overworld"));
    }

    #[tokio::test]
    async fn closing_either_half_closes_both() {
        let hub = LocalDirectHub::new();
        let sender = hub.connector();
        sender.register("a");
        let receiver = hub.connector();
        let mut incoming = sender.incoming();

        let link = receiver.connect("a").await.expect("connect");
        let accepted = incoming.recv().await.expect("incoming link");

        accepted.close();
        assert!(!link.is_open());
        assert!(matches!(
            link.send(&msg("S1", "caves")),
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn first_subscriber_sees_messages_sent_before_attaching() {
        let hub = LocalDirectHub::new();
        let sender = hub.connector();
        sender.register("sender-peer");
        let receiver = hub.connector();
        let mut incoming = sender.incoming();

        let link = receiver.connect("sender-peer").await.expect("connect");
        let accepted = incoming.recv().await.expect("incoming link");

        // Replay-style burst before the receiver pump attaches.
        accepted.send(&msg("S1", "overworld")).expect("send");
        let mut inbound = link.subscribe();
        let got = inbound.recv().await.expect("recv");
        assert_eq!(got, msg("S1", "overworld"));
    }

    #[tokio::test]
    async fn connecting_to_an_unknown_peer_fails() {
        let hub = LocalDirectHub::new();
        let receiver = hub.connector();
        let err = receiver.connect("nobody").await.err().expect("failure");
        assert!(matches!(err, ClientError::Upgrade(_)));
    }

    #[tokio::test]
    async fn disabled_connector_always_fails() {
        let disabled = NoDirectChannel::new();
        assert!(disabled.connect("anyone").await.is_err());
    }
}
