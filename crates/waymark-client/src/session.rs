use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::direct::{DirectConnector, PeerLink};
use crate::error::{ClientResult, Connectivity};
use crate::negotiator::Negotiator;
use crate::reconciler::{PlayerEvent, Reconciler};
use crate::relay::{RelayClient, RelayEvent};
use waymark_proto::{
    sanitize_peer_id, FieldMessage, FieldValue, PlayerState, ServerMessage, SessionIdentity,
};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub relay_url: String,
    pub identity: SessionIdentity,
    /// Periodic status cycle; each snapshot also re-evaluates PeerLink
    /// candidates. `None` leaves snapshots to explicit requests.
    pub snapshot_interval: Option<Duration>,
    /// Bound on a single PeerLink attempt before it is abandoned.
    pub upgrade_window: Duration,
}

impl SyncConfig {
    pub fn new(relay_url: impl Into<String>, identity: SessionIdentity) -> Self {
        Self {
            relay_url: relay_url.into(),
            identity,
            snapshot_interval: Some(Duration::from_secs(5)),
            upgrade_window: Duration::from_secs(10),
        }
    }
}

/// One syncing lifecycle: the relay connection, the reconciler, the
/// peer-upgrade negotiator, and (for senders) the latest-own-state cache
/// replayed to newly opened direct links. All state is owned here and
/// torn down with the session.
pub struct SyncSession {
    relay: RelayClient,
    identity: SessionIdentity,
    reconciler: Arc<Mutex<Reconciler>>,
    negotiator: Arc<Negotiator>,
    own: Arc<Mutex<PlayerState>>,
    inbound_links: Arc<Mutex<Vec<Arc<dyn PeerLink>>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    pub async fn start(
        config: SyncConfig,
        connector: Arc<dyn DirectConnector>,
    ) -> ClientResult<Self> {
        let identity = config.identity.clone();
        let relay = RelayClient::connect(&config.relay_url, identity.clone()).await?;
        info!(
            session_id = relay.session_id(),
            is_sender_role = identity.is_sender_role,
            "joined group"
        );

        // The direct-channel endpoint is addressable under the sanitized
        // session id, which receivers derive from snapshots.
        connector.register(&sanitize_peer_id(relay.session_id()));

        let reconciler = Arc::new(Mutex::new(Reconciler::new(identity.steam_id.clone())));
        let negotiator = Arc::new(Negotiator::new(connector.clone(), config.upgrade_window));
        let own = Arc::new(Mutex::new(PlayerState::new(
            identity.steam_id.clone(),
            identity.steam_name.clone(),
        )));
        let inbound_links: Arc<Mutex<Vec<Arc<dyn PeerLink>>>> = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        tasks.push(spawn_accept_loop(
            connector,
            identity.clone(),
            own.clone(),
            inbound_links.clone(),
            reconciler.clone(),
        ));
        tasks.push(spawn_relay_pump(
            &relay,
            reconciler.clone(),
            negotiator.clone(),
        ));
        if let Some(interval) = config.snapshot_interval {
            let handle = relay.handle();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if handle.request_status().is_err() {
                        break;
                    }
                }
            }));
        }

        // Kick off the first snapshot so membership and upgrades do not
        // wait for the interval.
        relay.request_status()?;

        Ok(Self {
            relay,
            identity,
            reconciler,
            negotiator,
            own,
            inbound_links,
            tasks,
        })
    }

    /// Publish one field update: to the relay always, and over every open
    /// inbound PeerLink additionally. Either transport alone suffices;
    /// both together are harmless.
    pub fn publish(&self, value: FieldValue) -> ClientResult<()> {
        self.own.lock().apply(&value);
        self.relay.publish(value.clone())?;

        let message = FieldMessage {
            steam_id: self.identity.steam_id.clone(),
            value,
        };
        let mut links = self.inbound_links.lock();
        links.retain(|link| link.is_open());
        for link in links.iter() {
            if let Err(err) = link.send(&message) {
                debug!(peer = link.peer_id(), error = %err, "direct send skipped");
            }
        }
        Ok(())
    }

    pub fn request_snapshot(&self) -> ClientResult<()> {
        self.relay.request_status()
    }

    pub fn session_id(&self) -> &str {
        self.relay.session_id()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.relay.connectivity()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.reconciler.lock().subscribe()
    }

    pub fn player(&self, steam_id: &str) -> Option<PlayerState> {
        self.reconciler.lock().player(steam_id).cloned()
    }

    pub fn players(&self) -> Vec<PlayerState> {
        self.reconciler.lock().players().cloned().collect()
    }

    /// Whether an upgraded link to the given remote session is open.
    pub fn direct_link_open(&self, session_id: &str) -> bool {
        self.negotiator.link(session_id).is_some()
    }

    /// Number of inbound direct links currently open (sender side).
    pub fn inbound_link_count(&self) -> usize {
        let mut links = self.inbound_links.lock();
        links.retain(|link| link.is_open());
        links.len()
    }

    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for link in self.inbound_links.lock().drain(..) {
            link.close();
        }
        self.relay.shutdown();
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Accept inbound direct links. On the sender side each newly opened link
/// gets a one-shot replay of the latest known field values so the new
/// receiver is populated without waiting for the next natural change.
fn spawn_accept_loop(
    connector: Arc<dyn DirectConnector>,
    identity: SessionIdentity,
    own: Arc<Mutex<PlayerState>>,
    inbound_links: Arc<Mutex<Vec<Arc<dyn PeerLink>>>>,
    reconciler: Arc<Mutex<Reconciler>>,
) -> JoinHandle<()> {
    let mut incoming = connector.incoming();
    tokio::spawn(async move {
        loop {
            let link = match incoming.recv().await {
                Ok(link) => link,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            debug!(peer = link.peer_id(), "accepted direct link");

            if identity.is_sender_role {
                let replay = {
                    let own = own.lock();
                    replay_messages(&identity.steam_id, &own)
                };
                for message in replay {
                    if let Err(err) = link.send(&message) {
                        debug!(peer = link.peer_id(), error = %err, "replay send skipped");
                    }
                }
            }

            spawn_link_pump(link.clone(), reconciler.clone());
            let mut links = inbound_links.lock();
            links.retain(|l| l.is_open());
            links.push(link);
        }
    })
}

/// Feed relay events into the reconciler and drive the upgrade cycle on
/// every snapshot.
fn spawn_relay_pump(
    relay: &RelayClient,
    reconciler: Arc<Mutex<Reconciler>>,
    negotiator: Arc<Negotiator>,
) -> JoinHandle<()> {
    let mut events = relay.subscribe();
    let handle = relay.handle();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let message = match event {
                RelayEvent::Message(message) => message,
                RelayEvent::Disconnected => break,
            };
            match message {
                ServerMessage::Field { message } => {
                    reconciler.lock().on_field_message(&message);
                }
                ServerMessage::Status {
                    sessions,
                    peer_candidates,
                } => {
                    reconciler.lock().on_snapshot(&sessions);
                    for candidate in negotiator.candidates(&sessions, &peer_candidates) {
                        let negotiator = negotiator.clone();
                        let reconciler = reconciler.clone();
                        tokio::spawn(async move {
                            match negotiator.attempt_upgrade(&candidate).await {
                                Ok(link) => {
                                    spawn_link_pump(link, reconciler);
                                }
                                Err(err) => {
                                    debug!(candidate, error = %err, "upgrade attempt failed");
                                }
                            }
                        });
                    }
                }
                ServerMessage::PeerConnected { steam_id, .. } => {
                    debug!(steam_id, "peer connected, refreshing snapshot");
                    let _ = handle.request_status();
                }
                ServerMessage::PeerDisconnected {
                    session_id,
                    steam_id,
                    ..
                } => {
                    negotiator.drop_link(&session_id);
                    reconciler.lock().on_peer_disconnected(&steam_id);
                }
                ServerMessage::Signal { from_session, .. } => {
                    // Connector implementations negotiate out of band.
                    debug!(from_session, "ignoring relay signal");
                }
                ServerMessage::Error { message } => warn!(message, "relay reported an error"),
                ServerMessage::JoinSuccess { .. } | ServerMessage::JoinError { .. } => {}
            }
        }
    })
}

/// Pump one direct link's inbound messages into the reconciler. Same path
/// as relay delivery, so duplicates collapse idempotently.
fn spawn_link_pump(link: Arc<dyn PeerLink>, reconciler: Arc<Mutex<Reconciler>>) -> JoinHandle<()> {
    let mut inbound = link.subscribe();
    tokio::spawn(async move {
        loop {
            match inbound.recv().await {
                Ok(message) => reconciler.lock().on_field_message(&message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// The one-shot replay set: latest position, world, map, region, and
/// username. Place is deliberately absent; it follows on the next natural
/// update.
fn replay_messages(steam_id: &str, own: &PlayerState) -> Vec<FieldMessage> {
    let mut out = Vec::new();
    let mut push = |value: FieldValue| {
        out.push(FieldMessage {
            steam_id: steam_id.to_string(),
            value,
        });
    };
    if let Some(position) = &own.position {
        push(FieldValue::Position(position.clone()));
    }
    if let Some(world) = &own.world_name {
        push(FieldValue::WorldName(world.clone()));
    }
    if let Some(map) = &own.map {
        push(FieldValue::Map(map.clone()));
    }
    if let Some(region) = &own.region {
        push(FieldValue::Region(region.clone()));
    }
    if let Some(username) = &own.username {
        push(FieldValue::Username(username.clone()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_proto::Position;

    #[test]
    fn replay_covers_only_known_fields() {
        let mut own = PlayerState::new("S1", "alice");
        own.apply(&FieldValue::Position(Position {
            location: [3.0, 4.0],
            rotation: 180.0,
        }));
        own.apply(&FieldValue::Map("caves".to_string()));
        own.apply(&FieldValue::Place("old mill".to_string()));

        let replay = replay_messages("S1", &own);
        let fields: Vec<_> = replay.iter().map(|m| m.value.name()).collect();
        assert_eq!(fields, vec!["position", "map"]);
        assert!(replay.iter().all(|m| m.steam_id == "S1"));
    }

    #[test]
    fn replay_of_an_empty_state_is_empty() {
        let own = PlayerState::new("S1", "alice");
        assert!(replay_messages("S1", &own).is_empty());
    }
}
