use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::direct::{DirectConnector, PeerLink};
use crate::error::{ClientError, ClientResult};
use waymark_proto::{sanitize_peer_id, SnapshotEntry};

enum LinkEntry {
    Connecting,
    Open(Arc<dyn PeerLink>),
}

/// Drives the opportunistic direct-link upgrade on the receiver side.
/// Candidates come from status snapshots; each attempt has a bounded
/// window, failures are non-fatal, and a candidate is retried no earlier
/// than the next snapshot cycle.
pub struct Negotiator {
    connector: Arc<dyn DirectConnector>,
    attempt_window: Duration,
    links: Mutex<HashMap<String, LinkEntry>>,
}

impl Negotiator {
    pub fn new(connector: Arc<dyn DirectConnector>, attempt_window: Duration) -> Self {
        Self {
            connector,
            attempt_window,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Pick the sender sessions worth upgrading to: candidates with no
    /// live or in-flight link. Each returned id is marked in-flight, so
    /// concurrent snapshot cycles never double-attempt the same peer.
    pub fn candidates(
        &self,
        sessions: &HashMap<String, SnapshotEntry>,
        peer_candidates: &[String],
    ) -> Vec<String> {
        let mut links = self.links.lock();
        links.retain(|_, entry| match entry {
            LinkEntry::Connecting => true,
            LinkEntry::Open(link) => link.is_open(),
        });

        let mut due = Vec::new();
        for session_id in peer_candidates {
            let is_sender = sessions
                .get(session_id)
                .map(|entry| entry.is_sender_role)
                .unwrap_or(false);
            if is_sender && !links.contains_key(session_id) {
                links.insert(session_id.clone(), LinkEntry::Connecting);
                due.push(session_id.clone());
            }
        }
        due
    }

    /// Attempt the upgrade for one candidate previously returned by
    /// `candidates`. The relay path stays authoritative either way.
    pub async fn attempt_upgrade(&self, session_id: &str) -> ClientResult<Arc<dyn PeerLink>> {
        let peer_id = sanitize_peer_id(session_id);
        let attempt = timeout(self.attempt_window, self.connector.connect(&peer_id)).await;

        let result = match attempt {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ClientError::Upgrade(format!(
                "no channel to {peer_id} within {:?}",
                self.attempt_window
            ))),
        };

        let mut links = self.links.lock();
        match result {
            Ok(link) => {
                debug!(session_id, peer_id, "peer link open");
                links.insert(session_id.to_string(), LinkEntry::Open(link.clone()));
                Ok(link)
            }
            Err(err) => {
                // Clearing the entry lets the next snapshot cycle retry.
                links.remove(session_id);
                warn!(session_id, error = %err, "peer upgrade failed");
                Err(err)
            }
        }
    }

    pub fn link(&self, session_id: &str) -> Option<Arc<dyn PeerLink>> {
        match self.links.lock().get(session_id) {
            Some(LinkEntry::Open(link)) if link.is_open() => Some(link.clone()),
            _ => None,
        }
    }

    /// Tear a link down on session disconnect or transport error.
    pub fn drop_link(&self, session_id: &str) {
        if let Some(LinkEntry::Open(link)) = self.links.lock().remove(session_id) {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direct::{LocalDirectHub, NoDirectChannel};
    use async_trait::async_trait;
    use chrono::Utc;
    use waymark_proto::PlayerState;

    fn snapshot(entries: &[(&str, &str, bool)]) -> HashMap<String, SnapshotEntry> {
        entries
            .iter()
            .map(|(session_id, steam_id, sender)| {
                (
                    session_id.to_string(),
                    SnapshotEntry {
                        is_sender_role: *sender,
                        connected_at: Utc::now(),
                        state: PlayerState::new(*steam_id, format!("name-{steam_id}")),
                    },
                )
            })
            .collect()
    }

    /// Connector whose attempts never resolve.
    struct StallingConnector {
        incoming: tokio::sync::broadcast::Sender<Arc<dyn PeerLink>>,
    }

    impl StallingConnector {
        fn new() -> Self {
            Self {
                incoming: tokio::sync::broadcast::channel(1).0,
            }
        }
    }

    #[async_trait]
    impl DirectConnector for StallingConnector {
        fn register(&self, _peer_id: &str) {}

        async fn connect(&self, _peer_id: &str) -> ClientResult<Arc<dyn PeerLink>> {
            std::future::pending().await
        }

        fn incoming(&self) -> tokio::sync::broadcast::Receiver<Arc<dyn PeerLink>> {
            self.incoming.subscribe()
        }
    }

    #[test]
    fn only_sender_sessions_are_candidates() {
        let negotiator = Negotiator::new(Arc::new(NoDirectChannel::new()), Duration::from_secs(1));
        let sessions = snapshot(&[("sess-1", "S1", true), ("sess-2", "R1", false)]);
        let due = negotiator.candidates(
            &sessions,
            &["sess-1".to_string(), "sess-2".to_string()],
        );
        assert_eq!(due, vec!["sess-1".to_string()]);
    }

    #[test]
    fn in_flight_candidates_are_not_reattempted() {
        let negotiator = Negotiator::new(Arc::new(NoDirectChannel::new()), Duration::from_secs(1));
        let sessions = snapshot(&[("sess-1", "S1", true)]);
        let first = negotiator.candidates(&sessions, &["sess-1".to_string()]);
        assert_eq!(first.len(), 1);
        let second = negotiator.candidates(&sessions, &["sess-1".to_string()]);
        assert!(second.is_empty(), "no duplicate attempts while connecting");
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_abandoned_after_the_window() {
        let negotiator =
            Negotiator::new(Arc::new(StallingConnector::new()), Duration::from_millis(200));
        let sessions = snapshot(&[("sess-1", "S1", true)]);
        let due = negotiator.candidates(&sessions, &["sess-1".to_string()]);
        assert_eq!(due.len(), 1);

        let err = negotiator.attempt_upgrade("sess-1").await.err().expect("timeout");
        assert!(matches!(err, ClientError::Upgrade(_)));

        // The failure cleared the entry, so the next cycle may retry.
        let retry = negotiator.candidates(&sessions, &["sess-1".to_string()]);
        assert_eq!(retry.len(), 1);
    }

    #[tokio::test]
    async fn successful_upgrade_is_remembered_until_dropped() {
        let hub = LocalDirectHub::new();
        // The remote endpoint registers under the sanitized session id and
        // must be listening for incoming links.
        let remote = hub.connector();
        remote.register(&sanitize_peer_id("sess-1"));
        let _incoming = remote.incoming();
        let local = hub.connector();

        let negotiator = Negotiator::new(Arc::new(local), Duration::from_secs(1));
        let sessions = snapshot(&[("sess-1", "S1", true)]);
        let due = negotiator.candidates(&sessions, &["sess-1".to_string()]);
        assert_eq!(due.len(), 1);

        let link = negotiator.attempt_upgrade("sess-1").await.expect("upgrade");
        assert!(link.is_open());
        assert!(negotiator.link("sess-1").is_some());
        assert!(negotiator
            .candidates(&sessions, &["sess-1".to_string()])
            .is_empty());

        negotiator.drop_link("sess-1");
        assert!(negotiator.link("sess-1").is_none());
        assert_eq!(
            negotiator.candidates(&sessions, &["sess-1".to_string()]).len(),
            1
        );
    }
}
