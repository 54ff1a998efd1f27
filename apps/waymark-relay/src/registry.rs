use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use waymark_proto::{FieldValue, PlayerState, ServerMessage, SessionIdentity, SnapshotEntry};

/// One connected session: identity, outbound queue, and the merged
/// last-known state served from snapshots.
pub struct SessionHandle {
    pub session_id: String,
    pub identity: SessionIdentity,
    pub connected_at: DateTime<Utc>,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    pub state: PlayerState,
}

impl SessionHandle {
    pub fn new(
        session_id: String,
        identity: SessionIdentity,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let state = PlayerState::new(identity.steam_id.clone(), identity.steam_name.clone());
        Self {
            session_id,
            identity,
            connected_at: Utc::now(),
            tx,
            state,
        }
    }
}

/// In-memory session registry: group token -> (session id -> handle).
/// The only shared mutable state in the relay; nothing here is durable,
/// a process restart simply empties all groups.
#[derive(Clone, Default)]
pub struct Registry {
    groups: Arc<DashMap<String, DashMap<String, SessionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, handle: SessionHandle) {
        let group = self
            .groups
            .entry(handle.identity.group_token.clone())
            .or_default();
        group.insert(handle.session_id.clone(), handle);
    }

    /// Remove a session, dropping the group entry once it is empty.
    /// Returns the departing identity for the disconnect broadcast.
    pub fn remove_session(&self, group_token: &str, session_id: &str) -> Option<SessionIdentity> {
        let identity = self
            .groups
            .get(group_token)
            .and_then(|group| group.remove(session_id).map(|(_, handle)| handle.identity));
        // The emptiness check and the group removal must be atomic: a join
        // landing between them would be deleted along with the group.
        self.groups
            .remove_if(group_token, |_, group| group.is_empty());
        identity
    }

    /// Merge one published field into the publisher's last-known state so
    /// later snapshots reflect it.
    pub fn merge_field(&self, group_token: &str, session_id: &str, value: &FieldValue) {
        if let Some(group) = self.groups.get(group_token) {
            if let Some(mut handle) = group.get_mut(session_id) {
                handle.state.apply(value);
            }
        }
    }

    /// Build a snapshot for the requesting session: every *other* session's
    /// merged state plus the session ids currently able to receive.
    pub fn snapshot_for(&self, group_token: &str, session_id: &str) -> ServerMessage {
        let mut sessions = HashMap::new();
        let mut peer_candidates = Vec::new();

        if let Some(group) = self.groups.get(group_token) {
            for entry in group.iter() {
                if entry.session_id == session_id {
                    continue;
                }
                peer_candidates.push(entry.session_id.clone());
                sessions.insert(
                    entry.session_id.clone(),
                    SnapshotEntry {
                        is_sender_role: entry.identity.is_sender_role,
                        connected_at: entry.connected_at,
                        state: entry.state.clone(),
                    },
                );
            }
        }

        ServerMessage::Status {
            sessions,
            peer_candidates,
        }
    }

    /// Fan a message out to every session in the group except the sender.
    /// A group with zero other members is a silent no-op. A send to a
    /// session that is mid-disconnect is tolerated; the next snapshot
    /// self-heals.
    pub fn broadcast_except(&self, group_token: &str, sender_id: &str, message: ServerMessage) {
        if let Some(group) = self.groups.get(group_token) {
            for entry in group.iter() {
                if entry.session_id != sender_id {
                    let _ = entry.tx.send(message.clone());
                }
            }
        }
    }

    /// Deliver a message to one addressed session, if it is still present.
    pub fn send_to_session(&self, group_token: &str, session_id: &str, message: ServerMessage) {
        if let Some(group) = self.groups.get(group_token) {
            if let Some(handle) = group.get(session_id) {
                let _ = handle.tx.send(message);
                return;
            }
        }
        warn!(
            group = %token_digest(group_token),
            session_id,
            "dropping message addressed to unknown session"
        );
    }
}

/// Short digest of a group token for log lines. Tokens are shared secrets
/// and must never appear in cleartext in relay logs.
pub fn token_digest(group_token: &str) -> String {
    let digest = Sha256::digest(group_token.as_bytes());
    let mut out = String::with_capacity(8);
    for byte in &digest[..4] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
