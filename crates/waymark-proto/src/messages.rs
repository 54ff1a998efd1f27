use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::field::{FieldMessage, FieldValue};
use crate::player::PlayerState;

/// The identity tuple supplied by the auth collaborator at connect time.
/// The relay trusts it as-is and performs no further verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub group_token: String,
    pub steam_id: String,
    pub steam_name: String,
    /// True for the game-overlay client publishing live state; false for
    /// browser map viewers.
    pub is_sender_role: bool,
}

/// One entry in a status snapshot: the session's merged last-known state
/// plus the role label receivers use to decide which PeerLinks to attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub is_sender_role: bool,
    pub connected_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: PlayerState,
}

/// Messages sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame on every connection: join the group named by the token.
    Join {
        #[serde(flatten)]
        identity: SessionIdentity,
    },
    /// Publish one field update to the rest of the group.
    Publish {
        #[serde(flatten)]
        value: FieldValue,
    },
    /// Request a point-in-time snapshot of the group.
    Status,
    /// Forward an opaque direct-channel negotiation payload to one session.
    #[serde(rename_all = "camelCase")]
    Signal {
        to_session: String,
        payload: serde_json::Value,
    },
}

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledge a successful join with the assigned session id.
    #[serde(rename_all = "camelCase")]
    JoinSuccess { session_id: String },
    /// Join rejected; the connection will be closed.
    JoinError { reason: String },
    /// Another session joined the group.
    #[serde(rename_all = "camelCase")]
    PeerConnected {
        session_id: String,
        steam_id: String,
        steam_name: String,
        is_sender_role: bool,
    },
    /// A session left the group, naming the departing identity.
    #[serde(rename_all = "camelCase")]
    PeerDisconnected {
        session_id: String,
        steam_id: String,
        steam_name: String,
        is_sender_role: bool,
    },
    /// A field update fanned out from another session, tagged with the
    /// publisher's steamId.
    Field {
        #[serde(flatten)]
        message: FieldMessage,
    },
    /// Snapshot response: merged state of every *other* session in the
    /// group, keyed by session id, plus the session ids currently able to
    /// receive.
    #[serde(rename_all = "camelCase")]
    Status {
        sessions: HashMap<String, SnapshotEntry>,
        peer_candidates: Vec<String>,
    },
    /// An opaque negotiation payload relayed from another session.
    #[serde(rename_all = "camelCase")]
    Signal {
        from_session: String,
        payload: serde_json::Value,
    },
    /// Protocol-level error. Never fatal to the connection by itself.
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ClientMessage {
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl ServerMessage {
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}
