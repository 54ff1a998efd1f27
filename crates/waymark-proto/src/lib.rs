//! Shared protocol definitions for the waymark relay and its clients.
//! Keeping this in a dedicated crate allows the relay server, the overlay
//! sender, and any future viewer bindings to agree on wire shapes without
//! pulling in heavier runtime code.

pub mod field;
pub mod messages;
pub mod peer_id;
pub mod player;

pub use field::{FieldMessage, FieldValue, Position};
pub use messages::{
    ClientMessage, ProtocolError, ServerMessage, SessionIdentity, SnapshotEntry,
};
pub use peer_id::sanitize_peer_id;
pub use player::PlayerState;

use uuid::Uuid;

/// Generate a unique session ID for a newly accepted connection.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}
