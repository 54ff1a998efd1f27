use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

use waymark_proto::{FieldMessage, FieldValue, PlayerState, SnapshotEntry};

/// Change notifications for consumers: enough for the map layer to redraw
/// a marker, direction indicator, or place/region label, and for the
/// hotkey layer to act with correct identity attribution.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    PlayerAdded {
        steam_id: String,
    },
    PlayerRemoved {
        steam_id: String,
    },
    FieldChanged {
        steam_id: String,
        field: &'static str,
    },
    /// A hotkey raised by any group member, attributed to its account.
    Hotkey {
        steam_id: String,
        hotkey: String,
    },
    /// A hotkey raised under the local account. Only these may trigger
    /// local actions; peer hotkeys never do. Emitted once per delivery:
    /// hotkey messages carry no dedupe id, so one that arrives over both
    /// the relay and an open direct link shows up here twice.
    LocalHotkey {
        hotkey: String,
    },
}

/// Merges field messages from both transports into one `PlayerState` per
/// remote identity. Keyed by steamId, not session id, so a player who
/// reconnects with a fresh session keeps their logical identity. Owned by
/// the sync session; constructed and torn down with it.
pub struct Reconciler {
    local_steam_id: String,
    players: HashMap<String, PlayerState>,
    events: broadcast::Sender<PlayerEvent>,
}

impl Reconciler {
    pub fn new(local_steam_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            local_steam_id: local_steam_id.into(),
            players: HashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn player(&self, steam_id: &str) -> Option<&PlayerState> {
        self.players.get(steam_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn is_self(&self, steam_id: &str) -> bool {
        steam_id == self.local_steam_id
    }

    /// Apply a point-in-time snapshot. Unknown players are created (a full
    /// replace is allowed only here and at creation); players absent from
    /// the snapshot are *not* removed — a snapshot is not authoritative
    /// for removal, to tolerate races with leave notices.
    pub fn on_snapshot(&mut self, sessions: &HashMap<String, SnapshotEntry>) {
        for entry in sessions.values() {
            let steam_id = entry.state.steam_id.clone();
            if !self.players.contains_key(&steam_id) {
                self.players.insert(steam_id.clone(), entry.state.clone());
                self.emit(PlayerEvent::PlayerAdded { steam_id });
            }
        }
    }

    /// Merge one field message, from either transport. Duplicate delivery
    /// is idempotent: the merge is a redundant per-field assignment with
    /// no counters or message-count side effects.
    pub fn on_field_message(&mut self, message: &FieldMessage) {
        if let FieldValue::Hotkey(hotkey) = &message.value {
            self.emit(PlayerEvent::Hotkey {
                steam_id: message.steam_id.clone(),
                hotkey: hotkey.clone(),
            });
            if self.is_self(&message.steam_id) {
                self.emit(PlayerEvent::LocalHotkey {
                    hotkey: hotkey.clone(),
                });
            }
            return;
        }

        let known = self.players.contains_key(&message.steam_id);
        let state = self
            .players
            .entry(message.steam_id.clone())
            .or_insert_with(|| PlayerState::new(message.steam_id.clone(), String::new()));
        state.apply(&message.value);

        if !known {
            self.emit(PlayerEvent::PlayerAdded {
                steam_id: message.steam_id.clone(),
            });
        }
        self.emit(PlayerEvent::FieldChanged {
            steam_id: message.steam_id.clone(),
            field: message.value.name(),
        });
    }

    /// Remove a player on an explicit disconnect notice. This is the only
    /// removal path.
    pub fn on_peer_disconnected(&mut self, steam_id: &str) {
        if self.players.remove(steam_id).is_some() {
            self.emit(PlayerEvent::PlayerRemoved {
                steam_id: steam_id.to_string(),
            });
        } else {
            debug!(steam_id, "disconnect notice for unknown player");
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No receivers is fine; consumers subscribe lazily.
        let _ = self.events.send(event);
    }
}
