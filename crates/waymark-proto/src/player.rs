use serde::{Deserialize, Serialize};

use crate::field::{FieldValue, Position};

/// The reconciled view of one remote player. Every update field is
/// independently nullable and independently updatable; merging is always a
/// single per-field assignment (shallow merge), never a wholesale replace
/// except at creation and snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub steam_id: String,
    pub steam_name: String,
    pub username: Option<String>,
    pub position: Option<Position>,
    pub place: Option<String>,
    pub region: Option<String>,
    pub world_name: Option<String>,
    pub map: Option<String>,
}

impl PlayerState {
    pub fn new(steam_id: impl Into<String>, steam_name: impl Into<String>) -> Self {
        Self {
            steam_id: steam_id.into(),
            steam_name: steam_name.into(),
            username: None,
            position: None,
            place: None,
            region: None,
            world_name: None,
            map: None,
        }
    }

    /// Assign one field. Last-arrived-wins: there are no sequence numbers
    /// in the protocol, so a duplicate or out-of-order delivery simply
    /// re-assigns the field. `hotkey` is a pass-through event and is never
    /// stored here.
    pub fn apply(&mut self, value: &FieldValue) {
        match value {
            FieldValue::Position(position) => self.position = Some(position.clone()),
            FieldValue::Place(place) => self.place = Some(place.clone()),
            FieldValue::Region(region) => self.region = Some(region.clone()),
            FieldValue::WorldName(world) => self.world_name = Some(world.clone()),
            FieldValue::Map(map) => self.map = Some(map.clone()),
            FieldValue::Username(username) => self.username = Some(username.clone()),
            FieldValue::Hotkey(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_touches_only_the_named_field() {
        let mut state = PlayerState::new("S1", "alice");
        state.apply(&FieldValue::Position(Position {
            location: [1.0, 2.0],
            rotation: 0.0,
        }));
        state.apply(&FieldValue::Region("north".to_string()));

        assert_eq!(state.region.as_deref(), Some("north"));
        assert_eq!(
            state.position,
            Some(Position {
                location: [1.0, 2.0],
                rotation: 0.0
            })
        );
        assert_eq!(state.place, None);
        assert_eq!(state.map, None);
    }

    #[test]
    fn last_applied_value_wins_per_field() {
        let mut state = PlayerState::new("S1", "alice");
        state.apply(&FieldValue::Map("overworld".to_string()));
        state.apply(&FieldValue::Map("caves".to_string()));
        assert_eq!(state.map.as_deref(), Some("caves"));
    }

    #[test]
    fn duplicate_application_is_idempotent() {
        let mut state = PlayerState::new("S1", "alice");
        let update = FieldValue::Username("al".to_string());
        state.apply(&update);
        let once = state.clone();
        state.apply(&update);
        assert_eq!(state, once);
    }

    #[test]
    fn hotkey_is_never_stored() {
        let mut state = PlayerState::new("S1", "alice");
        let before = state.clone();
        state.apply(&FieldValue::Hotkey("ping-map".to_string()));
        assert_eq!(state, before);
    }
}
