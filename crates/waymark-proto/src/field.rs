use serde::{Deserialize, Serialize};

/// A player's in-game position: map coordinates plus a facing angle in
/// degrees. Replaced as a whole on every update, never assembled from
/// separate coordinate messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub location: [f64; 2],
    pub rotation: f64,
}

/// A single named field update. Each message carries exactly one field;
/// there is no batching. An unrecognized field name fails to deserialize,
/// so the malformed-message class is handled at decode time rather than
/// deep inside the merge path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    Position(Position),
    Place(String),
    Region(String),
    WorldName(String),
    Map(String),
    Username(String),
    Hotkey(String),
}

impl FieldValue {
    /// Wire name of the field, as it appears in the `field` tag.
    pub fn name(&self) -> &'static str {
        match self {
            FieldValue::Position(_) => "position",
            FieldValue::Place(_) => "place",
            FieldValue::Region(_) => "region",
            FieldValue::WorldName(_) => "worldName",
            FieldValue::Map(_) => "map",
            FieldValue::Username(_) => "username",
            FieldValue::Hotkey(_) => "hotkey",
        }
    }
}

/// A field update attributed to its publisher. Field messages are keyed by
/// `steamId` rather than session id so a player who reconnects with a new
/// session keeps the same logical identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMessage {
    pub steam_id: String,
    #[serde(flatten)]
    pub value: FieldValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_message_wire_shape() {
        let msg = FieldMessage {
            steam_id: "7656119".to_string(),
            value: FieldValue::Position(Position {
                location: [100.0, 200.0],
                rotation: 90.0,
            }),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["steamId"], "7656119");
        assert_eq!(json["field"], "position");
        assert_eq!(json["value"]["location"][0], 100.0);
        assert_eq!(json["value"]["rotation"], 90.0);
    }

    #[test]
    fn world_name_uses_camel_case_tag() {
        let msg = FieldMessage {
            steam_id: "1".to_string(),
            value: FieldValue::WorldName("highlands".to_string()),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["field"], "worldName");
        assert_eq!(json["value"], "highlands");
    }

    #[test]
    fn unknown_field_name_fails_to_decode() {
        let raw = r#"{"steamId":"1","field":"teleport","value":"nope"}"#;
        assert!(serde_json::from_str::<FieldMessage>(raw).is_err());
    }

    #[test]
    fn wrong_shaped_value_fails_to_decode() {
        let raw = r#"{"steamId":"1","field":"position","value":"not-a-position"}"#;
        assert!(serde_json::from_str::<FieldMessage>(raw).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let msg = FieldMessage {
            steam_id: "2".to_string(),
            value: FieldValue::Hotkey("ping-map".to_string()),
        };
        let raw = serde_json::to_string(&msg).expect("serialize");
        let back: FieldMessage = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, msg);
    }
}
