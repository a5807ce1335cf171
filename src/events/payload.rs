//! Wire payload shapes published by the capture-side producer (out of
//! scope; only its contract is modeled here) on the four per-game topics.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// `events:lobby` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LobbyEvent {
    #[serde(rename = "LobbyCode")]
    pub lobby_code: String,
    #[serde(rename = "Region")]
    pub region: Region,
}

/// Region codes carried on `events:lobby`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Region {
    Na = 0,
    Eu = 1,
    As = 2,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Na => "NA",
            Region::Eu => "EU",
            Region::As => "AS",
        }
    }
}

/// `events:player` action kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum PlayerAction {
    Joined = 0,
    Left = 1,
    Died = 2,
    Exiled = 3,
    Disconnected = 4,
    ChangedColor = 5,
}

/// `events:player` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerEvent {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Color")]
    pub color: u8,
    #[serde(rename = "IsAlive")]
    pub is_alive: bool,
    #[serde(rename = "Action")]
    pub action: PlayerAction,
    #[serde(rename = "Role")]
    pub role: u8,
    #[serde(rename = "Disconnected")]
    pub disconnected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lobby_event() {
        let raw = r#"{"LobbyCode":"ABCDEF","Region":1}"#;
        let ev: LobbyEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.lobby_code, "ABCDEF");
        assert_eq!(ev.region, Region::Eu);
        assert_eq!(ev.region.as_str(), "EU");
    }

    #[test]
    fn parses_player_event() {
        let raw = r#"{"Name":"Red","Color":0,"IsAlive":false,"Action":2,"Role":0,"Disconnected":false}"#;
        let ev: PlayerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.name, "Red");
        assert!(!ev.is_alive);
        assert_eq!(ev.action, PlayerAction::Died);
    }

    #[test]
    fn rejects_malformed_player_event() {
        let raw = r#"{"Name":"Red"}"#;
        let result: Result<PlayerEvent, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }
}
