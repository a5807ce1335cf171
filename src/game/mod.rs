//! Game State Machine (C4): the per-session [`GameState`] record and the
//! idempotent operations that mutate it in response to capture and chat
//! events.

pub mod phase;
pub mod repo;
pub mod settings;

use std::collections::HashMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::constants::{CONNECT_CODE_ALPHABET, CONNECT_CODE_LEN};
use crate::events::{PlayerAction, PlayerEvent};

pub use phase::{transition_action, Phase, Priority, TransitionAction};
pub use settings::{GameDelays, GuildSettings, VoiceRules, VoiceState};

/// Generates a random 6-character connect code from [`CONNECT_CODE_ALPHABET`].
pub fn generate_connect_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CONNECT_CODE_LEN)
        .map(|_| *CONNECT_CODE_ALPHABET.choose(&mut rng).expect("alphabet non-empty") as char)
        .collect()
}

/// The voice channel a game is scoped to; only its members are eligible for
/// automated mute.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tracking {
    pub voice_channel_id: Option<u64>,
    pub voice_channel_name: Option<String>,
}

impl Tracking {
    pub fn is_tracking(&self, channel_id: Option<u64>) -> bool {
        matches!((self.voice_channel_id, channel_id), (Some(a), Some(b)) if a == b)
    }

    pub fn reset(&mut self) {
        self.voice_channel_id = None;
        self.voice_channel_name = None;
    }
}

/// The control/status message the bot edits as the game progresses.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GameStateMsg {
    pub message_id: Option<u64>,
    pub channel_id: Option<u64>,
    pub leader_id: Option<u64>,
}

impl GameStateMsg {
    pub fn exists(&self) -> bool {
        self.message_id.is_some() && self.channel_id.is_some()
    }
}

/// One in-game player, keyed by `InGameName` in [`AmongUsData::players`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerData {
    pub name: String,
    pub color: u8,
    pub is_alive: bool,
    pub role: u8,
    pub disconnected: bool,
}

impl PlayerData {
    fn from_event(ev: &PlayerEvent) -> PlayerData {
        PlayerData {
            name: ev.name.clone(),
            color: ev.color,
            is_alive: ev.is_alive,
            role: ev.role,
            disconnected: ev.disconnected,
        }
    }
}

/// The capture's view of the current match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AmongUsData {
    pub phase: Phase,
    pub room: String,
    pub region: String,
    pub players: HashMap<String, PlayerData>,
}

impl Default for AmongUsData {
    fn default() -> AmongUsData {
        AmongUsData {
            phase: Phase::Menu,
            room: String::new(),
            region: String::new(),
            players: HashMap::new(),
        }
    }
}

impl AmongUsData {
    /// Applies an incoming phase, returning the *previous* phase. A
    /// same-phase message is still recorded as the previous phase (so
    /// callers can compare) but the caller is expected to treat
    /// `old == new` as a no-op per the idempotence invariant.
    pub fn update_phase(&mut self, new_phase: Phase) -> Phase {
        let old = self.phase;
        if old == new_phase {
            return old;
        }
        self.phase = new_phase;
        if transition_action(old, new_phase).resets_alive {
            for player in self.players.values_mut() {
                player.is_alive = true;
            }
        }
        old
    }

    pub fn set_room_region(&mut self, room: impl Into<String>, region: impl Into<String>) {
        self.room = room.into();
        self.region = region.into();
    }

    /// Applies a player event, returning `(updated, is_alive_updated, data)`
    /// where `data` is the resulting (or newly inserted) player record.
    /// `Left`/`Disconnected` clear the player's own data so a rejoin starts
    /// fresh; other actions upsert by name.
    pub fn update_player(&mut self, ev: &PlayerEvent) -> (bool, bool, PlayerData) {
        if ev.disconnected || ev.action == PlayerAction::Left {
            self.players.remove(&ev.name);
            return (true, false, PlayerData::from_event(ev));
        }

        match self.players.get_mut(&ev.name) {
            Some(existing) => {
                let is_alive_updated = existing.is_alive != ev.is_alive;
                let updated = is_alive_updated
                    || existing.color != ev.color
                    || existing.role != ev.role
                    || existing.disconnected != ev.disconnected;
                existing.is_alive = ev.is_alive;
                existing.color = ev.color;
                existing.role = ev.role;
                existing.disconnected = ev.disconnected;
                (updated, is_alive_updated, existing.clone())
            }
            None => {
                let data = PlayerData::from_event(ev);
                self.players.insert(ev.name.clone(), data.clone());
                (true, false, data)
            }
        }
    }

    pub fn clear_player_data(&mut self, name: &str) {
        self.players.remove(name);
    }

    pub fn clear_all_player_data(&mut self) {
        self.players.clear();
    }

    pub fn get_by_name(&self, name: &str) -> Option<&PlayerData> {
        self.players.get(name)
    }

    pub fn get_by_color(&self, color: u8) -> Option<&PlayerData> {
        self.players.values().find(|p| p.color == color)
    }
}

/// A voice-platform user's link to the game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserData {
    pub nickname: String,
    pub in_game_name: Option<String>,
    pub voice_change_ready: bool,
    pub should_mute: bool,
    pub should_deaf: bool,
}

impl UserData {
    pub fn new(nickname: impl Into<String>) -> UserData {
        UserData {
            nickname: nickname.into(),
            in_game_name: None,
            voice_change_ready: true,
            should_mute: false,
            should_deaf: false,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.in_game_name.is_some()
    }
}

/// One active game session, identified by `ConnectCode` and addressable by
/// guild/text-channel/voice-channel pointers (see
/// [`crate::store::keys`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameState {
    pub guild_id: u64,
    pub connect_code: String,
    pub linked: bool,
    pub running: bool,
    pub subscribed: bool,
    pub tracking: Tracking,
    pub game_state_msg: GameStateMsg,
    pub among_us_data: AmongUsData,
    pub user_data: HashMap<u64, UserData>,
}

impl GameState {
    /// Creates a fresh, unsubscribed game for `guild_id` with a freshly
    /// minted connect code.
    pub fn new(guild_id: u64) -> GameState {
        GameState {
            guild_id,
            connect_code: generate_connect_code(),
            linked: false,
            running: true,
            subscribed: false,
            tracking: Tracking::default(),
            game_state_msg: GameStateMsg::default(),
            among_us_data: AmongUsData::default(),
            user_data: HashMap::new(),
        }
    }

    pub fn get_user(&self, user_id: u64) -> Option<&UserData> {
        self.user_data.get(&user_id)
    }

    pub fn get_user_mut(&mut self, user_id: u64) -> Option<&mut UserData> {
        self.user_data.get_mut(&user_id)
    }

    pub fn ensure_user(&mut self, user_id: u64, nickname: impl Into<String>) -> &mut UserData {
        self.user_data
            .entry(user_id)
            .or_insert_with(|| UserData::new(nickname))
    }

    /// Whether `user_id` counts as *tracked*: in the tracking voice channel
    /// and linked to a player (invariant 3).
    pub fn is_tracked(&self, user_id: u64, current_channel: Option<u64>) -> bool {
        let in_channel = self.tracking.is_tracking(current_channel);
        let linked = self
            .user_data
            .get(&user_id)
            .and_then(|u| u.in_game_name.as_deref())
            .map(|name| self.among_us_data.get_by_name(name).is_some())
            .unwrap_or(false);
        in_channel && linked
    }

    /// Links `user_id` to the player of `color`, if one exists.
    pub fn link_by_color(&mut self, user_id: u64, color: u8) -> bool {
        let name = match self.among_us_data.get_by_color(color) {
            Some(p) => p.name.clone(),
            None => return false,
        };
        if let Some(user) = self.user_data.get_mut(&user_id) {
            user.in_game_name = Some(name);
            true
        } else {
            false
        }
    }

    /// Links `user_id` to the player named `name`, if one exists.
    pub fn link_by_name(&mut self, user_id: u64, name: &str) -> bool {
        if self.among_us_data.get_by_name(name).is_none() {
            return false;
        }
        if let Some(user) = self.user_data.get_mut(&user_id) {
            user.in_game_name = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// Clears `user_id`'s player link (the `❌` reaction, or disconnect).
    pub fn unlink(&mut self, user_id: u64) {
        if let Some(user) = self.user_data.get_mut(&user_id) {
            user.in_game_name = None;
        }
    }

    /// Clears every user's link to `player_name` (a player left/disconnected
    /// and must be re-linked on rejoin).
    pub fn clear_player_data_by_player_name(&mut self, player_name: &str) {
        for user in self.user_data.values_mut() {
            if user.in_game_name.as_deref() == Some(player_name) {
                user.in_game_name = None;
            }
        }
    }

    /// Attempts to pair `player` to an unlinked user whose cached nickname
    /// exactly matches the in-game name. Returns `true` if a pairing was
    /// made.
    pub fn attempt_pairing_by_matching_names(&mut self, player: &PlayerData) -> bool {
        let candidate = self
            .user_data
            .iter()
            .find(|(_, u)| !u.is_linked() && u.nickname == player.name)
            .map(|(id, _)| *id);

        if let Some(user_id) = candidate {
            self.user_data.get_mut(&user_id).unwrap().in_game_name = Some(player.name.clone());
            true
        } else {
            false
        }
    }

    /// Attempts to pair `player` using the guild's cached
    /// `(name -> userID)` history. `uids` maps the cached user-id strings
    /// that have previously played as `player.name`.
    pub fn attempt_pairing_by_user_ids(&mut self, player: &PlayerData, uids: &[u64]) -> bool {
        let candidate = uids
            .iter()
            .copied()
            .find(|id| self.user_data.contains_key(id) && !self.user_data[id].is_linked());

        if let Some(user_id) = candidate {
            self.user_data.get_mut(&user_id).unwrap().in_game_name = Some(player.name.clone());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_code_has_no_ambiguous_letters() {
        for _ in 0..100 {
            let code = generate_connect_code();
            assert_eq!(code.len(), CONNECT_CODE_LEN);
            assert!(!code.contains('I'));
            assert!(!code.contains('O'));
        }
    }

    #[test]
    fn phase_transition_is_idempotent() {
        let mut data = AmongUsData::default();
        data.update_phase(Phase::Lobby);
        let before = data.clone();
        let old = data.update_phase(Phase::Lobby);
        assert_eq!(old, Phase::Lobby);
        assert_eq!(data.phase, before.phase);
    }

    #[test]
    fn entering_lobby_revives_everyone() {
        let mut data = AmongUsData::default();
        data.players.insert(
            "Red".to_string(),
            PlayerData { name: "Red".into(), color: 0, is_alive: false, role: 0, disconnected: false },
        );
        data.update_phase(Phase::Lobby);
        assert!(data.players["Red"].is_alive);
    }

    #[test]
    fn left_action_clears_player_data() {
        let mut data = AmongUsData::default();
        data.players.insert(
            "Red".to_string(),
            PlayerData { name: "Red".into(), color: 0, is_alive: true, role: 0, disconnected: false },
        );
        let ev = PlayerEvent {
            name: "Red".into(),
            color: 0,
            is_alive: true,
            action: PlayerAction::Left,
            role: 0,
            disconnected: false,
        };
        data.update_player(&ev);
        assert!(data.get_by_name("Red").is_none());
    }

    #[test]
    fn tracked_requires_channel_match_and_link() {
        let mut game = GameState::new(1);
        game.tracking.voice_channel_id = Some(42);
        game.among_us_data.players.insert(
            "Red".into(),
            PlayerData { name: "Red".into(), color: 0, is_alive: true, role: 0, disconnected: false },
        );
        game.ensure_user(7, "redplayer");
        assert!(!game.is_tracked(7, Some(42)), "not linked yet");

        game.link_by_name(7, "Red");
        assert!(game.is_tracked(7, Some(42)));
        assert!(!game.is_tracked(7, Some(99)), "wrong channel");
    }

    #[test]
    fn unlink_clears_tracking_eligibility() {
        let mut game = GameState::new(1);
        game.tracking.voice_channel_id = Some(42);
        game.among_us_data.players.insert(
            "Red".into(),
            PlayerData { name: "Red".into(), color: 0, is_alive: true, role: 0, disconnected: false },
        );
        game.ensure_user(7, "redplayer");
        game.link_by_name(7, "Red");
        game.unlink(7);
        assert!(!game.is_tracked(7, Some(42)));
    }

    #[test]
    fn pairing_by_matching_names_links_on_exact_nickname() {
        let mut game = GameState::new(1);
        game.ensure_user(7, "Red");
        let player = PlayerData { name: "Red".into(), color: 0, is_alive: true, role: 0, disconnected: false };
        assert!(game.attempt_pairing_by_matching_names(&player));
        assert_eq!(game.get_user(7).unwrap().in_game_name.as_deref(), Some("Red"));
    }

    #[test]
    fn pairing_by_user_ids_skips_already_linked_users() {
        let mut game = GameState::new(1);
        game.ensure_user(7, "nickname");
        game.among_us_data.players.insert(
            "Blue".into(),
            PlayerData { name: "Blue".into(), color: 1, is_alive: true, role: 0, disconnected: false },
        );
        game.link_by_name(7, "Blue");
        let player = PlayerData { name: "Red".into(), color: 0, is_alive: true, role: 0, disconnected: false };
        // user 7 is already linked (to Blue), so pairing Red via cached
        // uids must not steal it.
        assert!(!game.attempt_pairing_by_user_ids(&player, &[7]));
    }
}
