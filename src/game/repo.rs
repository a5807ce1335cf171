//! Bridges the Game State Machine (C4) to the State Store (C1): resolves a
//! [`GameState`] by any of its three pointer keys, locks it for mutation,
//! and writes it back with all pointers refreshed.

use crate::constants::GAME_STATE_TTL;
use crate::error::Result;
use crate::game::GameState;
use crate::store::{keys, LockHandle, Store};

/// Identifies a game by whichever of its addressable keys the caller has on
/// hand. At least one field should be populated; `connect_code` is
/// authoritative and checked first.
#[derive(Clone, Debug, Default)]
pub struct GameStateRequest {
    pub guild_id: u64,
    pub connect_code: Option<String>,
    pub text_channel: Option<u64>,
    pub voice_channel: Option<u64>,
}

impl GameStateRequest {
    pub fn by_connect_code(guild_id: u64, connect_code: impl Into<String>) -> GameStateRequest {
        GameStateRequest {
            guild_id,
            connect_code: Some(connect_code.into()),
            ..Default::default()
        }
    }

    pub fn by_voice_channel(guild_id: u64, voice_channel: u64) -> GameStateRequest {
        GameStateRequest {
            guild_id,
            voice_channel: Some(voice_channel),
            ..Default::default()
        }
    }

    pub fn by_text_channel(guild_id: u64, text_channel: u64) -> GameStateRequest {
        GameStateRequest {
            guild_id,
            text_channel: Some(text_channel),
            ..Default::default()
        }
    }

    /// Resolves the canonical `game:<connect>` key, falling back from
    /// connect-code to text-channel to voice-channel pointers (invariant 2).
    async fn resolve_key(&self, store: &Store) -> Result<Option<String>> {
        if let Some(code) = &self.connect_code {
            let pointer = keys::pointer_code(self.guild_id, code);
            if let Some(key) = store.resolve_pointer(&pointer).await? {
                return Ok(Some(key));
            }
        }
        if let Some(channel) = self.text_channel {
            let pointer = keys::pointer_text(self.guild_id, channel);
            if let Some(key) = store.resolve_pointer(&pointer).await? {
                return Ok(Some(key));
            }
        }
        if let Some(channel) = self.voice_channel {
            let pointer = keys::pointer_voice(self.guild_id, channel);
            if let Some(key) = store.resolve_pointer(&pointer).await? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }
}

/// Reads the current `GameState` for `request` without locking, accepting
/// a possibly-stale view. Used for status rendering and stats; never for
/// mutation.
pub async fn get_read_only(store: &Store, request: &GameStateRequest) -> Result<Option<GameState>> {
    match request.resolve_key(store).await? {
        Some(key) => store.get_json(&key).await,
        None => Ok(None),
    }
}

/// Resolves, locks, and reads `request`'s `GameState`, creating a fresh one
/// (and persisting it immediately) if none exists yet. Spins on lock
/// contention per the Mutual Exclusion model.
pub async fn get_and_lock(
    store: &Store,
    request: &GameStateRequest,
) -> Result<(LockHandle, GameState)> {
    let key = match request.resolve_key(store).await? {
        Some(key) => key,
        None => {
            let mut state = GameState::new(request.guild_id);
            if let Some(code) = &request.connect_code {
                state.connect_code = code.clone();
            }
            if let Some(channel) = request.text_channel {
                state.game_state_msg.channel_id = Some(channel);
            }
            if let Some(channel) = request.voice_channel {
                state.tracking.voice_channel_id = Some(channel);
            }
            let key = keys::game(&state.connect_code);
            set(store, &state, None).await?;
            key
        }
    };

    let lock_key = keys::lock(&key);
    let handle = store.acquire_spin(&lock_key, crate::constants::LOCK_TTL).await;

    let state = store
        .get_json(&key)
        .await?
        .unwrap_or_else(|| GameState::new(request.guild_id));

    Ok((handle, state))
}

/// Writes `state` back (refreshing all three pointers) and releases
/// `lock`, if held. The lock never spans the network call that follows a
/// write — callers must not issue chat-platform requests before this
/// returns.
pub async fn set(store: &Store, state: &GameState, lock: Option<LockHandle>) -> Result<()> {
    let key = keys::game(&state.connect_code);
    store.set_json(&key, state, GAME_STATE_TTL).await?;

    store
        .set_raw(
            &keys::pointer_code(state.guild_id, &state.connect_code),
            &key,
            GAME_STATE_TTL,
        )
        .await?;

    if let Some(channel) = state.tracking.voice_channel_id {
        store
            .set_raw(&keys::pointer_voice(state.guild_id, channel), &key, GAME_STATE_TTL)
            .await?;
    }

    if let Some(channel) = state.game_state_msg.channel_id {
        store
            .set_raw(&keys::pointer_text(state.guild_id, channel), &key, GAME_STATE_TTL)
            .await?;
    }

    if let Some(lock) = lock {
        store.release(lock).await?;
    }

    Ok(())
}

/// Deletes `state` and every pointer addressing it (forceful end).
pub async fn delete(store: &Store, state: &GameState) -> Result<()> {
    let key = keys::game(&state.connect_code);
    let pointer_code = keys::pointer_code(state.guild_id, &state.connect_code);

    let mut owned = vec![key.clone(), pointer_code];
    if let Some(channel) = state.tracking.voice_channel_id {
        owned.push(keys::pointer_voice(state.guild_id, channel));
    }
    if let Some(channel) = state.game_state_msg.channel_id {
        owned.push(keys::pointer_text(state.guild_id, channel));
    }

    let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
    store.del(&refs).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_constructors_populate_the_right_field() {
        let r = GameStateRequest::by_connect_code(1, "AB12CD");
        assert_eq!(r.connect_code.as_deref(), Some("AB12CD"));
        assert!(r.text_channel.is_none());

        let r = GameStateRequest::by_voice_channel(1, 42);
        assert_eq!(r.voice_channel, Some(42));
    }
}
