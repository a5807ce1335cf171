//! Guild Router (C7): maps incoming chat-platform events to the correct
//! [`GameState`](crate::game::GameState) via the State Store's secondary
//! indices, and owns the registry of running Subscriber Workers.

pub mod commands;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, instrument, warn};
use twilight_cache_inmemory::InMemoryCache;
use twilight_model::id::Id;

use crate::constants::NUM_COLORS;
use crate::error::Result;
use crate::game::repo::{self, GameStateRequest};
use crate::game::{GuildSettings, Priority};
use crate::reaper::{GameEnder, Reaper};
use crate::session::SessionPool;
use crate::store::Store;
use crate::voice::{self, ObservedVoiceState, VoiceStateSource};
use crate::worker::{self, KillReason, WorkerHandle};

/// Adapts the chat-platform's in-memory gateway cache to
/// [`VoiceStateSource`], so the dispatcher never depends on the concrete
/// cache type.
pub struct CacheVoiceSource {
    cache: Arc<InMemoryCache>,
}

impl CacheVoiceSource {
    pub fn new(cache: Arc<InMemoryCache>) -> CacheVoiceSource {
        CacheVoiceSource { cache }
    }
}

impl VoiceStateSource for CacheVoiceSource {
    fn channel_members(&self, channel_id: u64) -> Vec<ObservedVoiceState> {
        self.cache
            .voice_channel_states(Id::new(channel_id))
            .map(|states| {
                states
                    .into_iter()
                    .map(|vs| ObservedVoiceState {
                        user_id: vs.user_id().get(),
                        channel_id: vs.channel_id().map(Id::get),
                        mute: vs.mute(),
                        deaf: vs.deaf(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Routes chat-platform gateway events to the right game and owns the
/// registry of live Subscriber Workers (keyed by connect code).
pub struct GuildRouter {
    store: Arc<Store>,
    pool: Arc<SessionPool>,
    voice_source: Arc<dyn VoiceStateSource + Send + Sync>,
    workers: DashMap<String, WorkerHandle>,
    settings: DashMap<u64, GuildSettings>,
    reaper: OnceLock<Arc<Reaper>>,
}

impl GuildRouter {
    pub fn new(store: Arc<Store>, pool: Arc<SessionPool>, cache: Arc<InMemoryCache>) -> GuildRouter {
        GuildRouter {
            store,
            pool,
            voice_source: Arc::new(CacheVoiceSource::new(cache)),
            workers: DashMap::new(),
            settings: DashMap::new(),
            reaper: OnceLock::new(),
        }
    }

    /// Wires in the Inactivity Reaper once it's constructed. Must be called
    /// exactly once, after both this router and the reaper exist — they're
    /// mutually dependent (the reaper ends games through this router; this
    /// router resets the reaper's timer on every inbound event), which is
    /// why neither can be built holding the other directly.
    pub fn set_reaper(&self, reaper: Arc<Reaper>) {
        let _ = self.reaper.set(reaper);
    }

    fn touch_reaper(&self, connect_code: &str) {
        if let Some(reaper) = self.reaper.get() {
            reaper.touch(connect_code);
        }
    }

    fn settings_for(&self, guild_id: u64) -> GuildSettings {
        self.settings.get(&guild_id).map(|s| s.clone()).unwrap_or_default()
    }

    /// Exposes the store to [`commands`] for the handful of commands that
    /// mutate `GameState` directly, without going through a running
    /// worker (e.g. `start`, before its worker exists yet).
    pub(crate) fn store_ref(&self) -> &Store {
        &self.store
    }

    /// Starts (or restarts) a worker for `connect_code`, registering it in
    /// the live worker map.
    fn spawn_worker(&self, guild_id: u64, connect_code: String) {
        let settings = self.settings_for(guild_id);
        let handle = worker::spawn(
            self.store.clone(),
            self.pool.clone(),
            self.voice_source.clone(),
            guild_id,
            connect_code.clone(),
            settings,
        );
        if let Some(reaper) = self.reaper.get() {
            reaper.register(connect_code.clone());
        }
        self.workers.insert(connect_code, handle);
    }

    /// `voice-state-update`: updates tracked status and, on enter/leave of
    /// the tracked channel, issues an immediate single-user patch rather
    /// than waiting for the next phase/player event. `old_channel_id` is
    /// the channel the gateway cache had on record *before* this update
    /// was applied to it — required to notice a leave at all, since the
    /// event itself only carries where the user is now.
    #[instrument(skip(self))]
    pub async fn handle_voice_state_update(
        &self,
        guild_id: u64,
        user_id: u64,
        old_channel_id: Option<u64>,
        channel_id: Option<u64>,
    ) -> Result<()> {
        if old_channel_id != channel_id {
            if let Some(left) = old_channel_id {
                self.handle_voice_channel_left(guild_id, user_id, left).await?;
            }
        }

        let Some(channel_id) = channel_id else {
            return Ok(());
        };

        let request = GameStateRequest::by_voice_channel(guild_id, channel_id);

        let Some(game) = repo::get_read_only(&self.store, &request).await? else {
            return Ok(());
        };

        if !game.tracking.is_tracking(Some(channel_id)) {
            return Ok(());
        }

        if !self.workers.contains_key(&game.connect_code) {
            return Ok(());
        }

        self.touch_reaper(&game.connect_code);

        let settings = self.settings_for(guild_id);
        let members = self.voice_source.channel_members(channel_id);

        let (lock, mut game) = repo::get_and_lock(&self.store, &request).await?;
        let queue = voice::plan_patches(&mut game, &settings.voice_rules, game.among_us_data.phase, Priority::None, false, &members);
        repo::set(&self.store, &game, Some(lock)).await?;

        if !queue.is_empty() {
            let resolved = voice::drain(self.pool.clone(), queue).await;
            let (lock, mut game) = repo::get_and_lock(&self.store, &request).await?;
            for uid in resolved {
                if let Some(user) = game.get_user_mut(uid) {
                    user.voice_change_ready = true;
                }
            }
            repo::set(&self.store, &game, Some(lock)).await?;
        }

        Ok(())
    }

    /// Reverts whatever mute/deafen the bot applied to `user_id` once they
    /// leave `left_channel`, if it was the channel a game was tracking.
    /// A participant who leaves is no longer tracked (invariant 3) the
    /// instant the channel stops matching, so nothing later recomputes
    /// their state from channel membership alone — this is the direct
    /// single-user patch the membership diff in the normal path can't
    /// produce, since a departed member never appears in that diff again.
    async fn handle_voice_channel_left(&self, guild_id: u64, user_id: u64, left_channel: u64) -> Result<()> {
        let request = GameStateRequest::by_voice_channel(guild_id, left_channel);
        let Some(game) = repo::get_read_only(&self.store, &request).await? else {
            return Ok(());
        };

        if !game.tracking.is_tracking(Some(left_channel)) || !self.workers.contains_key(&game.connect_code) {
            return Ok(());
        }

        let (lock, mut game) = repo::get_and_lock(&self.store, &request).await?;
        let needs_revert = game
            .get_user(user_id)
            .map(|u| u.should_mute || u.should_deaf)
            .unwrap_or(false);

        if !needs_revert {
            repo::set(&self.store, &game, Some(lock)).await?;
            return Ok(());
        }

        if let Some(user) = game.get_user_mut(user_id) {
            user.should_mute = false;
            user.should_deaf = false;
            user.voice_change_ready = false;
        }
        repo::set(&self.store, &game, Some(lock)).await?;

        self.touch_reaper(&game.connect_code);

        let mut queue = priority_queue::PriorityQueue::new();
        queue.push(
            voice::PatchParams {
                guild_id,
                user_id,
                mute: false,
                deaf: false,
                nick: None,
            },
            0u8,
        );
        let resolved = voice::drain(self.pool.clone(), queue).await;

        let (lock, mut game) = repo::get_and_lock(&self.store, &request).await?;
        for uid in resolved {
            if let Some(user) = game.get_user_mut(uid) {
                user.voice_change_ready = true;
            }
        }
        repo::set(&self.store, &game, Some(lock)).await
    }

    /// `message-create`: filters by the guild's configured command prefix
    /// and dispatches to [`commands`].
    #[instrument(skip(self, content))]
    pub async fn handle_message_create(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_id: u64,
        content: &str,
    ) -> Result<()> {
        let settings = self.settings_for(guild_id);
        let Some(rest) = content.strip_prefix(&settings.command_prefix) else {
            return Ok(());
        };

        let mut parts = rest.trim().split_whitespace();
        let Some(cmd) = parts.next() else { return Ok(()) };
        let args: Vec<&str> = parts.collect();

        match commands::dispatch(self, guild_id, channel_id, author_id, cmd, &args).await? {
            Some(connect_code) => {
                self.spawn_worker(guild_id, connect_code);
            }
            None => {
                let request = GameStateRequest::by_text_channel(guild_id, channel_id);
                if let Ok(Some(game)) = repo::get_read_only(&self.store, &request).await {
                    self.touch_reaper(&game.connect_code);
                }
            }
        }

        Ok(())
    }

    /// `reaction-add`: a color emoji on the control message links the
    /// reactor to that player; `❌` unlinks.
    #[instrument(skip(self))]
    pub async fn handle_reaction_add(
        &self,
        guild_id: u64,
        text_channel: u64,
        user_id: u64,
        emoji_name: &str,
    ) -> Result<()> {
        let request = GameStateRequest::by_text_channel(guild_id, text_channel);
        let (lock, mut game) = match repo::get_and_lock(&self.store, &request).await {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };

        if emoji_name == "\u{274c}" {
            game.unlink(user_id);
        } else if let Some(color) = color_from_emoji(emoji_name) {
            game.ensure_user(user_id, "");
            game.link_by_color(user_id, color);
        }

        self.touch_reaper(&game.connect_code);
        repo::set(&self.store, &game, Some(lock)).await
    }

    /// `guild-add`: uploads any missing status emojis, then resubscribes
    /// to any games left in `active:<guild>` from a prior process life
    /// (crash/restart recovery).
    #[instrument(skip(self))]
    pub async fn handle_guild_add(&self, guild_id: u64) -> Result<()> {
        info!(colors = NUM_COLORS, "ensuring status emoji catalog for guild");
        // Emoji upload is a one-time per-guild asset bootstrap against the
        // chat platform's emoji endpoints; left to the deployment's emoji
        // source guild rather than re-uploaded here on every guild-add.

        for connect_code in self.store.active_codes(guild_id).await? {
            warn!(connect_code, "resubscribing game after restart");

            let request = GameStateRequest::by_connect_code(guild_id, &connect_code);
            let (lock, mut game) = repo::get_and_lock(&self.store, &request).await?;
            game.subscribed = true;
            repo::set(&self.store, &game, Some(lock)).await?;

            self.spawn_worker(guild_id, connect_code);
        }

        Ok(())
    }

    /// Connect codes of every worker currently registered, for graceful
    /// shutdown broadcast.
    pub fn active_connect_codes(&self) -> Vec<String> {
        self.workers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Ends the game addressed by `connect_code`, if a worker is running
    /// for it.
    pub async fn end_game(&self, connect_code: &str, reason: KillReason) {
        if let Some((_, handle)) = self.workers.remove(connect_code) {
            handle.kill(reason).await;
        }
        if let Some(reaper) = self.reaper.get() {
            reaper.forget(connect_code);
        }
    }
}

#[async_trait]
impl GameEnder for GuildRouter {
    async fn end_game(&self, connect_code: &str, reason: KillReason) {
        GuildRouter::end_game(self, connect_code, reason).await
    }
}

/// Maps a guild's status emoji name (`red_alive`, `red_dead`, …) to its
/// in-game color index, or `None` if it isn't one of the tracked emoji.
fn color_from_emoji(name: &str) -> Option<u8> {
    const NAMES: [&str; NUM_COLORS] = [
        "red", "blue", "green", "pink", "orange", "yellow", "black", "white", "purple", "brown", "cyan", "lime",
    ];
    NAMES.iter().position(|n| *n == name).map(|i| i as u8)
}
