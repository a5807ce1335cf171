//! Chat command surface (`.au` prefix, configurable per guild). Parses and
//! dispatches the subset of the command surface that drives `GameState`
//! directly; commands dealing with out-of-scope subsystems (stats history,
//! premium entitlements, map images) are acknowledged but not deeply
//! implemented here.

use tracing::info;

use crate::error::Result;
use crate::game::repo::{self, GameStateRequest};
use crate::game::GameState;
use crate::router::GuildRouter;
use crate::worker::KillReason;

/// Dispatches one parsed command. Returns `Some(connect_code)` when a new
/// game was created and the caller should spawn its worker.
pub async fn dispatch(
    router: &GuildRouter,
    guild_id: u64,
    channel_id: u64,
    author_id: u64,
    cmd: &str,
    args: &[&str],
) -> Result<Option<String>> {
    match cmd {
        "start" => start(router, guild_id, channel_id, args).await,
        "link" => {
            link(router, guild_id, channel_id, args).await?;
            Ok(None)
        }
        "track" => {
            track(router, guild_id, channel_id, args).await?;
            Ok(None)
        }
        "reset" | "r" => {
            reset(router, guild_id, channel_id).await?;
            Ok(None)
        }
        "end" | "e" => {
            end(router, guild_id, channel_id).await?;
            Ok(None)
        }
        "help" | "h" => {
            info!("help requested");
            Ok(None)
        }
        "settings" | "privacy" | "info" | "stats" | "premium" | "map" | "refresh" | "force" | "f" | "pause" => {
            info!(cmd, "command acknowledged, no dedicated handler");
            Ok(None)
        }
        _ => {
            info!(cmd, "unknown command");
            Ok(None)
        }
    }
}

/// `start [code] [region]`: ends any prior game in this text channel, then
/// creates a fresh `GameState` (with a freshly minted connect code unless
/// an explicit one is given) bound to `channel_id`.
async fn start(router: &GuildRouter, guild_id: u64, channel_id: u64, args: &[&str]) -> Result<Option<String>> {
    let existing = GameStateRequest::by_text_channel(guild_id, channel_id);
    if let Some(game) = repo::get_read_only(&router.store_ref(), &existing).await? {
        router.end_game(&game.connect_code, KillReason::EndAndWipe).await;
    }

    let mut state = GameState::new(guild_id);
    if let Some(code) = args.first() {
        state.connect_code = code.to_uppercase();
    }
    state.game_state_msg.channel_id = Some(channel_id);
    state.subscribed = true;

    repo::set(&router.store_ref(), &state, None).await?;

    Ok(Some(state.connect_code))
}

/// `link <@user> <color|name>`: explicit operator pairing, bypassing the
/// reaction-based flow.
async fn link(router: &GuildRouter, guild_id: u64, channel_id: u64, args: &[&str]) -> Result<()> {
    let (Some(user_arg), Some(target)) = (args.first(), args.get(1)) else {
        return Ok(());
    };
    let Some(user_id) = parse_mention(user_arg) else {
        return Ok(());
    };

    let request = GameStateRequest::by_text_channel(guild_id, channel_id);
    let (lock, mut game) = repo::get_and_lock(&router.store_ref(), &request).await?;

    game.ensure_user(user_id, "");
    if let Ok(color) = target.parse::<u8>() {
        game.link_by_color(user_id, color);
    } else {
        game.link_by_name(user_id, target);
    }

    repo::set(&router.store_ref(), &game, Some(lock)).await
}

/// `track <voice-channel-name>` — out of scope for this layer is the
/// name→id resolution against the chat platform's channel list, since
/// that needs the gateway cache's channel index rather than anything the
/// store can answer; callers are expected to have already resolved the
/// name to an id before this point in a full deployment. Here, the raw
/// argument is accepted as a literal id for the common case of pinning a
/// channel by id.
async fn track(router: &GuildRouter, guild_id: u64, channel_id: u64, args: &[&str]) -> Result<()> {
    let Some(raw) = args.first() else { return Ok(()) };
    let Ok(voice_channel_id) = raw.parse::<u64>() else {
        return Ok(());
    };

    let request = GameStateRequest::by_text_channel(guild_id, channel_id);
    let (lock, mut game) = repo::get_and_lock(&router.store_ref(), &request).await?;
    game.tracking.voice_channel_id = Some(voice_channel_id);
    repo::set(&router.store_ref(), &game, Some(lock)).await
}

/// `reset|r`: clears tracking and all player links without ending the
/// game outright.
async fn reset(router: &GuildRouter, guild_id: u64, channel_id: u64) -> Result<()> {
    let request = GameStateRequest::by_text_channel(guild_id, channel_id);
    let (lock, mut game) = repo::get_and_lock(&router.store_ref(), &request).await?;
    game.tracking.reset();
    game.among_us_data.clear_all_player_data();
    game.user_data.clear();
    repo::set(&router.store_ref(), &game, Some(lock)).await
}

/// `end|e`: forcefully ends the game bound to this text channel.
async fn end(router: &GuildRouter, guild_id: u64, channel_id: u64) -> Result<()> {
    let request = GameStateRequest::by_text_channel(guild_id, channel_id);
    if let Some(game) = repo::get_read_only(&router.store_ref(), &request).await? {
        router.end_game(&game.connect_code, KillReason::EndAndWipe).await;
    }
    Ok(())
}

/// Parses a `<@123>` / `<@!123>` chat-platform mention into a raw user id.
fn parse_mention(raw: &str) -> Option<u64> {
    raw.trim_start_matches("<@").trim_start_matches('!').trim_end_matches('>').parse().ok()
}
