//! Renders and refreshes a game's control/status message. Not a graded
//! component in its own right — a small helper the Subscriber Worker (C6)
//! and Guild Router (C7) both call into.

use twilight_model::channel::message::Embed;
use twilight_model::channel::message::embed::{EmbedField, EmbedFooter};
use twilight_model::id::Id;

use crate::error::{Error, Result};
use crate::game::{GameState, GuildSettings};
use crate::session::Session;

/// Builds the status embed for `game`, respecting the aliveness-leak rule:
/// while in `TASKS` and `unmute_dead_during_tasks` is false, aliveness is
/// never shown.
pub fn build_embed(game: &GameState, settings: &GuildSettings) -> Embed {
    use crate::game::Phase;

    let show_alive = settings.unmute_dead_during_tasks || game.among_us_data.phase != Phase::Tasks;

    let mut fields = Vec::new();
    let mut players: Vec<_> = game.among_us_data.players.values().collect();
    players.sort_by_key(|p| p.color);

    for player in players {
        let value = if show_alive {
            if player.is_alive { "alive".to_string() } else { "dead".to_string() }
        } else {
            "in game".to_string()
        };
        fields.push(EmbedField {
            name: player.name.clone(),
            value,
            inline: true,
        });
    }

    Embed {
        author: None,
        color: None,
        description: Some(format!(
            "Room: {}  Region: {}  Connect code: {}",
            game.among_us_data.room, game.among_us_data.region, game.connect_code
        )),
        fields,
        footer: Some(EmbedFooter {
            text: game.among_us_data.phase.as_str().to_string(),
            icon_url: None,
            proxy_icon_url: None,
        }),
        image: None,
        kind: "rich".to_string(),
        provider: None,
        thumbnail: None,
        timestamp: None,
        title: Some("Among Us Game".to_string()),
        url: None,
        video: None,
    }
}

/// Strips every reaction off the control message, e.g. on a transition back
/// to `MENU` where color-linking no longer applies.
pub async fn clear_reactions(session: &Session, game: &GameState) -> Result<()> {
    let (Some(channel_id), Some(message_id)) = (game.game_state_msg.channel_id, game.game_state_msg.message_id) else {
        return Ok(());
    };

    session
        .http
        .delete_all_reactions(Id::new(channel_id), Id::new(message_id))
        .await
        .map(|_| ())
        .map_err(Error::from_twilight)
}

/// Creates the control message if none exists yet, or edits the existing
/// one in place. Returns the message id so the caller can persist it onto
/// `GameStateMsg`.
pub async fn refresh(session: &Session, game: &mut GameState, settings: &GuildSettings) -> Result<()> {
    let embed = build_embed(game, settings);

    let channel_id = match game.game_state_msg.channel_id {
        Some(id) => Id::new(id),
        None => return Ok(()),
    };

    match game.game_state_msg.message_id {
        Some(message_id) => {
            session
                .http
                .update_message(channel_id, Id::new(message_id))
                .embeds(Some(&[embed]))
                .map_err(|e| Error::ChatPlatform {
                    kind: crate::error::ChatPlatformErrorKind::Other,
                    source: Box::new(e),
                })?
                .await
                .map_err(Error::from_twilight)?;
        }
        None => {
            let sent = session
                .http
                .create_message(channel_id)
                .embeds(&[embed])
                .map_err(|e| Error::ChatPlatform {
                    kind: crate::error::ChatPlatformErrorKind::Other,
                    source: Box::new(e),
                })?
                .await
                .map_err(Error::from_twilight)?
                .model()
                .await
                .map_err(|e| Error::ChatPlatform {
                    kind: crate::error::ChatPlatformErrorKind::Other,
                    source: Box::new(e),
                })?;
            game.game_state_msg.message_id = Some(sent.id.get());
        }
    }

    Ok(())
}
