use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use twilight_cache_inmemory::InMemoryCache;
use twilight_gateway::{cluster::Events, Cluster, Intents};
use twilight_http::Client;
use twilight_model::channel::message::ReactionType;
use twilight_model::gateway::event::Event;

use automuteus::config::Settings;
use automuteus::reaper::Reaper;
use automuteus::router::GuildRouter;
use automuteus::session::{Session, SessionPool};
use automuteus::store::Store;

fn intents() -> Intents {
    Intents::GUILDS
        | Intents::GUILD_VOICE_STATES
        | Intents::GUILD_MESSAGES
        | Intents::MESSAGE_CONTENT
        | Intents::GUILD_MESSAGE_REACTIONS
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings);

    info!("starting up");

    let store = Arc::new(Store::connect(&settings.redis_url).await?);
    let cache = Arc::new(InMemoryCache::builder().message_cache_size(0).build());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut sessions = Vec::new();

    let primary_shard = settings.shard_id.unwrap_or(0);
    let num_shards = settings.num_shards.unwrap_or(1);
    spawn_shard(&settings.discord_token, primary_shard, num_shards, event_tx.clone(), &mut sessions).await?;

    for token in &settings.discord_helper_tokens {
        spawn_shard(token, primary_shard, num_shards, event_tx.clone(), &mut sessions).await?;
    }
    drop(event_tx);

    let mut sessions_iter = sessions.into_iter();
    let pool = Arc::new(SessionPool::new(
        sessions_iter.next().expect("at least the primary session was spawned"),
        sessions_iter.collect(),
    ));

    let router = Arc::new(GuildRouter::new(store.clone(), pool.clone(), cache.clone()));
    let reaper = Arc::new(Reaper::new(router.clone(), settings.inactivity_timeout));
    router.set_reaper(reaper);

    let dispatch_router = router.clone();
    let dispatch_cache = cache.clone();
    let dispatch = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            // Captured before the cache observes `event`: a voice-state
            // update only carries where a user is *now*, so the channel
            // they were previously in has to come from the cache's prior
            // snapshot or a leave can never be detected.
            let previous_voice_channel = match &event {
                Event::VoiceStateUpdate(update) => update
                    .0
                    .guild_id
                    .and_then(|guild_id| dispatch_cache.voice_state(update.0.user_id, guild_id))
                    .and_then(|vs| vs.channel_id())
                    .map(|id| id.get()),
                _ => None,
            };

            dispatch_cache.update(&event);
            if let Err(e) = handle_event(&dispatch_router, event, previous_voice_channel).await {
                warn!(error = %e, "event handler failed");
            }
        }
    });

    automuteus::lifecycle::wait_for_shutdown(&router, Duration::from_secs(30)).await;
    dispatch.abort();

    info!("shutdown complete");
    Ok(())
}

/// Starts one shard's gateway connection and HTTP client, registers the
/// resulting [`Session`], and spawns a task forwarding its events onto the
/// shared channel every session's events are merged into.
async fn spawn_shard(
    token: &str,
    shard_id: u64,
    num_shards: u64,
    event_tx: mpsc::UnboundedSender<Event>,
    sessions: &mut Vec<Session>,
) -> anyhow::Result<()> {
    let (cluster, events) = Cluster::new(token.to_string(), intents()).await?;
    let cluster = Arc::new(cluster);

    let cluster_spawn = cluster.clone();
    tokio::spawn(async move {
        cluster_spawn.up().await;
    });

    tokio::spawn(forward_events(events, event_tx));

    sessions.push(Session {
        http: Arc::new(Client::new(token.to_string())),
        shard_id,
        num_shards,
    });

    Ok(())
}

async fn forward_events(mut events: Events, event_tx: mpsc::UnboundedSender<Event>) {
    while let Some((_, event)) = events.next().await {
        if event_tx.send(event).is_err() {
            break;
        }
    }
}

async fn handle_event(
    router: &GuildRouter,
    event: Event,
    previous_voice_channel: Option<u64>,
) -> automuteus::error::Result<()> {
    match event {
        Event::Ready(ready) => {
            info!(user_id = %ready.user.id, "gateway ready");
        }
        Event::GuildCreate(guild) => {
            router.handle_guild_add(guild.0.id.get()).await?;
        }
        Event::VoiceStateUpdate(update) => {
            let voice_state = update.0;
            let Some(guild_id) = voice_state.guild_id else { return Ok(()) };
            router
                .handle_voice_state_update(
                    guild_id.get(),
                    voice_state.user_id.get(),
                    previous_voice_channel,
                    voice_state.channel_id.map(|id| id.get()),
                )
                .await?;
        }
        Event::MessageCreate(message) => {
            let message = message.0;
            if message.author.bot {
                return Ok(());
            }
            let Some(guild_id) = message.guild_id else { return Ok(()) };
            router
                .handle_message_create(guild_id.get(), message.channel_id.get(), message.author.id.get(), &message.content)
                .await?;
        }
        Event::ReactionAdd(reaction) => {
            let reaction = reaction.0;
            let Some(guild_id) = reaction.guild_id else { return Ok(()) };
            if let Some(name) = emoji_name(&reaction.emoji) {
                router
                    .handle_reaction_add(guild_id.get(), reaction.channel_id.get(), reaction.user_id.get(), name)
                    .await?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Extracts a comparable name out of either emoji variant a reaction can
/// carry; custom guild emoji are matched by their configured name just like
/// the built-in unicode glyphs.
fn emoji_name(emoji: &ReactionType) -> Option<&str> {
    match emoji {
        ReactionType::Custom { name: Some(name), .. } => Some(name.as_str()),
        ReactionType::Unicode { name } => Some(name.as_str()),
        _ => None,
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.disable_log_file {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file_appender = tracing_appender::rolling::daily("logs", "automuteus.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive every log call for the
        // rest of the process, and this only runs once at startup.
        Box::leak(Box::new(guard));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking.and(std::io::stdout))
            .init();
    }
}
