//! Subscriber Worker (C6): one task per `ConnectCode`, consuming the Event
//! Bus (C2), mutating the Game State Machine (C4) under the State Store's
//! (C1) per-game lock, and invoking the Voice Dispatcher (C5).

use std::sync::Arc;

use priority_queue::PriorityQueue;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, instrument, warn, Instrument};

use crate::constants::END_AND_SAVE_DRAIN;
use crate::events::{self, LobbyEvent, PlayerAction, PlayerEvent};
use crate::game::repo::{self, GameStateRequest};
use crate::game::{transition_action, GameState, GuildSettings, Phase, Priority, TransitionAction};
use crate::session::SessionPool;
use crate::status;
use crate::store::Store;
use crate::voice::{self, ObservedVoiceState, PatchParams, VoiceStateSource};

/// What a kill signal should do with the game before the worker exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillReason {
    /// Persist the state as resumable (appended to `active:<guild>`) and
    /// give in-flight patches a moment to land.
    EndAndSave,
    /// Revert every tracked user's mute/deafen, clear tracking, and delete
    /// the state outright.
    EndAndWipe,
}

type KillMessage = (KillReason, oneshot::Sender<()>);

/// A handle to a running worker task; held by the Guild Router and the
/// Inactivity Reaper so either can request a kill and wait for the
/// acknowledgement.
pub struct WorkerHandle {
    pub connect_code: String,
    kill_tx: mpsc::Sender<KillMessage>,
}

impl WorkerHandle {
    /// Signals the worker to end the game and waits for it to finish
    /// tearing down. A closed channel (worker already gone) is treated as
    /// an immediate ack.
    pub async fn kill(&self, reason: KillReason) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.kill_tx.send((reason, ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Shared dependencies every handler in this module needs. Bundled so
/// handler signatures don't grow a parameter every time a new one is
/// threaded through.
#[derive(Clone)]
struct Worker {
    store: Arc<Store>,
    pool: Arc<SessionPool>,
    voice_source: Arc<dyn VoiceStateSource + Send + Sync>,
    guild_id: u64,
    connect_code: String,
    settings: GuildSettings,
}

/// Spawns the worker task for `connect_code`, returning a handle to it.
/// `voice_source` decouples the dispatcher from the concrete chat-platform
/// cache (see [`crate::voice::VoiceStateSource`]).
pub fn spawn(
    store: Arc<Store>,
    pool: Arc<SessionPool>,
    voice_source: Arc<dyn VoiceStateSource + Send + Sync>,
    guild_id: u64,
    connect_code: String,
    settings: GuildSettings,
) -> WorkerHandle {
    let (kill_tx, kill_rx) = mpsc::channel(1);
    let span = tracing::info_span!("worker", connect_code = %connect_code, guild_id);

    let worker = Worker {
        store,
        pool,
        voice_source,
        guild_id,
        connect_code: connect_code.clone(),
        settings,
    };

    tokio::spawn(run(worker, kill_rx).instrument(span));

    WorkerHandle { connect_code, kill_tx }
}

async fn run(worker: Worker, mut kill_rx: mpsc::Receiver<KillMessage>) {
    let mut subs = match events::subscribe_game(&worker.store, &worker.connect_code).await {
        Ok(subs) => subs,
        Err(e) => {
            error!(error = %e, "failed to subscribe to game topics");
            return;
        }
    };

    info!("worker started");

    loop {
        tokio::select! {
            Some(msg) = subs.connect.next() => {
                if let Err(e) = handle_connect(&worker, msg.payload).await {
                    warn!(error = %e, "connect handler failed");
                }
            }
            Some(msg) = subs.lobby.next() => {
                match serde_json::from_str::<LobbyEvent>(&msg.payload) {
                    Ok(payload) => {
                        if let Err(e) = handle_lobby(&worker, payload).await {
                            warn!(error = %e, "lobby handler failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed lobby payload, skipping"),
                }
            }
            Some(msg) = subs.phase.next() => {
                match Phase::from_wire(&msg.payload) {
                    Some(phase) => {
                        if let Err(e) = handle_phase(&worker, phase).await {
                            warn!(error = %e, "phase handler failed");
                        }
                    }
                    None => warn!(payload = %msg.payload, "malformed phase payload, skipping"),
                }
            }
            Some(msg) = subs.player.next() => {
                match serde_json::from_str::<PlayerEvent>(&msg.payload) {
                    Ok(payload) => {
                        if let Err(e) = handle_player(&worker, payload).await {
                            warn!(error = %e, "player handler failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed player payload, skipping"),
                }
            }
            Some((reason, ack)) = kill_rx.recv() => {
                handle_kill(&worker, reason).await;
                let _ = ack.send(());
                break;
            }
            else => {
                warn!("all subscriptions closed, ending worker");
                break;
            }
        }
    }

    info!("worker stopped");
}

/// Acquires the game lock, applies `mutate`, writes back, and releases —
/// then, with no lock held, refreshes the status message. If that refresh
/// created a fresh control message, the lock is briefly re-acquired to
/// persist the new `message_id`, mirroring `reconcile_voice`'s
/// mutate-write-release-then-dispatch-then-re-lock shape. The lock must
/// never span the chat-platform HTTP call `status::refresh` makes, or a
/// round-trip that outlives `LOCK_TTL` lets another holder acquire the
/// lock while this handler is still about to write its snapshot back.
async fn with_locked_game<F>(worker: &Worker, mutate: F) -> crate::error::Result<GameState>
where
    F: FnOnce(&mut GameState),
{
    let request = GameStateRequest::by_connect_code(worker.guild_id, &worker.connect_code);
    let (lock, mut game) = repo::get_and_lock(&worker.store, &request).await?;

    mutate(&mut game);
    repo::set(&worker.store, &game, Some(lock)).await?;

    let session = worker.pool.primary_session();
    let mut rendered = game.clone();
    if let Err(e) = status::refresh(&session, &mut rendered, &worker.settings).await {
        warn!(error = %e, "status refresh failed");
    } else if rendered.game_state_msg.message_id != game.game_state_msg.message_id {
        let (lock, mut latest) = repo::get_and_lock(&worker.store, &request).await?;
        latest.game_state_msg.message_id = rendered.game_state_msg.message_id;
        repo::set(&worker.store, &latest, Some(lock)).await?;
        game.game_state_msg.message_id = rendered.game_state_msg.message_id;
    }

    Ok(game)
}

#[instrument(skip(worker))]
async fn handle_connect(worker: &Worker, payload: String) -> crate::error::Result<()> {
    let linked = payload.trim() == "true";

    let game = with_locked_game(worker, |game| {
        game.linked = linked;
    })
    .await?;

    events::publish_connect_ack(&worker.store, &worker.connect_code).await?;
    reconcile_voice(worker, game, Priority::None).await
}

#[instrument(skip(worker))]
async fn handle_lobby(worker: &Worker, payload: LobbyEvent) -> crate::error::Result<()> {
    with_locked_game(worker, |game| {
        game.among_us_data.set_room_region(payload.lobby_code, payload.region.as_str());
    })
    .await?;

    Ok(())
}

#[instrument(skip(worker))]
async fn handle_phase(worker: &Worker, new_phase: Phase) -> crate::error::Result<()> {
    let mut old_phase = new_phase;
    let game = with_locked_game(worker, |game| {
        old_phase = game.among_us_data.update_phase(new_phase);
    })
    .await?;

    if old_phase == new_phase {
        // idempotent no-op: already applied, nothing to dispatch.
        return Ok(());
    }

    let action: TransitionAction = transition_action(old_phase, new_phase);

    if action.removes_reactions {
        let session = worker.pool.primary_session();
        if let Err(e) = status::clear_reactions(&session, &game).await {
            warn!(error = %e, "failed to clear status message reactions");
        }
    }

    let delay = worker.settings.delays.get(old_phase, new_phase);
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_secs(delay as u64)).await;
    }

    reconcile_voice(worker, game, action.priority).await
}

#[instrument(skip(worker))]
async fn handle_player(worker: &Worker, payload: PlayerEvent) -> crate::error::Result<()> {
    let name = payload.name.clone();

    with_locked_game(worker, |game| {
        let (_, _, player) = game.among_us_data.update_player(&payload);
        if payload.action == PlayerAction::Left || payload.disconnected {
            game.clear_player_data_by_player_name(&name);
        } else {
            game.attempt_pairing_by_matching_names(&player);
        }
    })
    .await?;

    // Second pass: consult the guild's cached name->userIDs history for
    // anyone still unlinked. Needs store access, so it runs outside the
    // first closure rather than trying to thread `&Store` through it.
    if let Ok(Some(raw)) = worker.store.hash_get(worker.guild_id, &name).await {
        let uids: Vec<u64> = raw.split(',').filter_map(|s| s.parse().ok()).collect();
        if !uids.is_empty() {
            with_locked_game(worker, |game| {
                if let Some(player) = game.among_us_data.get_by_name(&name).cloned() {
                    game.attempt_pairing_by_user_ids(&player, &uids);
                }
            })
            .await?;
        }
    }

    Ok(())
}

/// Drains any voice patches implied by the current tracked channel's
/// membership, then re-acquires the lock to flip `voice_change_ready`
/// back to `true` for every user whose patch resolved. The dispatch itself
/// runs with no lock held, per the mutual-exclusion model.
async fn reconcile_voice(worker: &Worker, mut game: GameState, priority: Priority) -> crate::error::Result<()> {
    let Some(channel_id) = game.tracking.voice_channel_id else {
        return Ok(());
    };
    let members: Vec<ObservedVoiceState> = worker.voice_source.channel_members(channel_id);

    let queue = voice::plan_patches(&mut game, &worker.settings.voice_rules, game.among_us_data.phase, priority, false, &members);

    if queue.is_empty() {
        return Ok(());
    }

    let request = GameStateRequest::by_connect_code(worker.guild_id, &worker.connect_code);
    let (lock, _) = repo::get_and_lock(&worker.store, &request).await?;
    repo::set(&worker.store, &game, Some(lock)).await?;

    let resolved = voice::drain(worker.pool.clone(), queue).await;

    if !resolved.is_empty() {
        let (lock, mut game) = repo::get_and_lock(&worker.store, &request).await?;
        for user_id in resolved {
            if let Some(user) = game.get_user_mut(user_id) {
                user.voice_change_ready = true;
            }
        }
        repo::set(&worker.store, &game, Some(lock)).await?;
    }

    Ok(())
}

async fn handle_kill(worker: &Worker, reason: KillReason) {
    info!(?reason, "ending game");

    let request = GameStateRequest::by_connect_code(worker.guild_id, &worker.connect_code);
    let (lock, mut game) = match repo::get_and_lock(&worker.store, &request).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to lock game for kill");
            return;
        }
    };

    match reason {
        KillReason::EndAndSave => {
            game.subscribed = false;
            if let Err(e) = worker.store.mark_active(worker.guild_id, &worker.connect_code).await {
                warn!(error = %e, "failed to mark game resumable");
            }
            if let Err(e) = repo::set(&worker.store, &game, Some(lock)).await {
                warn!(error = %e, "failed to persist resumable game");
            }
            tokio::time::sleep(END_AND_SAVE_DRAIN).await;
        }
        KillReason::EndAndWipe => {
            if let Some(channel_id) = game.tracking.voice_channel_id {
                let members = worker.voice_source.channel_members(channel_id);
                let mut revert_queue = PriorityQueue::new();
                for member in &members {
                    if member.mute || member.deaf {
                        revert_queue.push(
                            PatchParams {
                                guild_id: worker.guild_id,
                                user_id: member.user_id,
                                mute: false,
                                deaf: false,
                                nick: None,
                            },
                            0,
                        );
                    }
                }
                if !revert_queue.is_empty() {
                    voice::drain(worker.pool.clone(), revert_queue).await;
                }
            }

            game.tracking.reset();
            if let Err(e) = worker.store.unmark_active(worker.guild_id, &worker.connect_code).await {
                warn!(error = %e, "failed to unmark resumable set");
            }
            if let Err(e) = repo::delete(&worker.store, &game).await {
                warn!(error = %e, "failed to delete game state");
            }
            if let Err(e) = worker.store.release(lock).await {
                warn!(error = %e, "failed to release lock after delete");
            }
        }
    }
}
