//! Voice Dispatcher (C5): translates `(phase, aliveness, tracked, policy)`
//! into target mute/deafen, batches the resulting patches into a
//! priority-ordered queue, and issues them through the Session Pool.

use std::sync::Arc;

use priority_queue::PriorityQueue;
use tracing::{info, warn};

use crate::error::{ChatPlatformErrorKind, Error};
use crate::game::{GameState, Phase, Priority, VoiceRules};
use crate::session::SessionPool;

/// One observed voice participant, sourced from the chat platform's cache.
/// Kept independent of the concrete cache type so the dispatcher's
/// batching/priority logic can be unit tested without a live gateway
/// connection.
#[derive(Clone, Debug)]
pub struct ObservedVoiceState {
    pub user_id: u64,
    pub channel_id: Option<u64>,
    pub mute: bool,
    pub deaf: bool,
}

/// Supplies the dispatcher with the guild voice states it needs to
/// reconcile. Implemented against the real chat-platform cache in the
/// guild router; a fake implementation backs the unit tests below.
pub trait VoiceStateSource {
    fn channel_members(&self, channel_id: u64) -> Vec<ObservedVoiceState>;
}

/// A single desired mute/deafen/nickname patch for one user.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PatchParams {
    pub guild_id: u64,
    pub user_id: u64,
    pub mute: bool,
    pub deaf: bool,
    pub nick: Option<String>,
}

/// Ranks a patch within a dispatch batch. Only the class matching the
/// batch's priority (alive players when muting discuss-to-tasks, dead
/// players when unmuting tasks-to-discuss) is bumped ahead of the rest;
/// everything else shares rank 0 and waits for the priority group to land
/// first.
fn patch_rank(batch_priority: Priority, is_alive: bool) -> u8 {
    match (batch_priority, is_alive) {
        (Priority::Alive, true) => 1,
        (Priority::Dead, false) => 1,
        _ => 0,
    }
}

/// Computes the set of patches required to bring `game`'s tracked voice
/// channel in line with `phase`, without issuing any of them. Pure with
/// respect to the chat platform; the only side effect is flipping
/// `voice_change_ready` to `false` for every user enqueued, which the
/// caller must persist (under the game lock) before patches are dispatched,
/// so a second reconciliation pass can't double-enqueue the same user.
pub fn plan_patches(
    game: &mut GameState,
    voice_rules: &VoiceRules,
    phase: Phase,
    batch_priority: Priority,
    apply_nicknames: bool,
    members: &[ObservedVoiceState],
) -> PriorityQueue<PatchParams, u8> {
    let mut queue = PriorityQueue::new();

    for member in members {
        let in_game_name = match game.get_user(member.user_id).and_then(|u| u.in_game_name.clone()) {
            Some(name) => name,
            None => continue,
        };
        let player = match game.among_us_data.get_by_name(&in_game_name) {
            Some(p) => p.clone(),
            None => continue,
        };

        let tracked = game.is_tracked(member.user_id, member.channel_id);
        let voice_state = voice_rules.voice_state(phase, tracked, player.is_alive);

        let needs_patch = voice_state.mute != member.mute || voice_state.deaf != member.deaf;
        if !needs_patch {
            continue;
        }

        let ready = game
            .get_user(member.user_id)
            .map(|u| u.voice_change_ready)
            .unwrap_or(true);
        if !ready {
            info!(user_id = member.user_id, "skipping patch, previous one still in flight");
            continue;
        }

        let nick = if apply_nicknames { Some(in_game_name.clone()) } else { None };
        let rank = patch_rank(batch_priority, player.is_alive);

        queue.push(
            PatchParams {
                guild_id: game.guild_id,
                user_id: member.user_id,
                mute: voice_state.mute,
                deaf: voice_state.deaf,
                nick,
            },
            rank,
        );

        if let Some(user) = game.get_user_mut(member.user_id) {
            user.voice_change_ready = false;
            user.should_mute = voice_state.mute;
            user.should_deaf = voice_state.deaf;
        }
    }

    queue
}

/// Issues one patch via the session pool, retrying mute/deafen-only if the
/// nickname change is forbidden (guild owner, role hierarchy), and retrying
/// once more on a transient failure.
async fn issue_patch(pool: &SessionPool, patch: &PatchParams) -> Result<(), Error> {
    let session = pool.session_for_request(patch.guild_id);
    let guild_id = twilight_model::id::Id::new(patch.guild_id);
    let user_id = twilight_model::id::Id::new(patch.user_id);

    let send = |nick: Option<&str>| {
        let http = session.http.clone();
        async move {
            http.update_guild_member(guild_id, user_id)
                .mute(patch.mute)
                .deafen(patch.deaf)
                .nick(nick)
                .map_err(|e| Error::ChatPlatform {
                    kind: ChatPlatformErrorKind::Other,
                    source: Box::new(e),
                })?
                .await
                .map(|_| ())
                .map_err(Error::from_twilight)
        }
    };

    match send(patch.nick.as_deref()).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_forbidden() && patch.nick.is_some() => {
            warn!(user_id = patch.user_id, "nickname patch forbidden, retrying mute/deafen only");
            send(None).await
        }
        Err(err) if err.is_transient_chat_platform() => {
            warn!(user_id = patch.user_id, error = %err, "transient patch failure, retrying once");
            send(patch.nick.as_deref()).await
        }
        Err(err) => Err(err),
    }
}

/// Drains a priority queue of patches, preserving the ordering guarantee:
/// all rank-1 (higher priority) patches are dispatched concurrently first,
/// and every rank-0 patch that follows one waits for that whole batch to
/// land before it is even issued. This is what prevents an observable
/// cross-talk window when switching between tasks and discussion.
///
/// Returns every user id whose patch resolved, successfully or not, so the
/// caller can re-acquire the game lock and flip `voice_change_ready` back
/// to `true` for exactly those users — never from inside this function,
/// which runs with no lock held.
pub async fn drain(pool: Arc<SessionPool>, mut queue: PriorityQueue<PatchParams, u8>) -> Vec<u64> {
    info!(len = queue.len(), "draining voice patch queue");

    let mut pending = Vec::new();
    let mut resolved = Vec::new();
    let mut waiting_for_higher_priority = false;

    while let Some((patch, rank)) = queue.pop() {
        if rank > 0 {
            waiting_for_higher_priority = true;
        } else if waiting_for_higher_priority {
            resolved.extend(join_all(&mut pending).await);
            waiting_for_higher_priority = false;
        }

        let pool = pool.clone();
        let user_id = patch.user_id;
        pending.push(tokio::spawn(async move {
            if let Err(e) = issue_patch(&pool, &patch).await {
                warn!(error = %e, user_id, "voice patch failed");
            }
            user_id
        }));
    }

    resolved.extend(join_all(&mut pending).await);
    resolved
}

async fn join_all(pending: &mut Vec<tokio::task::JoinHandle<u64>>) -> Vec<u64> {
    let mut done = Vec::with_capacity(pending.len());
    for handle in pending.drain(..) {
        if let Ok(user_id) = handle.await {
            done.push(user_id);
        }
    }
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{PlayerData, UserData};

    fn game_with_player(alive: bool) -> GameState {
        let mut game = GameState::new(1);
        game.tracking.voice_channel_id = Some(42);
        game.among_us_data.players.insert(
            "Red".into(),
            PlayerData { name: "Red".into(), color: 0, is_alive: alive, role: 0, disconnected: false },
        );
        game.user_data.insert(
            7,
            UserData {
                nickname: "nick".into(),
                in_game_name: Some("Red".into()),
                voice_change_ready: true,
                should_mute: false,
                should_deaf: false,
            },
        );
        game
    }

    #[test]
    fn plans_mute_for_tracked_alive_in_tasks() {
        let mut game = game_with_player(true);
        let rules = VoiceRules::default_rules();
        let members = vec![ObservedVoiceState { user_id: 7, channel_id: Some(42), mute: false, deaf: false }];
        let mut queue = plan_patches(&mut game, &rules, Phase::Tasks, Priority::None, false, &members);
        let (patch, _) = queue.pop().unwrap();
        assert!(patch.mute && patch.deaf);
        assert!(!game.get_user(7).unwrap().voice_change_ready);
    }

    #[test]
    fn skips_patch_when_already_in_flight() {
        let mut game = game_with_player(true);
        game.get_user_mut(7).unwrap().voice_change_ready = false;
        let rules = VoiceRules::default_rules();
        let members = vec![ObservedVoiceState { user_id: 7, channel_id: Some(42), mute: false, deaf: false }];
        let queue = plan_patches(&mut game, &rules, Phase::Tasks, Priority::None, false, &members);
        assert!(queue.is_empty());
    }

    #[test]
    fn no_op_when_already_in_desired_state() {
        let mut game = game_with_player(true);
        let rules = VoiceRules::default_rules();
        let members = vec![ObservedVoiceState { user_id: 7, channel_id: Some(42), mute: true, deaf: true }];
        let queue = plan_patches(&mut game, &rules, Phase::Tasks, Priority::None, false, &members);
        assert!(queue.is_empty());
    }

    #[test]
    fn discuss_to_tasks_ranks_alive_players_first() {
        let mut alive = game_with_player(true);
        let rules = VoiceRules::default_rules();
        let members = vec![ObservedVoiceState { user_id: 7, channel_id: Some(42), mute: false, deaf: false }];
        let mut queue = plan_patches(&mut alive, &rules, Phase::Tasks, Priority::Alive, false, &members);
        let (_, rank) = queue.pop().unwrap();
        assert_eq!(rank, 1);
    }

    #[test]
    fn tasks_to_discuss_ranks_dead_players_first() {
        let mut dead = game_with_player(false);
        let rules = VoiceRules::default_rules();
        let members = vec![ObservedVoiceState { user_id: 7, channel_id: Some(42), mute: false, deaf: false }];
        let mut queue = plan_patches(&mut dead, &rules, Phase::Discuss, Priority::Dead, false, &members);
        let (_, rank) = queue.pop().unwrap();
        assert_eq!(rank, 1);
    }

    #[test]
    fn untracked_member_is_unmuted_even_if_dead() {
        let mut game = game_with_player(false);
        game.tracking.voice_channel_id = Some(999); // member below is in a different channel
        let rules = VoiceRules::default_rules();
        let members = vec![ObservedVoiceState { user_id: 7, channel_id: Some(42), mute: true, deaf: true }];
        let mut queue = plan_patches(&mut game, &rules, Phase::Tasks, Priority::None, false, &members);
        let (patch, _) = queue.pop().unwrap();
        assert!(!patch.mute && !patch.deaf);
    }
}
