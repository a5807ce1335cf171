//! Per-guild settings: voice rules matrix, phase-transition delays, and the
//! handful of knobs the Guild Router and Game State Machine read. Long-term
//! persistence of these lives in the external settings store (out of
//! scope); this module only defines the shape and the defaults, plus the
//! pure lookup functions C4/C5 apply against it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_COMMAND_PREFIX;
use crate::game::phase::Phase;

/// Effective mute/deafen for one `(phase, tracked, alive)` triple.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct VoiceState {
    pub mute: bool,
    pub deaf: bool,
}

/// The full mute/deafen rules matrix, overridable per guild. Keys are
/// `(phase, tracked, alive)`; defaults come from [`VoiceRules::default`]
/// and mirror the table in the external interfaces section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoiceRules {
    rules: HashMap<(PhaseKey, bool, bool), VoiceState>,
}

/// `Phase` isn't `Hash`/`Eq` friendly for direct map keys without also
/// deriving them there for wire reasons, so the rules matrix keys on this
/// small mirror instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseKey {
    Lobby,
    Tasks,
    Discuss,
}

impl From<Phase> for PhaseKey {
    fn from(p: Phase) -> PhaseKey {
        match p {
            Phase::Lobby => PhaseKey::Lobby,
            Phase::Tasks => PhaseKey::Tasks,
            Phase::Discuss => PhaseKey::Discuss,
            // Menu and GameOver never reach the voice dispatcher with a
            // meaningful tracked/alive lookup; callers short-circuit those
            // phases to `(false, false)` before consulting the matrix.
            Phase::Menu | Phase::GameOver => PhaseKey::Lobby,
        }
    }
}

impl VoiceRules {
    /// The default rules matrix, matching the external interfaces table.
    /// `unmute_dead_during_tasks` only affects status-message visibility
    /// (the aliveness-leak rule), never this matrix.
    pub fn default_rules() -> VoiceRules {
        let mut rules = HashMap::new();
        rules.insert((PhaseKey::Lobby, true, true), VoiceState { mute: false, deaf: false });
        rules.insert((PhaseKey::Lobby, true, false), VoiceState { mute: false, deaf: false });
        rules.insert((PhaseKey::Lobby, false, true), VoiceState { mute: false, deaf: false });
        rules.insert((PhaseKey::Lobby, false, false), VoiceState { mute: false, deaf: false });

        rules.insert((PhaseKey::Tasks, true, true), VoiceState { mute: true, deaf: true });
        rules.insert((PhaseKey::Tasks, true, false), VoiceState { mute: false, deaf: false });
        rules.insert((PhaseKey::Tasks, false, true), VoiceState { mute: false, deaf: false });
        rules.insert((PhaseKey::Tasks, false, false), VoiceState { mute: false, deaf: false });

        rules.insert((PhaseKey::Discuss, true, true), VoiceState { mute: false, deaf: false });
        rules.insert((PhaseKey::Discuss, true, false), VoiceState { mute: true, deaf: false });
        rules.insert((PhaseKey::Discuss, false, true), VoiceState { mute: false, deaf: false });
        rules.insert((PhaseKey::Discuss, false, false), VoiceState { mute: false, deaf: false });

        VoiceRules { rules }
    }

    /// Looks up the effective voice state for a tracked/untracked,
    /// alive/dead participant in `phase`. `Menu` and `GameOver` are always
    /// unmuted/undeafened — nobody is in active play or discussion.
    pub fn voice_state(&self, phase: Phase, tracked: bool, alive: bool) -> VoiceState {
        match phase {
            Phase::Menu | Phase::GameOver => VoiceState::default(),
            _ => {
                let key = (PhaseKey::from(phase), tracked, alive);
                self.rules.get(&key).copied().unwrap_or_default()
            }
        }
    }

    pub fn set(&mut self, phase: PhaseKey, tracked: bool, alive: bool, state: VoiceState) {
        self.rules.insert((phase, tracked, alive), state);
    }
}

impl Default for VoiceRules {
    fn default() -> VoiceRules {
        VoiceRules::default_rules()
    }
}

/// Per-transition delay (seconds) the dispatcher sleeps before draining its
/// priority queue, keyed by `(from, to)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameDelays {
    delays: HashMap<(PhaseKey, PhaseKey), u32>,
}

impl GameDelays {
    pub fn default_delays() -> GameDelays {
        let mut delays = HashMap::new();
        delays.insert((PhaseKey::Lobby, PhaseKey::Tasks), 0);
        delays.insert((PhaseKey::Discuss, PhaseKey::Tasks), 0);
        delays.insert((PhaseKey::Tasks, PhaseKey::Discuss), 0);
        GameDelays { delays }
    }

    /// Delay in seconds for a `from -> to` transition; phases not
    /// represented in the table (anything touching `Menu` or `GameOver`)
    /// have no configured delay.
    pub fn get(&self, from: Phase, to: Phase) -> u32 {
        match (PhaseKey::try_from(from), PhaseKey::try_from(to)) {
            (Some(from), Some(to)) => self.delays.get(&(from, to)).copied().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn set(&mut self, from: PhaseKey, to: PhaseKey, seconds: u32) {
        self.delays.insert((from, to), seconds);
    }
}

impl Default for GameDelays {
    fn default() -> GameDelays {
        GameDelays::default_delays()
    }
}

impl TryFrom<Phase> for PhaseKey {
    type Error = ();

    fn try_from(p: Phase) -> Result<PhaseKey, ()> {
        match p {
            Phase::Lobby => Ok(PhaseKey::Lobby),
            Phase::Tasks => Ok(PhaseKey::Tasks),
            Phase::Discuss => Ok(PhaseKey::Discuss),
            Phase::Menu | Phase::GameOver => Err(()),
        }
    }
}

/// Per-guild settings. The external settings store (out of scope) is the
/// source of truth; this struct is what it hands back, and what the Guild
/// Router and Game State Machine read through.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuildSettings {
    pub command_prefix: String,
    pub language: String,
    pub admin_user_ids: Vec<u64>,
    pub permission_role_ids: Vec<u64>,
    pub delays: GameDelays,
    pub voice_rules: VoiceRules,
    pub unmute_dead_during_tasks: bool,
    pub delete_game_summary_minutes: i32,
    pub auto_refresh: bool,
    pub map_version: String,
}

impl GuildSettings {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

impl Default for GuildSettings {
    fn default() -> GuildSettings {
        GuildSettings {
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            language: "en".to_string(),
            admin_user_ids: Vec::new(),
            permission_role_ids: Vec::new(),
            delays: GameDelays::default_delays(),
            voice_rules: VoiceRules::default_rules(),
            unmute_dead_during_tasks: false,
            delete_game_summary_minutes: 0,
            auto_refresh: false,
            map_version: "simple".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_alive_tracked_is_muted_and_deafened() {
        let rules = VoiceRules::default_rules();
        let vs = rules.voice_state(Phase::Tasks, true, true);
        assert!(vs.mute && vs.deaf);
    }

    #[test]
    fn tasks_untracked_is_never_muted() {
        let rules = VoiceRules::default_rules();
        let vs = rules.voice_state(Phase::Tasks, false, true);
        assert!(!vs.mute && !vs.deaf);
    }

    #[test]
    fn discuss_dead_tracked_is_muted_not_deafened() {
        let rules = VoiceRules::default_rules();
        let vs = rules.voice_state(Phase::Discuss, true, false);
        assert!(vs.mute);
        assert!(!vs.deaf);
    }

    #[test]
    fn menu_and_gameover_are_always_silent_of_constraints() {
        let rules = VoiceRules::default_rules();
        assert!(!rules.voice_state(Phase::Menu, true, true).mute);
        assert!(!rules.voice_state(Phase::GameOver, true, false).mute);
    }

    #[test]
    fn default_delays_are_zero() {
        let delays = GameDelays::default_delays();
        assert_eq!(delays.get(Phase::Lobby, Phase::Tasks), 0);
    }
}
