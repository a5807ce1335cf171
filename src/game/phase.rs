//! Game phases and the idempotent transition table (C4).

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Discrete game state as reported by the capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum Phase {
    Menu = 0,
    Lobby = 1,
    Tasks = 2,
    Discuss = 3,
    GameOver = 4,
}

impl Phase {
    /// Parses the integer-as-text wire representation used on
    /// `events:phase`.
    pub fn from_wire(raw: &str) -> Option<Phase> {
        match raw.trim().parse::<i32>().ok()? {
            0 => Some(Phase::Menu),
            1 => Some(Phase::Lobby),
            2 => Some(Phase::Tasks),
            3 => Some(Phase::Discuss),
            4 => Some(Phase::GameOver),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Menu => "MENU",
            Phase::Lobby => "LOBBY",
            Phase::Tasks => "TASKS",
            Phase::Discuss => "DISCUSS",
            Phase::GameOver => "GAMEOVER",
        }
    }
}

impl Default for Phase {
    fn default() -> Phase {
        Phase::Menu
    }
}

/// Priority class used by the Voice Dispatcher (C5) to order a batch of
/// patches so dead/alive speech never overlaps observably.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    None,
    Alive,
    Dead,
}

/// The dispatcher action implied by a phase transition: what priority to
/// batch with, keyed by the `(from, to)` pair so [`transition_action`] can
/// look up delay and priority together.
#[derive(Clone, Copy, Debug)]
pub struct TransitionAction {
    pub priority: Priority,
    /// Whether entering this phase resets all players to alive.
    pub resets_alive: bool,
    /// Whether entering this phase (re)adds color reactions to the status
    /// message.
    pub adds_reactions: bool,
    /// Whether entering this phase removes all reactions.
    pub removes_reactions: bool,
}

/// Looks up the dispatcher action for a `from -> to` phase transition, per
/// the table in the Game State Machine component design.
pub fn transition_action(from: Phase, to: Phase) -> TransitionAction {
    use Phase::*;
    match (from, to) {
        (_, Menu) => TransitionAction {
            priority: Priority::None,
            resets_alive: false,
            adds_reactions: false,
            removes_reactions: true,
        },
        (_, Lobby) => TransitionAction {
            priority: Priority::None,
            resets_alive: true,
            adds_reactions: true,
            removes_reactions: false,
        },
        (Discuss, Tasks) => TransitionAction {
            priority: Priority::Alive,
            resets_alive: false,
            adds_reactions: false,
            removes_reactions: false,
        },
        (_, Tasks) => TransitionAction {
            priority: Priority::None,
            resets_alive: false,
            adds_reactions: false,
            removes_reactions: false,
        },
        (Tasks, Discuss) => TransitionAction {
            priority: Priority::Dead,
            resets_alive: false,
            adds_reactions: false,
            removes_reactions: false,
        },
        (_, Discuss) => TransitionAction {
            priority: Priority::None,
            resets_alive: false,
            adds_reactions: false,
            removes_reactions: false,
        },
        (_, GameOver) => TransitionAction {
            priority: Priority::None,
            resets_alive: false,
            adds_reactions: false,
            removes_reactions: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        assert_eq!(Phase::from_wire("2"), Some(Phase::Tasks));
        assert_eq!(Phase::from_wire(" 4 \n"), Some(Phase::GameOver));
        assert_eq!(Phase::from_wire("not a number"), None);
    }

    #[test]
    fn discuss_to_tasks_mutes_alive_first() {
        let action = transition_action(Phase::Discuss, Phase::Tasks);
        assert_eq!(action.priority, Priority::Alive);
    }

    #[test]
    fn tasks_to_discuss_mutes_dead_first() {
        let action = transition_action(Phase::Tasks, Phase::Discuss);
        assert_eq!(action.priority, Priority::Dead);
    }

    #[test]
    fn lobby_to_tasks_has_no_priority() {
        let action = transition_action(Phase::Lobby, Phase::Tasks);
        assert_eq!(action.priority, Priority::None);
    }

    #[test]
    fn entering_lobby_resets_alive_and_adds_reactions() {
        let action = transition_action(Phase::GameOver, Phase::Lobby);
        assert!(action.resets_alive);
        assert!(action.adds_reactions);
    }
}
