//! AutoMuteUs-style chat-bot control plane: couples an external Among Us
//! game-capture client to a Discord-like voice-chat platform, muting and
//! deafening tracked players as the game moves between lobby, tasks, and
//! discussion.

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod game;
pub mod lifecycle;
pub mod reaper;
pub mod router;
pub mod session;
pub mod status;
pub mod store;
pub mod voice;
pub mod worker;
