//! Constants.

use std::time::Duration;

/// Characters used to generate a connect code. `I` and `O` are excluded in
/// favor of `1` and `0` so codes read unambiguously over voice chat.
pub const CONNECT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ0123456789";

/// Length of a generated connect code.
pub const CONNECT_CODE_LEN: usize = 6;

/// TTL applied to `game:<connect>` and pointer keys; matches the maximum
/// lifetime of a single game/capture session.
pub const GAME_STATE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// TTL of a named mutual-exclusion lock on a `GameState`.
pub const LOCK_TTL: Duration = Duration::from_secs(5);

/// Sleep between busy-loop retries of a contended lock.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Delay `EndAndSave` waits after closing subscriptions, giving in-flight
/// patches a chance to land before the process may exit.
pub const END_AND_SAVE_DRAIN: Duration = Duration::from_secs(3);

/// Default command prefix for a guild with no override.
pub const DEFAULT_COMMAND_PREFIX: &str = ".au";

/// Default number of in-game player colors (and matching status emoji).
pub const NUM_COLORS: usize = 12;

/// Default `SERVER_PORT` for the capture-facing HTTP listener.
pub const DEFAULT_PORT: u16 = 8123;

/// Default `SERVER_URL` advertised to captures.
pub const DEFAULT_URL: &str = "localhost";
