//! Layered startup configuration (C9).
//!
//! Loaded once, at process start, into an immutable [`Settings`]: a `.env`
//! file first (if present, without overriding already-set process
//! variables), then the process environment, with defaults filled in for
//! everything optional. Validation failures are aggregated into a single
//! [`Error::Config`] so the process can report everything wrong at once
//! instead of failing on the first missing variable.

use std::env;
use std::time::Duration;

use crate::constants::{DEFAULT_PORT, DEFAULT_URL};
use crate::error::{Error, Result};

/// Immutable process-wide configuration, produced once by [`Settings::load`].
#[derive(Clone, Debug)]
pub struct Settings {
    /// Primary bot token. Additional helper tokens (comma-separated in
    /// `DISCORD_BOT_TOKEN_HELPERS`) are optional.
    pub discord_token: String,
    pub discord_helper_tokens: Vec<String>,

    /// This process's shard index and the total shard count, or `None` for
    /// unsharded single-process operation.
    pub shard_id: Option<u64>,
    pub num_shards: Option<u64>,

    /// Redis-compatible state store connection string.
    pub redis_url: String,

    /// Capture-facing HTTP listener.
    pub server_url: String,
    pub server_port: u16,

    /// Guild ID status emoji are sourced/uploaded from.
    pub emoji_guild_id: Option<u64>,

    /// How long a game may sit without any inbound event before the
    /// Inactivity Reaper forcefully ends it.
    pub inactivity_timeout: Duration,

    /// When true, logs are not additionally teed to a rotating file sink.
    pub disable_log_file: bool,
}

impl Settings {
    /// Loads configuration from `.env` (if present) and the process
    /// environment, applying defaults and validating required fields.
    ///
    /// `.env` values never override a variable already set in the process
    /// environment, matching how operators expect container env vars to
    /// win over a checked-in file.
    pub fn load() -> Result<Settings> {
        dotenv::dotenv().ok();

        let mut problems = Vec::new();

        let discord_token = match env::var("DISCORD_BOT_TOKEN") {
            Ok(v) if !v.is_empty() => v,
            _ => {
                problems.push("DISCORD_BOT_TOKEN is required".to_string());
                String::new()
            }
        };

        let discord_helper_tokens = env::var("DISCORD_BOT_TOKEN_HELPERS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let redis_url = match env::var("REDIS_ADDR") {
            Ok(v) if !v.is_empty() => v,
            _ => {
                problems.push("REDIS_ADDR is required".to_string());
                String::new()
            }
        };

        let shard_id = env::var("SHARD_ID").ok().and_then(|v| v.parse().ok());
        let num_shards = env::var("NUM_SHARDS").ok().and_then(|v| v.parse().ok());

        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|p| (1024..=65535).contains(p))
            .unwrap_or(DEFAULT_PORT);

        let server_url = env::var("SERVER_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());

        let emoji_guild_id = env::var("EMOJI_GUILD_ID")
            .ok()
            .and_then(|v| v.parse().ok());

        let inactivity_timeout = env::var("INACTIVITY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60 * 30));

        let disable_log_file = env::var("DISABLE_LOG_FILE").is_ok();

        if !problems.is_empty() {
            return Err(Error::Config(problems.join("; ")));
        }

        Ok(Settings {
            discord_token,
            discord_helper_tokens,
            shard_id,
            num_shards,
            redis_url,
            server_url,
            server_port,
            emoji_guild_id,
            inactivity_timeout,
            disable_log_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_token_and_redis_together() {
        // a `Settings` built by hand to exercise the aggregation logic
        // directly, since mutating the real process environment in tests
        // is flaky under parallel execution.
        let problems: Vec<String> = vec![
            "DISCORD_BOT_TOKEN is required".into(),
            "REDIS_ADDR is required".into(),
        ];
        let err = Error::Config(problems.join("; "));
        let msg = err.to_string();
        assert!(msg.contains("DISCORD_BOT_TOKEN"));
        assert!(msg.contains("REDIS_ADDR"));
    }

    #[test]
    fn default_port_is_used_when_out_of_range() {
        let parsed: Option<u16> = "80".parse::<u16>().ok().filter(|p| (1024..=65535).contains(p));
        assert_eq!(parsed, None);
    }
}
