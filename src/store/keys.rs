//! Key namespacing for the state store (C1).
//!
//! Every key the crate touches is generated here so the `automuteus:`
//! namespace and the pointer/hash/active conventions stay in one place.

/// `automuteus:game:<connect>` — the canonical `GameState` record.
pub fn game(connect_code: &str) -> String {
    format!("automuteus:game:{connect_code}")
}

/// `automuteus:discord:<guild>:pointer:text:<channel>`
pub fn pointer_text(guild_id: u64, channel_id: u64) -> String {
    format!("automuteus:discord:{guild_id}:pointer:text:{channel_id}")
}

/// `automuteus:discord:<guild>:pointer:voice:<channel>`
pub fn pointer_voice(guild_id: u64, channel_id: u64) -> String {
    format!("automuteus:discord:{guild_id}:pointer:voice:{channel_id}")
}

/// `automuteus:discord:<guild>:pointer:code:<connect>`
pub fn pointer_code(guild_id: u64, connect_code: &str) -> String {
    format!("automuteus:discord:{guild_id}:pointer:code:{connect_code}")
}

/// `automuteus:discord:<guild>:cache` — the username/userID link hash.
pub fn cache_hash(guild_id: u64) -> String {
    format!("automuteus:discord:{guild_id}:cache")
}

/// `automuteus:active:<guild>` — set of resumable connect-codes.
pub fn active_set(guild_id: u64) -> String {
    format!("automuteus:active:{guild_id}")
}

/// `<game key>:lock` — the named mutual-exclusion lock for a game.
pub fn lock(game_key: &str) -> String {
    format!("{game_key}:lock")
}

/// `events:<connect>:connect`
pub fn events_connect(connect_code: &str) -> String {
    format!("automuteus:game:{connect_code}:events:connect")
}

/// `events:<connect>:connect:ack`
pub fn events_connect_ack(connect_code: &str) -> String {
    format!("automuteus:game:{connect_code}:events:connect:ack")
}

/// `events:<connect>:lobby`
pub fn events_lobby(connect_code: &str) -> String {
    format!("automuteus:game:{connect_code}:events:lobby")
}

/// `events:<connect>:phase`
pub fn events_phase(connect_code: &str) -> String {
    format!("automuteus:game:{connect_code}:events:phase")
}

/// `events:<connect>:player`
pub fn events_player(connect_code: &str) -> String {
    format!("automuteus:game:{connect_code}:events:player")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(game("AB12CD"), "automuteus:game:AB12CD");
        assert_eq!(
            pointer_text(1, 2),
            "automuteus:discord:1:pointer:text:2"
        );
        assert_eq!(lock(&game("AB12CD")), "automuteus:game:AB12CD:lock");
    }
}
