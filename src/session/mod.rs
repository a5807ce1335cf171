//! Session Pool (C3): one primary chat-platform session plus zero or more
//! helper sessions, round-robinned for outbound requests. All rate-limit
//! observation and shard identity lives here; nothing else talks to the
//! chat platform's HTTP surface directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use twilight_http::Client;

/// One authenticated chat-platform connection and the shard it represents.
pub struct Session {
    pub http: Arc<Client>,
    pub shard_id: u64,
    pub num_shards: u64,
}

/// Pool of sessions available for outbound requests. The primary is always
/// present; helpers are additional bot accounts that can issue mute/deafen
/// patches to spread rate-limit pressure across more than one token.
pub struct SessionPool {
    primary: Arc<Session>,
    helpers: Vec<Arc<Session>>,
    next: AtomicUsize,
}

impl SessionPool {
    pub fn new(primary: Session, helpers: Vec<Session>) -> SessionPool {
        SessionPool {
            primary: Arc::new(primary),
            helpers: helpers.into_iter().map(Arc::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// The primary session. Used for anything the bot's own identity must
    /// own: gateway presence, message edits with the bot's own avatar, etc.
    pub fn primary_session(&self) -> Arc<Session> {
        self.primary.clone()
    }

    /// Round-robins among the sessions registered for `guild_id`, falling
    /// back to the primary when there are no helpers. All current helpers
    /// are assumed available for any guild; a future revision could track
    /// per-guild registration if helpers are ever guild-scoped.
    pub fn session_for_request(&self, _guild_id: u64) -> Arc<Session> {
        if self.helpers.is_empty() {
            return self.primary.clone();
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.helpers.len();
        self.helpers[i].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_session(shard_id: u64) -> Session {
        Session {
            http: Arc::new(Client::new(String::new())),
            shard_id,
            num_shards: 1,
        }
    }

    #[test]
    fn falls_back_to_primary_with_no_helpers() {
        let pool = SessionPool::new(fake_session(0), vec![]);
        assert_eq!(pool.session_for_request(1).shard_id, 0);
        assert_eq!(pool.session_for_request(1).shard_id, 0);
    }

    #[test]
    fn round_robins_helpers() {
        let pool = SessionPool::new(fake_session(0), vec![fake_session(1), fake_session(2)]);
        let a = pool.session_for_request(1).shard_id;
        let b = pool.session_for_request(1).shard_id;
        let c = pool.session_for_request(1).shard_id;
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(c, 1);
    }
}
