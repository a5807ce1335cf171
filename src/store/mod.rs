//! State Store (C1): durable key/value with atomic JSON get/set, secondary
//! pointers, and named mutual-exclusion locks with TTL.
//!
//! Backed by a pooled Redis-compatible connection manager ([`bb8_redis`]);
//! pub/sub uses a dedicated connection per subscription since multiplexed
//! pool connections can't enter subscriber mode.

pub mod keys;

use std::time::Duration;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::constants::LOCK_RETRY_INTERVAL;
use crate::error::{Error, Result};

/// Converts a pool checkout failure into our store error, attributing it to
/// `key` so callers can still log which operation failed.
fn pool_err(key: &str, e: bb8::RunError<redis::RedisError>) -> Error {
    let source = match e {
        bb8::RunError::User(source) => source,
        bb8::RunError::TimedOut => redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out waiting for a pooled connection",
        )),
    };
    Error::store(key, source)
}

/// A held lock on some key; dropping this without calling [`Store::release`]
/// leaks nothing permanently since the lock still carries its own TTL, but
/// callers should always release promptly to let other holders proceed.
pub struct LockHandle {
    key: String,
    token: String,
}

/// A single message delivered on a subscribed topic.
#[derive(Clone, Debug)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

/// A live subscription to one topic, yielding messages as they arrive.
///
/// Pub/sub delivery is at-most-once with best-effort ordering; a lagged or
/// dropped subscriber must re-synchronize from the store rather than assume
/// it saw every message.
pub struct Subscription {
    pubsub: redis::aio::PubSub,
}

impl Subscription {
    /// Waits for the next message on this topic.
    pub async fn next(&mut self) -> Option<Message> {
        use futures_util::StreamExt;
        let msg = self.pubsub.on_message().next().await?;
        let topic = msg.get_channel_name().to_string();
        let payload: String = msg.get_payload().ok()?;
        Some(Message { topic, payload })
    }
}

/// Handle to the backing state store.
#[derive(Clone)]
pub struct Store {
    pool: Pool<RedisConnectionManager>,
    client: redis::Client,
}

impl Store {
    /// Connects to the Redis-compatible backend at `url`.
    pub async fn connect(url: &str) -> Result<Store> {
        let manager = RedisConnectionManager::new(url).map_err(|e| Error::store(url, e))?;
        let pool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| Error::store(url, e))?;
        let client = redis::Client::open(url).map_err(|e| Error::store(url, e))?;
        Ok(Store { pool, client })
    }

    /// Fetches raw bytes for `key`, or `None` if absent.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await.map_err(|e| pool_err(key, e))?;
        conn.get(key).await.map_err(|e| Error::store(key, e))
    }

    /// Sets `key` to `bytes` with the given TTL.
    pub async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| pool_err(key, e))?;
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::store(key, e))
    }

    /// Deletes the given keys. Missing keys are not an error.
    pub async fn del(&self, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await.map_err(|e| pool_err(keys[0], e))?;
        conn.del(keys).await.map_err(|e| Error::store(keys[0], e))
    }

    /// Gets a JSON value and deserializes it.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|e| Error::MalformedPayload {
                    topic: key.to_string(),
                    source: e,
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serializes `value` to JSON and sets it at `key` with the given TTL.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|e| Error::MalformedPayload {
            topic: key.to_string(),
            source: e,
        })?;
        self.set_raw(key, &raw, ttl).await
    }

    /// Resolves a pointer key to the game key it names, or `None`.
    pub async fn resolve_pointer(&self, pointer: &str) -> Result<Option<String>> {
        self.get_raw(pointer).await
    }

    /// Attempts to acquire the named lock, returning [`Error::Contended`]
    /// immediately if it is already held. Succeeds by writing a unique
    /// token with `NX` semantics so only the holder that set it can later
    /// release it.
    pub async fn acquire(&self, lock_key: &str, ttl: Duration) -> Result<LockHandle> {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(char::from)
            .collect();

        let mut conn = self.pool.get().await.map_err(|e| pool_err(lock_key, e))?;

        let acquired: Option<String> = redis::cmd("SET")
            .arg(lock_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::store(lock_key, e))?;

        if acquired.is_some() {
            Ok(LockHandle {
                key: lock_key.to_string(),
                token,
            })
        } else {
            Err(Error::Contended(lock_key.to_string()))
        }
    }

    /// Busy-loops [`Store::acquire`] until it succeeds, sleeping
    /// [`LOCK_RETRY_INTERVAL`] between attempts. The lock's short TTL makes
    /// a crashed holder self-healing, so no backoff beyond the fixed
    /// interval is needed at this scale.
    pub async fn acquire_spin(&self, lock_key: &str, ttl: Duration) -> LockHandle {
        loop {
            match self.acquire(lock_key, ttl).await {
                Ok(handle) => return handle,
                Err(_) => tokio::time::sleep(LOCK_RETRY_INTERVAL).await,
            }
        }
    }

    /// Releases a held lock, verifying the caller still owns it (the token
    /// matches) before deleting so a lock that already expired and was
    /// re-acquired by someone else isn't stolen out from under them.
    pub async fn release(&self, handle: LockHandle) -> Result<()> {
        const RELEASE_SCRIPT: &str = r#"
            if redis.call("get", KEYS[1]) == ARGV[1] then
                return redis.call("del", KEYS[1])
            else
                return 0
            end
        "#;

        let mut conn = self.pool.get().await.map_err(|e| pool_err(&handle.key, e))?;

        redis::Script::new(RELEASE_SCRIPT)
            .key(&handle.key)
            .arg(&handle.token)
            .invoke_async::<_, i32>(&mut *conn)
            .await
            .map(|_| ())
            .map_err(|e| Error::store(&handle.key, e))
    }

    /// Publishes `message` to `topic`.
    pub async fn publish(&self, topic: &str, message: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| pool_err(topic, e))?;
        conn.publish(topic, message)
            .await
            .map_err(|e| Error::store(topic, e))
    }

    /// Subscribes to `topic` on a dedicated connection.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| Error::store(topic, e))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| Error::store(topic, e))?;
        Ok(Subscription { pubsub })
    }

    /// Adds `connect_code` to the resumable set for `guild_id`.
    pub async fn mark_active(&self, guild_id: u64, connect_code: &str) -> Result<()> {
        let key = keys::active_set(guild_id);
        let mut conn = self.pool.get().await.map_err(|e| pool_err(&key, e))?;
        conn.sadd(&key, connect_code)
            .await
            .map_err(|e| Error::store(&key, e))
    }

    /// Removes `connect_code` from the resumable set for `guild_id`.
    pub async fn unmark_active(&self, guild_id: u64, connect_code: &str) -> Result<()> {
        let key = keys::active_set(guild_id);
        let mut conn = self.pool.get().await.map_err(|e| pool_err(&key, e))?;
        conn.srem(&key, connect_code)
            .await
            .map_err(|e| Error::store(&key, e))
    }

    /// Lists the resumable connect-codes for `guild_id` (crash recovery).
    pub async fn active_codes(&self, guild_id: u64) -> Result<Vec<String>> {
        let key = keys::active_set(guild_id);
        let mut conn = self.pool.get().await.map_err(|e| pool_err(&key, e))?;
        conn.smembers(&key).await.map_err(|e| Error::store(&key, e))
    }

    /// Reads one field of the guild's username/userID link hash.
    pub async fn hash_get(&self, guild_id: u64, field: &str) -> Result<Option<String>> {
        let key = keys::cache_hash(guild_id);
        let mut conn = self.pool.get().await.map_err(|e| pool_err(&key, e))?;
        conn.hget(&key, field).await.map_err(|e| Error::store(&key, e))
    }

    /// Writes one field of the guild's username/userID link hash.
    pub async fn hash_set(&self, guild_id: u64, field: &str, value: &str) -> Result<()> {
        let key = keys::cache_hash(guild_id);
        let mut conn = self.pool.get().await.map_err(|e| pool_err(&key, e))?;
        conn.hset(&key, field, value)
            .await
            .map_err(|e| Error::store(&key, e))
    }

    /// Deletes one field of the guild's username/userID link hash.
    pub async fn hash_del(&self, guild_id: u64, field: &str) -> Result<()> {
        let key = keys::cache_hash(guild_id);
        let mut conn = self.pool.get().await.map_err(|e| pool_err(&key, e))?;
        conn.hdel(&key, field).await.map_err(|e| Error::store(&key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn lock_key_derives_from_game_key() {
        let game = keys::game("AB12CD");
        assert_eq!(keys::lock(&game), format!("{game}:lock"));
    }
}
