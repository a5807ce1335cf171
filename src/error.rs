//! Crate-wide error taxonomy.
//!
//! Every fallible path in the crate returns [`Error`]; handler code matches
//! on the variants below to apply the retry/surface/drop policy described
//! in the coordination subsystem's error handling design.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// How a chat-platform REST failure should be treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatPlatformErrorKind {
    /// 403-class: missing permission, role hierarchy, etc. Surfaced once,
    /// then the operation is marked unsupported for the guild.
    Forbidden,
    /// 429: rate limited. The session pool should already prevent most of
    /// these; treated the same as `Transient` if one slips through.
    RateLimited,
    /// 5xx or a connection failure. Retried once in-function.
    Transient,
    /// Anything else (4xx we don't special-case, decode failures, etc).
    Other,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The state store (Redis-compatible backend) failed on `key`.
    #[error("state store error on key {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: redis::RedisError,
    },

    /// A named lock was held by another holder; caller should retry.
    #[error("lock contended: {0}")]
    Contended(String),

    /// The chat platform rejected or failed a request.
    #[error("chat platform error ({kind:?}): {source}")]
    ChatPlatform {
        kind: ChatPlatformErrorKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An event payload on a bus topic could not be decoded.
    #[error("malformed payload on topic {topic}: {source}")]
    MalformedPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// The caller lacks permission to perform the requested action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The requested resource (game, pointer, user) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Startup configuration was missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Convenience constructor for a store error, capturing the offending
    /// key for structured logging.
    pub fn store(key: impl Into<String>, source: redis::RedisError) -> Error {
        Error::Store {
            key: key.into(),
            source,
        }
    }

    /// Classifies a chat-platform HTTP error by its response status so the
    /// §7 error policy (retry transient, surface-once forbidden, etc.) can
    /// be applied uniformly.
    pub fn from_twilight(source: twilight_http::Error) -> Error {
        let kind = match source.kind() {
            twilight_http::error::ErrorType::Response { status, .. } => {
                let code = status.get();
                if code == 403 {
                    ChatPlatformErrorKind::Forbidden
                } else if code == 429 {
                    ChatPlatformErrorKind::RateLimited
                } else if code >= 500 {
                    ChatPlatformErrorKind::Transient
                } else {
                    ChatPlatformErrorKind::Other
                }
            }
            twilight_http::error::ErrorType::ServiceUnavailable { .. } => {
                ChatPlatformErrorKind::Transient
            }
            _ => ChatPlatformErrorKind::Other,
        };

        Error::ChatPlatform {
            kind,
            source: Box::new(source),
        }
    }

    /// True if this error should be retried once by the caller before
    /// giving up.
    pub fn is_transient_chat_platform(&self) -> bool {
        matches!(
            self,
            Error::ChatPlatform {
                kind: ChatPlatformErrorKind::Transient | ChatPlatformErrorKind::RateLimited,
                ..
            }
        )
    }

    /// True if this is a permission-shaped chat-platform failure (forbidden
    /// or an explicit permission error).
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            Error::ChatPlatform {
                kind: ChatPlatformErrorKind::Forbidden,
                ..
            }
        ) || matches!(self, Error::PermissionDenied(_))
    }
}
