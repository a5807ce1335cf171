//! Event Bus (C2): topic-based pub/sub keyed by connect-code, four channels
//! per game plus a connect-handshake ack channel, layered on the
//! [`Store`](crate::store::Store)'s generic publish/subscribe.

pub mod payload;

use crate::error::Result;
use crate::store::{keys, Store};

pub use payload::{LobbyEvent, PlayerAction, PlayerEvent, Region};

/// The four live subscriptions for one game's connect code.
pub struct GameSubscriptions {
    pub connect: crate::store::Subscription,
    pub lobby: crate::store::Subscription,
    pub phase: crate::store::Subscription,
    pub player: crate::store::Subscription,
}

/// Subscribes to all four topics for `connect_code`.
pub async fn subscribe_game(store: &Store, connect_code: &str) -> Result<GameSubscriptions> {
    Ok(GameSubscriptions {
        connect: store.subscribe(&keys::events_connect(connect_code)).await?,
        lobby: store.subscribe(&keys::events_lobby(connect_code)).await?,
        phase: store.subscribe(&keys::events_phase(connect_code)).await?,
        player: store.subscribe(&keys::events_player(connect_code)).await?,
    })
}

/// Publishes the connect-handshake ack so the capture-side producer knows
/// its `connect` event was observed.
pub async fn publish_connect_ack(store: &Store, connect_code: &str) -> Result<()> {
    store
        .publish(&keys::events_connect_ack(connect_code), "true")
        .await
}
