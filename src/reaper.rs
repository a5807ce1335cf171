//! Inactivity Reaper (C8): one timer per active game, reset on every
//! inbound event; on expiry, the game is force-ended with `EndAndWipe`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::worker::KillReason;

/// Whatever can force-end a game by connect code. Implemented by the
/// Guild Router; kept as a trait so the reaper doesn't need to depend on
/// the router's concrete type (which in turn depends on the worker
/// registry the reaper's expiry calls into).
#[async_trait]
pub trait GameEnder {
    async fn end_game(&self, connect_code: &str, reason: KillReason);
}

/// Tracks one watchdog task per connect code. `touch` resets its timer;
/// dropping the registration (on game end) stops the watchdog.
pub struct Reaper {
    ender: Arc<dyn GameEnder + Send + Sync>,
    timeout: Duration,
    touches: DashMap<String, mpsc::Sender<()>>,
}

impl Reaper {
    pub fn new(ender: Arc<dyn GameEnder + Send + Sync>, timeout: Duration) -> Reaper {
        Reaper {
            ender,
            timeout,
            touches: DashMap::new(),
        }
    }

    /// Registers a freshly started game, spawning its watchdog task if one
    /// isn't already running.
    pub fn register(self: &Arc<Self>, connect_code: String) {
        if self.touches.contains_key(&connect_code) {
            return;
        }

        let (touch_tx, touch_rx) = mpsc::channel(1);
        self.touches.insert(connect_code.clone(), touch_tx);

        let reaper = self.clone();
        tokio::spawn(watch(reaper, connect_code, touch_rx));
    }

    /// Resets the timer for `connect_code`; a no-op if no watchdog is
    /// registered (e.g. the game already ended).
    pub fn touch(&self, connect_code: &str) {
        if let Some(tx) = self.touches.get(connect_code) {
            let _ = tx.try_send(());
        }
    }

    /// Stops tracking `connect_code` without ending the game (called once
    /// the game has already ended through some other path).
    pub fn forget(&self, connect_code: &str) {
        self.touches.remove(connect_code);
    }
}

#[instrument(skip(reaper, touch_rx))]
async fn watch(reaper: Arc<Reaper>, connect_code: String, mut touch_rx: mpsc::Receiver<()>) {
    loop {
        match tokio::time::timeout(reaper.timeout, touch_rx.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) => {
                // sender dropped: the reaper itself is going away.
                break;
            }
            Err(_) => {
                info!("game inactive past timeout, ending");
                reaper.ender.end_game(&connect_code, KillReason::EndAndWipe).await;
                reaper.touches.remove(&connect_code);
                break;
            }
        }
    }
}
