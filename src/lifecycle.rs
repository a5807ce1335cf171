//! Process Lifecycle (C12): on `SIGTERM`/`SIGINT`, every running Subscriber
//! Worker is asked to end its game gracefully (`EndAndSave`) and the
//! process waits for all of them to acknowledge before exiting.

use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::router::GuildRouter;
use crate::worker::KillReason;

/// Blocks until `SIGTERM` or `SIGINT`, then broadcasts `EndAndSave` to every
/// worker the router still has registered, waiting up to `shutdown_timeout`
/// for all of them to finish tearing down.
pub async fn wait_for_shutdown(router: &GuildRouter, shutdown_timeout: Duration) {
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM, shutting down"),
        _ = int.recv() => info!("received SIGINT, shutting down"),
    }

    let connect_codes = router.active_connect_codes();
    info!(workers = connect_codes.len(), "closing workers gracefully");

    let closeout = async {
        for connect_code in connect_codes {
            router.end_game(&connect_code, KillReason::EndAndSave).await;
        }
    };

    if tokio::time::timeout(shutdown_timeout, closeout).await.is_err() {
        warn!("graceful shutdown timed out, exiting anyway");
    }
}
