//! Background nonce sweeper

use std::sync::Arc;
use std::time::Duration;
use telemetry_core::NonceStore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Periodically drop expired and consumed nonces.
///
/// The task runs until the returned handle is aborted or the runtime shuts down.
pub fn spawn_sweeper(nonces: Arc<NonceStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = nonces.sweep();
            debug!(removed, remaining = nonces.active_count(), "Sweeper tick");
        }
    })
}
