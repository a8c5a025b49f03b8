//! Background expiry of idle sessions and stale postponed requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::registry::SessionRegistry;

/// Spawn the periodic sweeper. Abort the returned handle at shutdown.
pub fn spawn_sweeper(sessions: Arc<SessionRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // First tick fires immediately; skip it.

        loop {
            ticker.tick().await;

            let expired = sessions.sweep_expired();
            let evicted = sessions.evict_postponed();
            if expired > 0 || evicted > 0 {
                tracing::info!(
                    expired_sessions = expired,
                    evicted_postponed = evicted,
                    remaining = sessions.len(),
                    "expiry sweep"
                );
            }
        }
    })
}
