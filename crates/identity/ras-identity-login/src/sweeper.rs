//! Periodic cleanup of abandoned logins and idle sessions.

use crate::service::LoginService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sweep expired flows and idle sessions every `interval` until aborted.
pub fn spawn_sweeper(service: Arc<LoginService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep_interval = tokio::time::interval(interval);
        sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            sweep_interval.tick().await;

            match service.sweep().await {
                Ok((flows, sessions)) => {
                    debug!("Sweeper removed {} flows and {} sessions", flows, sessions)
                }
                Err(e) => warn!("Sweep failed: {}", e),
            }
        }
    })
}
