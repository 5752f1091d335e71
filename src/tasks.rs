//! Background loops started by the binary.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::services::Services;

/// Purge revoked tokens whose own expiry has passed.
pub fn spawn_revoked_token_janitor(services: Arc<Services>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match services.auth.purge_revoked().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "purged revoked tokens"),
                Err(e) => tracing::error!(error = %e, "revoked token purge failed"),
            }
        }
    })
}

/// Rotate every shop's temp token. The first tick is skipped so a restart
/// does not invalidate codes already handed out.
pub fn spawn_temp_token_rotation(services: Arc<Services>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match services.temp_tokens.rotate_all().await {
                Ok(rotated) => tracing::info!(rotated, "temp tokens rotated"),
                Err(e) => tracing::error!(error = %e, "temp token rotation failed"),
            }
        }
    })
}
