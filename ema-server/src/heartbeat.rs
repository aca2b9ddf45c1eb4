//! Probe loop driving the core heartbeat monitor for the current session.

use tracing::{debug, warn};

use crate::session::SessionManager;
use ema_core::Tick;

/// Runs until the monitor goes inactive or the client times out.
pub async fn run(manager: SessionManager) {
    loop {
        match manager.heartbeat_tick() {
            Tick::Probe { command, next_in } => {
                if let Err(e) = manager.send(&command) {
                    debug!(error = %e, "probe not sent");
                }
                tokio::time::sleep(next_in).await;
            }
            Tick::TimedOut { silent_for } => {
                warn!(
                    silent_secs = silent_for.as_secs_f64(),
                    "No LIVE_CHECK_ACK received in time, dropping client"
                );
                manager.disconnect();
                return;
            }
            Tick::Inactive => return,
        }
    }
}
