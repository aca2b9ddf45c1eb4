//! Periodic health checks: client battery and external device presence.

use std::future::Future;
use std::time::Duration;

use chrono::Local;
use ema_core::{Command, DailyWindow, Feature};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::collaborators::Capabilities;
use crate::session::SessionManager;

/// Run `job` every `every`, first after one full period. With a window, ticks outside it are skipped.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    window: Option<DailyWindow>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, secs = every.as_secs(), "periodic task started");
        loop {
            ticker.tick().await;
            if let Some(w) = window {
                if !w.contains(Local::now().time()) {
                    debug!(task = name, "outside daily window, skipped");
                    continue;
                }
            }
            job().await;
        }
    })
}

/// Ask the client for its battery. Manual checks escalate when nobody is connected.
pub fn check_battery(manager: &SessionManager, caps: &Capabilities, escalate: bool) -> bool {
    match manager.send(&Command::Battery) {
        Ok(()) => {
            debug!("battery level requested");
            true
        }
        Err(_) if escalate => {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            warn!("battery check failed, no client connected");
            caps.notifier.notify(
                "Battery Check Failed - No Client Connected",
                &format!(
                    "The server attempted to check the battery level of the client, but no client was connected at {}",
                    stamp
                ),
            );
            false
        }
        Err(_) => {
            info!("battery check skipped, no client connected");
            false
        }
    }
}

/// Query the device label when device integration is enabled. Failures are only logged.
pub fn check_presence(caps: &Capabilities) -> Option<String> {
    if !caps.features.is_enabled(Feature::Bci) {
        return None;
    }
    match caps.device.device_label() {
        Ok(label) => {
            info!(%label, "device present");
            Some(label)
        }
        Err(e) => {
            warn!(error = %e, "device presence check failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::Doubles;
    use ema_core::HeartbeatConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn battery_polls_only_with_client() {
        let d = Doubles::new();
        let caps = d.capabilities();
        let m = SessionManager::new(HeartbeatConfig::default());
        assert!(!check_battery(&m, &caps, false));
        assert!(d.notifier.sent.lock().is_empty());
        assert!(!check_battery(&m, &caps, true));
        assert_eq!(
            d.notifier.sent.lock()[0].0,
            "Battery Check Failed - No Client Connected"
        );

        let (_id, mut rx) = m.attach("127.0.0.1:9000".parse().unwrap());
        assert!(check_battery(&m, &caps, false));
        assert_eq!(rx.recv().await.unwrap(), b"BATTERY\n".to_vec());
    }

    #[test]
    fn presence_needs_bci_and_tolerates_failure() {
        let d = Doubles::new();
        let caps = d.capabilities();
        assert_eq!(check_presence(&caps), None);
        d.flags.set(Feature::Bci, true);
        assert_eq!(check_presence(&caps).as_deref(), Some("S01"));
        d.device.fail.store(true, Ordering::Relaxed);
        assert_eq!(check_presence(&caps), None);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_runs_on_every_tick() {
        let runs = Arc::new(AtomicU32::new(0));
        let r = runs.clone();
        let handle = spawn_periodic("test", Duration::from_secs(1800), None, move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_secs(1800 * 2 + 10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        handle.abort();
    }
}
