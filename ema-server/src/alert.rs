//! Prompt alert window. Plays until stopped or until the window elapses.

use std::time::Duration;

use ema_core::{AlertDone, AlertOutcome, AlertPlayer};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::info;

pub struct TimedAlert {
    window: Duration,
    active: Mutex<Option<oneshot::Sender<()>>>,
}

impl TimedAlert {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            active: Mutex::new(None),
        }
    }
}

impl AlertPlayer for TimedAlert {
    fn play(&self, on_done: AlertDone) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false) {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        *active = Some(tx);
        let window = self.window;
        info!(secs = window.as_secs(), "alert started");
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = tokio::time::sleep(window) => AlertOutcome::Expired,
                _ = rx => AlertOutcome::Stopped,
            };
            info!(?outcome, "alert ended");
            on_done(outcome);
        });
        true
    }

    fn stop(&self) -> bool {
        match self.active.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<AlertOutcome>>>, impl Fn() -> AlertDone) {
        let seen: Arc<Mutex<Vec<AlertOutcome>>> = Arc::default();
        let s = seen.clone();
        let make = move || -> AlertDone {
            let s = s.clone();
            Box::new(move |o| s.lock().push(o))
        };
        (seen, make)
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_window() {
        let alert = TimedAlert::new(Duration::from_secs(120));
        let (seen, done) = recorder();
        assert!(alert.play(done()));
        assert!(!alert.play(done()));
        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(seen.lock().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*seen.lock(), vec![AlertOutcome::Expired]);
        assert!(!alert.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_early() {
        let alert = TimedAlert::new(Duration::from_secs(120));
        let (seen, done) = recorder();
        assert!(alert.play(done()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(alert.stop());
        assert!(!alert.stop());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), vec![AlertOutcome::Stopped]);
        assert!(alert.play(done()));
    }
}
