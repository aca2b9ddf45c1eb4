//! Wiring: builds every component from config and exposes the operator actions.

use std::sync::Arc;

use ema_core::{AlertPlayer, Command, CounterEvent, Feature, FeatureFlags};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::alert::TimedAlert;
use crate::collaborators::{Capabilities, ConfiguredDevice, LogNotifier, ReportCounters, SharedFlags};
use crate::config::{Config, ConfigError};
use crate::diagnostic::FlashRunner;
use crate::dispatcher::Dispatcher;
use crate::logging::{LogDirs, SessionLog, TimestampedLog};
use crate::poller;
use crate::scheduler::Scheduler;
use crate::session::SessionManager;

pub struct App {
    pub config: Config,
    pub manager: SessionManager,
    pub caps: Capabilities,
    pub flags: Arc<SharedFlags>,
    pub counters: Arc<ReportCounters>,
    pub scheduler: Scheduler,
    pub flash: FlashRunner,
    pub dispatcher: Arc<Dispatcher>,
    session_log: Arc<SessionLog>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    pub fn new(config: Config, dirs: &LogDirs) -> Result<Self, ConfigError> {
        let manager = SessionManager::new(config.heartbeat_config()?);
        let flags = Arc::new(SharedFlags::new(
            config.features.bci,
            config.features.test_mode,
        ));
        let counters = Arc::new(ReportCounters::new(&dirs.report));
        let alert: Arc<dyn AlertPlayer> = Arc::new(TimedAlert::new(config.alert_window()));
        let caps = Capabilities {
            notifier: Arc::new(LogNotifier),
            device: Arc::new(ConfiguredDevice::new(config.features.device_label.clone())),
            counters: counters.clone(),
            features: flags.clone(),
            alert,
        };
        let session_log = Arc::new(SessionLog::new(&dirs.session));
        let dispatcher = Arc::new(Dispatcher::new(
            manager.clone(),
            caps.clone(),
            session_log.clone(),
        ));
        let scheduler = Scheduler::new(
            config.planner_config()?,
            manager.clone(),
            caps.clone(),
            session_log.clone(),
        );
        let flash = FlashRunner::new(
            config.flash_interval(),
            manager.clone(),
            TimestampedLog::in_dir(&dirs.diagnostic, "photodiode_log"),
            caps.clone(),
        );
        Ok(Self {
            config,
            manager,
            caps,
            flags,
            counters,
            scheduler,
            flash,
            dispatcher,
            session_log,
            pollers: Mutex::new(Vec::new()),
        })
    }

    /// Operator skip: end the alert (its completion sends EMA_SKIP) or send EMA_SKIP directly,
    /// then count the prompt as ignored.
    pub fn skip(&self) {
        if !self.caps.alert.stop() && self.manager.send(&Command::Skip).is_err() {
            info!("EMA_SKIP not sent, no client connected");
        }
        self.caps.counters.record(CounterEvent::Ignored);
        info!("session skipped by operator");
    }

    pub fn check_battery(&self) -> bool {
        poller::check_battery(&self.manager, &self.caps, true)
    }

    pub fn set_feature(&self, feature: Feature, on: bool) {
        self.flags.set(feature, on);
        info!(%feature, on, "feature toggled");
    }

    pub fn spawn_pollers(&self) -> Result<(), ConfigError> {
        let window = self.config.presence_window()?;
        let (manager, caps) = (self.manager.clone(), self.caps.clone());
        let battery = poller::spawn_periodic(
            "battery",
            self.config.battery_interval(),
            None,
            move || {
                poller::check_battery(&manager, &caps, false);
                async {}
            },
        );
        let caps = self.caps.clone();
        let presence = poller::spawn_periodic(
            "presence",
            self.config.presence_interval(),
            Some(window),
            move || {
                poller::check_presence(&caps);
                async {}
            },
        );
        self.pollers.lock().extend([battery, presence]);
        Ok(())
    }

    pub fn status(&self) -> String {
        let on_off = |f: Feature| if self.flags.is_enabled(f) { "on" } else { "off" };
        format!(
            "client: {}, heartbeat: {:?}, next session: {}, session log: {}, flash: {}, bci: {}, test mode: {}, today: {}",
            self.manager
                .peer()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".into()),
            self.manager.heartbeat_state(),
            self.scheduler
                .next_start()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "not scheduled".into()),
            self.session_log
                .path()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "none".into()),
            if self.flash.is_running() { "running" } else { "idle" },
            on_off(Feature::Bci),
            on_off(Feature::TestMode),
            self.counters.tally(),
        )
    }

    pub fn shutdown(&self) {
        self.flash.stop();
        self.scheduler.cancel();
        for p in self.pollers.lock().drain(..) {
            p.abort();
        }
        self.manager.shutdown();
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn app() -> (App, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let dirs = LogDirs::create(root.path()).unwrap();
        (App::new(Config::default(), &dirs).unwrap(), root)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(String::from_utf8(b).unwrap().trim_end().to_string());
        }
        out
    }

    #[tokio::test]
    async fn skip_without_alert_sends_once() {
        let (app, _root) = app();
        let (_id, mut rx) = app.manager.attach("127.0.0.1:9100".parse().unwrap());
        app.skip();
        assert_eq!(drain(&mut rx), vec!["EMA_SKIP"]);
        assert_eq!(app.counters.tally().ignored, 1);
        app.shutdown();
    }

    #[tokio::test]
    async fn skip_during_alert_sends_once() {
        let (app, _root) = app();
        let (_id, mut rx) = app.manager.attach("127.0.0.1:9100".parse().unwrap());
        app.scheduler.schedule_next();
        app.scheduler.start_session();
        app.skip();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(drain(&mut rx), vec!["EMA_START_Test", "EMA_SKIP"]);
        let tally = app.counters.tally();
        assert_eq!((tally.triggered, tally.ignored), (1, 1));
        app.shutdown();
    }

    #[tokio::test]
    async fn status_reflects_state() {
        let (app, _root) = app();
        assert!(app.status().starts_with("client: none"));
        app.set_feature(Feature::Bci, true);
        assert!(app.status().contains("bci: on"));
        app.spawn_pollers().unwrap();
        app.shutdown();
        assert!(!app.manager.is_running());
    }
}
