//! Host-side implementations of the core capabilities, and the bundle handed to components.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use ema_core::{
    AlertPlayer, CounterEvent, CounterSink, DailyCounters, DeviceBridge, DeviceError, Feature,
    FeatureFlags, Notifier, Tally,
};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Everything protocol handling may call out to.
#[derive(Clone)]
pub struct Capabilities {
    pub notifier: Arc<dyn Notifier>,
    pub device: Arc<dyn DeviceBridge>,
    pub counters: Arc<dyn CounterSink>,
    pub features: Arc<dyn FeatureFlags>,
    pub alert: Arc<dyn AlertPlayer>,
}

/// Notifications go to the log stream; mail delivery is outside this daemon.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) {
        warn!(subject, body, "notification");
    }
}

/// Feature toggles, flipped at runtime from the operator console.
pub struct SharedFlags {
    bci: AtomicBool,
    test_mode: AtomicBool,
}

impl SharedFlags {
    pub fn new(bci: bool, test_mode: bool) -> Self {
        Self {
            bci: AtomicBool::new(bci),
            test_mode: AtomicBool::new(test_mode),
        }
    }

    pub fn set(&self, feature: Feature, on: bool) {
        let flag = match feature {
            Feature::Bci => &self.bci,
            Feature::TestMode => &self.test_mode,
        };
        flag.store(on, Ordering::Relaxed);
    }
}

impl FeatureFlags for SharedFlags {
    fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Bci => self.bci.load(Ordering::Relaxed),
            Feature::TestMode => self.test_mode.load(Ordering::Relaxed),
        }
    }
}

/// Device integration backed by a configured label. Without a label it reports unavailable.
pub struct ConfiguredDevice {
    label: Option<String>,
}

impl ConfiguredDevice {
    pub fn new(label: Option<String>) -> Self {
        Self { label }
    }
}

impl DeviceBridge for ConfiguredDevice {
    fn device_label(&self) -> Result<String, DeviceError> {
        self.label.clone().ok_or(DeviceError::Unavailable)
    }

    fn forward(&self, message: &str) -> Result<(), DeviceError> {
        let label = self.label.as_deref().ok_or(DeviceError::Unavailable)?;
        info!(device = label, message, "forwarded to device");
        Ok(())
    }
}

/// Daily counters mirrored to `<report dir>/<YYYY-mm-dd>.unsent.txt` on every change.
pub struct ReportCounters {
    dir: PathBuf,
    counters: Mutex<DailyCounters>,
}

impl ReportCounters {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counters: Mutex::new(DailyCounters::new(Local::now().date_naive())),
        }
    }

    pub fn tally(&self) -> Tally {
        self.counters.lock().tally()
    }

    fn report_path(&self, day: chrono::NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.unsent.txt", day.format("%Y-%m-%d")))
    }
}

impl CounterSink for ReportCounters {
    fn record(&self, event: CounterEvent) {
        let (day, tally) = {
            let mut c = self.counters.lock();
            if c.record(Local::now().date_naive(), event) {
                info!("prompt counters reset for the new day");
            }
            (c.day(), c.tally())
        };
        info!(?event, %tally, "prompt counter updated");
        let path = self.report_path(day);
        if let Err(e) = std::fs::write(&path, tally.to_string()) {
            warn!(path = %path.display(), error = %e, "failed to write report counters");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_file_tracks_counters() {
        let dir = tempfile::tempdir().unwrap();
        let counters = ReportCounters::new(dir.path());
        counters.record(CounterEvent::Triggered);
        counters.record(CounterEvent::Responded);
        let path = counters.report_path(Local::now().date_naive());
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "Triggered: 1, Responded: 1, Completed: 0, Ignored: 0");
        assert_eq!(counters.tally().responded, 1);
    }

    #[test]
    fn flags_toggle() {
        let flags = SharedFlags::new(false, true);
        assert!(!flags.is_enabled(Feature::Bci));
        flags.set(Feature::Bci, true);
        flags.set(Feature::TestMode, false);
        assert!(flags.is_enabled(Feature::Bci));
        assert!(!flags.is_enabled(Feature::TestMode));
    }

    #[test]
    fn device_without_label_is_unavailable() {
        let d = ConfiguredDevice::new(None);
        assert!(matches!(d.device_label(), Err(DeviceError::Unavailable)));
        assert!(d.forward("BCI_Sync:1").is_err());
        let d = ConfiguredDevice::new(Some("S01".into()));
        assert_eq!(d.device_label().unwrap(), "S01");
        assert!(d.forward("BCI_Sync:1").is_ok());
    }
}
