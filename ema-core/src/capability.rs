//! Capabilities the core calls out to. Hosts inject implementations; the core knows
//! nothing about mail, audio, UI or the external device beyond these traits.

use std::fmt;
use std::str::FromStr;

use crate::counters::CounterEvent;

/// Alerting channel (mail in production).
pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device integration unavailable")]
    Unavailable,
    #[error("device integration failed: {0}")]
    Failed(String),
}

/// External device integration. Either call may fail; callers only log failures.
pub trait DeviceBridge: Send + Sync {
    fn device_label(&self) -> Result<String, DeviceError>;
    fn forward(&self, message: &str) -> Result<(), DeviceError>;
}

/// Prompt counters shown to the operator and mailed in the daily report.
pub trait CounterSink: Send + Sync {
    fn record(&self, event: CounterEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// External device integration (BCI).
    Bci,
    /// Start prompts as test sessions instead of live ones.
    TestMode,
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::Bci => "bci",
            Feature::TestMode => "test_mode",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown feature: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for Feature {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bci" => Ok(Feature::Bci),
            "test" | "test_mode" => Ok(Feature::TestMode),
            other => Err(UnknownFeature(other.to_string())),
        }
    }
}

pub trait FeatureFlags: Send + Sync {
    fn is_enabled(&self, feature: Feature) -> bool;
}

/// How an alert ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// `stop` was called (prompt acknowledged or skipped).
    Stopped,
    /// Ran for its full window without being stopped.
    Expired,
}

pub type AlertDone = Box<dyn FnOnce(AlertOutcome) + Send + 'static>;

/// Audible prompt alert. `on_done` runs exactly once when the alert ends.
pub trait AlertPlayer: Send + Sync {
    /// Returns false (and drops `on_done`) if an alert is already playing.
    fn play(&self, on_done: AlertDone) -> bool;
    /// Returns true if an alert was playing and has been stopped.
    fn stop(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_round_trip() {
        for f in [Feature::Bci, Feature::TestMode] {
            assert_eq!(f.name().parse::<Feature>().unwrap(), f);
        }
        assert_eq!("test".parse::<Feature>().unwrap(), Feature::TestMode);
        assert!("audio".parse::<Feature>().is_err());
    }
}
