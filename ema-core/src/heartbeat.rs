//! Liveness: probe ids, ack matching, timeout detection. Host drives it with clock readings.

use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveTime, TimeZone};

use crate::protocol::Command;

/// Default probe interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Default silence allowed before the session is declared dead.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Probe ids wrap at this value.
pub const PROBE_ID_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Alternate cadence used inside a daily window. The window may wrap midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightCadence {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub cadence: Cadence,
}

impl NightCadence {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub day: Cadence,
    pub night: Option<NightCadence>,
}

impl HeartbeatConfig {
    /// Cadence in force at wall-clock time `t`.
    pub fn cadence_at(&self, t: NaiveTime) -> Cadence {
        match self.night {
            Some(n) if n.contains(t) => n.cadence,
            _ => self.day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Active,
    TimedOut,
}

/// The most recently sent probe. Only its id is accepted by `on_ack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub id: String,
    pub sent_at: Instant,
}

/// Result of one `tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Send this probe, then wait `next_in`.
    Probe { command: Command, next_in: Duration },
    /// No matching ack for longer than the timeout; the monitor has halted.
    TimedOut { silent_for: Duration },
    /// Monitor not active; the loop should exit.
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Matched,
    /// Stale or unknown id. Liveness is not refreshed.
    Unexpected { expected: Option<String> },
}

pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: HeartbeatState,
    next_id: u32,
    last_probe: Option<Probe>,
    last_ack: Instant,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            state: HeartbeatState::Idle,
            next_id: 0,
            last_probe: None,
            last_ack: now,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HeartbeatState::Active
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn last_ack(&self) -> Instant {
        self.last_ack
    }

    pub fn last_probe(&self) -> Option<&Probe> {
        self.last_probe.as_ref()
    }

    /// Move to Active. Returns false if already active. Liveness restarts from `now`.
    pub fn activate(&mut self, now: Instant) -> bool {
        if self.is_active() {
            return false;
        }
        self.state = HeartbeatState::Active;
        self.last_ack = now;
        true
    }

    /// Back to Idle (session torn down). Probe history is dropped.
    pub fn deactivate(&mut self) {
        self.state = HeartbeatState::Idle;
        self.last_probe = None;
    }

    /// Treat `now` as the last sign of life (new connection accepted).
    pub fn touch(&mut self, now: Instant) {
        self.last_ack = now;
    }

    pub fn tick<Tz: TimeZone>(&mut self, now: Instant, wall: &DateTime<Tz>) -> Tick {
        if !self.is_active() {
            return Tick::Inactive;
        }
        let cadence = self.config.cadence_at(wall.naive_local().time());
        let silent_for = now.saturating_duration_since(self.last_ack);
        if silent_for > cadence.timeout {
            self.state = HeartbeatState::TimedOut;
            return Tick::TimedOut { silent_for };
        }
        let id = self.next_id.to_string();
        self.next_id = (self.next_id + 1) % PROBE_ID_LIMIT;
        self.last_probe = Some(Probe {
            id: id.clone(),
            sent_at: now,
        });
        Tick::Probe {
            command: Command::LiveCheck {
                id,
                epoch_millis: wall.timestamp_millis(),
            },
            next_in: cadence.interval,
        }
    }

    /// Match an ack against the last probe; only a match refreshes liveness.
    pub fn on_ack(&mut self, id: &str, now: Instant) -> AckOutcome {
        match &self.last_probe {
            Some(p) if p.id == id => {
                self.last_ack = now;
                AckOutcome::Matched
            }
            other => AckOutcome::Unexpected {
                expected: other.as_ref().map(|p| p.id.clone()),
            },
        }
    }
}
