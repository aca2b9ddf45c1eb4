//! Session scheduler: randomized delay between prompts, confined to a daily window.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use rand::Rng;

/// Default window opening hour (09:00).
pub const DEFAULT_OPEN_HOUR: u32 = 9;

/// Default window closing hour (21:00, exclusive).
pub const DEFAULT_CLOSE_HOUR: u32 = 21;

/// Default bounds for the delay between prompts, in minutes (inclusive).
pub const DEFAULT_MIN_DELAY_MINUTES: i64 = 90;
pub const DEFAULT_MAX_DELAY_MINUTES: i64 = 150;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("hour out of range: {0}")]
    BadHour(u32),
    #[error("window must open before it closes ({open}..{close})")]
    Empty { open: u32, close: u32 },
    #[error("delay range is empty ({min}..={max} minutes)")]
    BadDelay { min: i64, max: i64 },
}

/// Daily `[open, close)` range at hour granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    open: NaiveTime,
    close_hour: u32,
}

impl DailyWindow {
    pub fn new(open_hour: u32, close_hour: u32) -> Result<Self, WindowError> {
        if close_hour > 24 {
            return Err(WindowError::BadHour(close_hour));
        }
        let open =
            NaiveTime::from_hms_opt(open_hour, 0, 0).ok_or(WindowError::BadHour(open_hour))?;
        if open_hour >= close_hour {
            return Err(WindowError::Empty {
                open: open_hour,
                close: close_hour,
            });
        }
        Ok(Self { open, close_hour })
    }

    pub fn open_hour(&self) -> u32 {
        self.open.hour()
    }

    pub fn close_hour(&self) -> u32 {
        self.close_hour
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        t.hour() >= self.open.hour() && t.hour() < self.close_hour
    }
}

impl Default for DailyWindow {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(DEFAULT_OPEN_HOUR, 0, 0).unwrap_or_default(),
            close_hour: DEFAULT_CLOSE_HOUR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    pub window: DailyWindow,
    pub min_delay_minutes: i64,
    pub max_delay_minutes: i64,
}

impl PlannerConfig {
    pub fn new(window: DailyWindow, min: i64, max: i64) -> Result<Self, WindowError> {
        if min < 0 || min > max {
            return Err(WindowError::BadDelay { min, max });
        }
        Ok(Self {
            window,
            min_delay_minutes: min,
            max_delay_minutes: max,
        })
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            window: DailyWindow::default(),
            min_delay_minutes: DEFAULT_MIN_DELAY_MINUTES,
            max_delay_minutes: DEFAULT_MAX_DELAY_MINUTES,
        }
    }
}

/// How the raw candidate was moved into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clamp {
    /// Candidate was inside the window.
    None,
    /// Candidate was at or after closing; moved to next morning plus the delay.
    NextMorning,
    /// Candidate was before opening; moved to that morning plus the delay.
    SameMorning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub start_at: NaiveDateTime,
    pub delay_minutes: i64,
    pub clamp: Clamp,
    pub first_session: bool,
}

/// Move `now + delay` into the window. A single pass: the result is not checked again.
pub fn clamp_to_window(
    now: NaiveDateTime,
    delay_minutes: i64,
    window: &DailyWindow,
) -> (NaiveDateTime, Clamp) {
    let delay = Duration::minutes(delay_minutes);
    let candidate = now + delay;
    let hour = candidate.hour();
    if hour >= window.close_hour {
        let morning = candidate.date().and_time(window.open) + Duration::days(1);
        (morning + delay, Clamp::NextMorning)
    } else if hour < window.open.hour() {
        let morning = candidate.date().and_time(window.open);
        (morning + delay, Clamp::SameMorning)
    } else {
        (candidate, Clamp::None)
    }
}

/// Owns the first-session flag. The first plan of the process starts immediately;
/// every later one draws a uniform delay in whole minutes.
#[derive(Debug)]
pub struct SessionPlanner {
    config: PlannerConfig,
    is_first_session: bool,
}

impl SessionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            is_first_session: true,
        }
    }

    pub fn is_first_session(&self) -> bool {
        self.is_first_session
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan_next<R: Rng + ?Sized>(&mut self, now: NaiveDateTime, rng: &mut R) -> Plan {
        let first_session = self.is_first_session;
        let delay_minutes = if first_session {
            self.is_first_session = false;
            0
        } else {
            rng.gen_range(self.config.min_delay_minutes..=self.config.max_delay_minutes)
        };
        let (start_at, clamp) = clamp_to_window(now, delay_minutes, &self.config.window);
        Plan {
            start_at,
            delay_minutes,
            clamp,
            first_session,
        }
    }
}
