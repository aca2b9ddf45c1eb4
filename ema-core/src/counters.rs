//! Daily prompt counters (triggered / responded / completed / ignored).

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterEvent {
    Triggered,
    Responded,
    Completed,
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub triggered: u32,
    pub responded: u32,
    pub completed: u32,
    pub ignored: u32,
}

impl Tally {
    pub fn record(&mut self, event: CounterEvent) {
        let slot = match event {
            CounterEvent::Triggered => &mut self.triggered,
            CounterEvent::Responded => &mut self.responded,
            CounterEvent::Completed => &mut self.completed,
            CounterEvent::Ignored => &mut self.ignored,
        };
        *slot = slot.saturating_add(1);
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Triggered: {}, Responded: {}, Completed: {}, Ignored: {}",
            self.triggered, self.responded, self.completed, self.ignored
        )
    }
}

/// Counters for one calendar day. Recording on a new day starts from zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCounters {
    day: NaiveDate,
    tally: Tally,
}

impl DailyCounters {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            tally: Tally::default(),
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Record an event that happened on `today`. Returns true if the day rolled over.
    pub fn record(&mut self, today: NaiveDate, event: CounterEvent) -> bool {
        let rolled = today != self.day;
        if rolled {
            self.day = today;
            self.tally = Tally::default();
        }
        self.tally.record(event);
        rolled
    }
}
