//! Companion-device session protocol.
//! Host-driven: no I/O; host passes bytes, lines and clock readings and acts on the results.

pub mod capability;
pub mod counters;
pub mod diagnostic;
pub mod framer;
pub mod heartbeat;
pub mod protocol;
pub mod scheduler;

pub use capability::{
    AlertDone, AlertOutcome, AlertPlayer, CounterSink, DeviceBridge, DeviceError, Feature,
    FeatureFlags, Notifier,
};
pub use counters::{CounterEvent, DailyCounters, Tally};
pub use diagnostic::{FlashSequence, Phase};
pub use framer::{FeedOutcome, LineFramer};
pub use heartbeat::{
    AckOutcome, Cadence, HeartbeatConfig, HeartbeatMonitor, HeartbeatState, NightCadence, Tick,
};
pub use protocol::{classify, Command, Message, ProtocolError, ProtocolMessage};
pub use scheduler::{DailyWindow, Plan, PlannerConfig, SessionPlanner};
