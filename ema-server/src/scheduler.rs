//! Prompt scheduling: arms one timer for the next session and runs the session-start action.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use ema_core::{
    AlertOutcome, Command, CounterEvent, Feature, Plan, PlannerConfig, SessionPlanner,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collaborators::Capabilities;
use crate::logging::SessionLog;
use crate::session::{SendError, SessionManager};

pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    planner: Mutex<SessionPlanner>,
    rng: Mutex<StdRng>,
    timer: Mutex<Option<Armed>>,
    generation: Mutex<u64>,
    next_start: Mutex<Option<NaiveDateTime>>,
    clock: Clock,
    manager: SessionManager,
    caps: Capabilities,
    session_log: Arc<SessionLog>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: PlannerConfig,
        manager: SessionManager,
        caps: Capabilities,
        session_log: Arc<SessionLog>,
    ) -> Self {
        Self::with_clock(config, manager, caps, session_log, local_now)
    }

    pub fn with_clock(
        config: PlannerConfig,
        manager: SessionManager,
        caps: Capabilities,
        session_log: Arc<SessionLog>,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                planner: Mutex::new(SessionPlanner::new(config)),
                rng: Mutex::new(StdRng::from_entropy()),
                timer: Mutex::new(None),
                generation: Mutex::new(0),
                next_start: Mutex::new(None),
                clock,
                manager,
                caps,
                session_log,
            }),
        }
    }

    pub fn next_start(&self) -> Option<NaiveDateTime> {
        *self.inner.next_start.lock()
    }

    /// Plan the next session and arm its timer, replacing any armed one.
    pub fn schedule_next(&self) -> Plan {
        let now = (self.inner.clock)();
        let plan = {
            let mut rng = self.inner.rng.lock();
            self.inner.planner.lock().plan_next(now, &mut *rng)
        };
        let wait = (plan.start_at - now).to_std().unwrap_or(Duration::ZERO);

        let mut timer = self.inner.timer.lock();
        let generation = {
            let mut g = self.inner.generation.lock();
            *g += 1;
            *g
        };
        let me = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            me.fire(generation);
        });
        if let Some(old) = timer.replace(Armed { generation, handle }) {
            old.handle.abort();
        }
        drop(timer);

        *self.inner.next_start.lock() = Some(plan.start_at);
        info!(
            next = %plan.start_at.format("%Y-%m-%d %H:%M:%S"),
            delay_minutes = plan.delay_minutes,
            clamp = ?plan.clamp,
            first = plan.first_session,
            "next session scheduled"
        );
        plan
    }

    pub fn cancel(&self) {
        if let Some(armed) = self.inner.timer.lock().take() {
            armed.handle.abort();
            info!("scheduled session cancelled");
        }
        *self.inner.next_start.lock() = None;
    }

    fn fire(&self, generation: u64) {
        {
            let mut timer = self.inner.timer.lock();
            match timer.as_ref() {
                Some(a) if a.generation == generation => {
                    timer.take();
                }
                _ => return,
            }
        }
        self.start_session();
    }

    /// Session-start action: begin a prompt on the client if one is connected, then re-arm.
    pub fn start_session(&self) {
        match self.begin_session() {
            Ok(command) => info!(%command, "session started"),
            Err(SendError::NotConnected) => {
                let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
                warn!("no client connected, session not started");
                self.inner.caps.notifier.notify(
                    "EMA Start Failed - No Client Connected",
                    &format!(
                        "The server attempted to start an EMA session, but no client was connected at {}",
                        stamp
                    ),
                );
            }
        }
        self.schedule_next();
    }

    fn begin_session(&self) -> Result<Command, SendError> {
        let caps = &self.inner.caps;
        if !self.inner.manager.is_connected() {
            return Err(SendError::NotConnected);
        }
        let label = self.device_label();
        match self.inner.session_log.open(label.as_deref()) {
            Ok(path) => info!(path = %path.display(), "session log opened"),
            Err(e) => warn!(error = %e, "could not open session log"),
        }
        let command = if caps.features.is_enabled(Feature::TestMode) {
            Command::StartTest
        } else {
            Command::StartLive
        };
        self.inner.manager.send(&command)?;
        caps.counters.record(CounterEvent::Triggered);
        self.start_alert();
        Ok(command)
    }

    fn device_label(&self) -> Option<String> {
        let caps = &self.inner.caps;
        if !caps.features.is_enabled(Feature::Bci) {
            return None;
        }
        match caps.device.device_label() {
            Ok(label) => Some(label),
            Err(e) => {
                warn!(error = %e, "device label unavailable, session log unlabelled");
                None
            }
        }
    }

    fn start_alert(&self) {
        let manager = self.inner.manager.clone();
        let counters = self.inner.caps.counters.clone();
        let started = self.inner.caps.alert.play(Box::new(move |outcome: AlertOutcome| {
            if outcome == AlertOutcome::Expired {
                counters.record(CounterEvent::Ignored);
            }
            if manager.send(&Command::Skip).is_err() {
                info!("EMA_SKIP not sent, no client connected");
            }
        }));
        if !started {
            debug!("alert already playing");
        }
    }
}
