//! Photodiode flash loop used to calibrate display latency on the client.

use std::sync::Arc;
use std::time::Duration;

use ema_core::{Command, Feature, FlashSequence, Phase};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::Capabilities;
use crate::logging::TimestampedLog;
use crate::session::{SendError, SessionManager};

/// Run state plus the session the run belongs to. Commands are sent while this is locked,
/// so nothing can follow FLASH_END. `epoch` tells a stale loop it no longer owns the run.
struct Run {
    sequence: FlashSequence,
    session: Option<Uuid>,
    epoch: u64,
}

struct Inner {
    state: Mutex<Run>,
    task: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
    manager: SessionManager,
    log: TimestampedLog,
    caps: Capabilities,
}

#[derive(Clone)]
pub struct FlashRunner {
    inner: Arc<Inner>,
}

impl FlashRunner {
    pub fn new(
        interval: Duration,
        manager: SessionManager,
        log: TimestampedLog,
        caps: Capabilities,
    ) -> Self {
        debug!(path = %log.path().display(), "diagnostic log");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Run {
                    sequence: FlashSequence::new(),
                    session: None,
                    epoch: 0,
                }),
                task: Mutex::new(None),
                interval,
                manager,
                log,
                caps,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().sequence.is_running()
    }

    /// Start a run on the current session. False when no client is connected or a run is
    /// already going.
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        let Some(session) = inner.manager.current_id() else {
            info!("no client connected, flash sequence not started");
            return false;
        };
        let mut run = inner.state.lock();
        let Some(command) = run.sequence.start() else {
            debug!("flash sequence already running");
            return false;
        };
        if let Err(e) = inner.manager.send_to(session, &command) {
            run.sequence.finish();
            inner.send_failed(&command, &e);
            return false;
        }
        run.session = Some(session);
        run.epoch += 1;
        inner.record(&command, None);
        let handle = tokio::spawn(inner.clone().run(session, run.epoch));
        if let Some(old) = inner.task.lock().replace(handle) {
            old.abort();
        }
        true
    }

    /// End the run. FLASH_END goes out once, here or from the loop, whichever comes first.
    pub fn stop(&self) {
        let inner = &self.inner;
        let mut run = inner.state.lock();
        let end = run.sequence.finish();
        if let Some(task) = inner.task.lock().take() {
            task.abort();
        }
        if let (Some(end), Some(session)) = (end, run.session.take()) {
            inner.send_end(session, &end);
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, session: Uuid, epoch: u64) {
        loop {
            tokio::time::sleep(self.interval).await;
            let mut run = self.state.lock();
            if run.epoch != epoch {
                return;
            }
            let Some(phase) = run.sequence.toggle() else {
                return;
            };
            let command = phase.command();
            if let Err(e) = self.manager.send_to(session, &command) {
                info!("client lost, flash sequence ending");
                self.send_failed(&command, &e);
                if let Some(end) = run.sequence.finish() {
                    self.send_end(session, &end);
                }
                run.session = None;
                return;
            }
            self.record(&command, Some(phase));
            drop(run);
            if self.caps.features.is_enabled(Feature::Bci) {
                if let Err(e) = self.caps.device.forward(&format!("EmaColor={}", phase.marker())) {
                    warn!(error = %e, "flash marker not forwarded");
                }
            }
        }
    }

    fn send_end(&self, session: Uuid, end: &Command) {
        match self.manager.send_to(session, end) {
            Ok(()) => self.record(end, None),
            Err(e) => self.send_failed(end, &e),
        }
    }

    fn record(&self, command: &Command, phase: Option<Phase>) {
        let line = match phase {
            Some(p) => format!("Sent photodiode signal: {} - Screen {}", command, p.color()),
            None => format!("Sent photodiode signal: {}", command),
        };
        debug!("{}", line);
        self.write_log(&line);
    }

    fn send_failed(&self, command: &Command, error: &SendError) {
        warn!(%command, error = %error, "photodiode signal not sent");
        self.write_log(&format!("Failed to send photodiode signal {}: {}", command, error));
    }

    fn write_log(&self, line: &str) {
        if let Err(e) = self.log.write(line) {
            warn!(error = %e, "diagnostic log write failed");
        }
    }
}
