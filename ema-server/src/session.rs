//! Single-client TCP session: accept loop, per-connection reader/writer tasks, and the shared
//! handle everything else uses to talk to the client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use ema_core::{
    AckOutcome, Command, FeedOutcome, HeartbeatConfig, HeartbeatMonitor, HeartbeatState,
    LineFramer, Tick,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::heartbeat;

/// Accept and read calls wake at least this often to re-check state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single outbound write may take at most this long before the session is dropped.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 4096;

/// Monotonic reading that follows tokio's clock, so paused-time tests drive it too.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("no client connected")]
    NotConnected,
}

struct Session {
    id: Uuid,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

struct HeartbeatSlot {
    monitor: HeartbeatMonitor,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    session: Mutex<Option<Session>>,
    heartbeat: Mutex<HeartbeatSlot>,
    running: AtomicBool,
}

/// Handle to the (at most one) connected client. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(heartbeat: HeartbeatConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(None),
                heartbeat: Mutex::new(HeartbeatSlot {
                    monitor: HeartbeatMonitor::new(heartbeat, now()),
                    task: None,
                }),
                running: AtomicBool::new(true),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn is_current(&self, id: Uuid) -> bool {
        self.inner.session.lock().as_ref().map(|s| s.id) == Some(id)
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.inner.session.lock().as_ref().map(|s| s.id)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.session.lock().as_ref().map(|s| s.peer)
    }

    /// Queue one command for the client. Never blocks.
    pub fn send(&self, command: &Command) -> Result<(), SendError> {
        self.send_if(command, |_| true)
    }

    /// Like `send`, but only to session `id`. A replaced or closed session is `NotConnected`.
    pub fn send_to(&self, id: Uuid, command: &Command) -> Result<(), SendError> {
        self.send_if(command, |s| s.id == id)
    }

    fn send_if(&self, command: &Command, accept: impl Fn(&Session) -> bool) -> Result<(), SendError> {
        let session = self.inner.session.lock();
        let s = session
            .as_ref()
            .filter(|s| accept(s))
            .ok_or(SendError::NotConnected)?;
        s.tx
            .send(command.to_line())
            .map_err(|_| SendError::NotConnected)?;
        debug!(peer = %s.peer, line = %command, "sent");
        Ok(())
    }

    /// Install a new session and return its id plus the stream of outbound lines.
    /// Any previous session is torn down first.
    pub fn attach(&self, peer: SocketAddr) -> (Uuid, mpsc::UnboundedReceiver<Vec<u8>>) {
        if self.is_connected() {
            self.disconnect();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        *self.inner.session.lock() = Some(Session { id, peer, tx });
        self.inner.heartbeat.lock().monitor.touch(now());
        info!(%peer, session = %id, "Client connected");
        (id, rx)
    }

    /// Tear down the current session, if any. Safe to call repeatedly and from any task.
    pub fn disconnect(&self) {
        let session = self.inner.session.lock().take();
        let task = {
            let mut hb = self.inner.heartbeat.lock();
            hb.monitor.deactivate();
            hb.task.take()
        };
        if let Some(t) = task {
            t.abort();
        }
        if let Some(s) = session {
            info!(peer = %s.peer, session = %s.id, "Client disconnected");
        }
    }

    /// Disconnect only if `id` is still the current session.
    pub fn disconnect_session(&self, id: Uuid) {
        if self.is_current(id) {
            self.disconnect();
        }
    }

    /// Stop accepting and drop the client.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.disconnect();
    }

    /// Begin probing the client. Returns false when already probing or nobody is connected.
    pub fn start_heartbeat(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let mut hb = self.inner.heartbeat.lock();
        if !hb.monitor.activate(now()) {
            return false;
        }
        if let Some(old) = hb.task.take() {
            old.abort();
        }
        hb.task = Some(tokio::spawn(heartbeat::run(self.clone())));
        info!("heartbeat started");
        true
    }

    pub fn heartbeat_tick(&self) -> Tick {
        self.inner.heartbeat.lock().monitor.tick(now(), &Local::now())
    }

    pub fn on_live_check_ack(&self, id: &str) -> AckOutcome {
        self.inner.heartbeat.lock().monitor.on_ack(id, now())
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.inner.heartbeat.lock().monitor.state()
    }
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Accept loop. While a client is connected no new connection is accepted; pending ones wait
/// in the backlog until the session ends.
pub async fn serve(listener: TcpListener, manager: SessionManager, dispatcher: Arc<Dispatcher>) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening for client");
    }
    while manager.is_running() {
        if manager.is_connected() {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }
        match tokio::time::timeout(POLL_INTERVAL, listener.accept()).await {
            Err(_) => continue,
            Ok(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(%peer, error = %e, "set_nodelay failed");
                }
                let (id, rx) = manager.attach(peer);
                let (reader, writer) = stream.into_split();
                tokio::spawn(write_loop(writer, rx, manager.clone(), id));
                tokio::spawn(read_loop(reader, manager.clone(), dispatcher.clone(), id));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
    info!("accept loop stopped");
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    manager: SessionManager,
    id: Uuid,
) {
    while let Some(bytes) = rx.recv().await {
        let failure = match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(&bytes)).await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "timed out".to_string(),
        };
        warn!(error = %failure, "write to client failed");
        manager.disconnect_session(id);
        break;
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    manager: SessionManager,
    dispatcher: Arc<Dispatcher>,
    id: Uuid,
) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];
    while manager.is_current(id) {
        match tokio::time::timeout(POLL_INTERVAL, reader.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                debug!("client closed the connection");
                manager.disconnect_session(id);
                break;
            }
            Ok(Ok(n)) => {
                if let FeedOutcome::Overflowed { dropped } = framer.feed(&buf[..n]) {
                    warn!(dropped, "discarded oversized partial line");
                }
                for line in framer.drain() {
                    dispatcher.dispatch(&line);
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "read from client failed");
                manager.disconnect_session(id);
                break;
            }
        }
    }
}
