//! Routes classified client lines to their side effects.

use std::sync::Arc;

use ema_core::{classify, AckOutcome, CounterEvent, Feature, Message};
use tracing::{debug, info, warn};

use crate::collaborators::Capabilities;
use crate::logging::{LogError, SessionLog};
use crate::session::SessionManager;

pub struct Dispatcher {
    manager: SessionManager,
    caps: Capabilities,
    session_log: Arc<SessionLog>,
}

impl Dispatcher {
    pub fn new(manager: SessionManager, caps: Capabilities, session_log: Arc<SessionLog>) -> Self {
        Self {
            manager,
            caps,
            session_log,
        }
    }

    /// Handle one framed line. Returns the message it was classified as, or None for blank
    /// and malformed lines (which are logged and dropped).
    pub fn dispatch(&self, line: &str) -> Option<Message> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let parsed = match classify(line) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed line");
                return None;
            }
        };
        debug!(kind = parsed.message.kind(), raw = %parsed.raw, "received");
        self.apply(&parsed.message);
        Some(parsed.message)
    }

    fn apply(&self, message: &Message) {
        match message {
            Message::ClientReady => {
                info!("client ready");
                if !self.manager.start_heartbeat() {
                    debug!("heartbeat already running");
                }
            }
            Message::SessionAck => {
                info!("session acknowledged by client");
                self.caps.alert.stop();
                self.caps.counters.record(CounterEvent::Responded);
            }
            Message::SessionComplete => {
                info!("session completed by client");
                self.caps.counters.record(CounterEvent::Completed);
            }
            Message::Battery { level, status } => {
                let pct = (level * 100.0) as i64;
                info!("Battery Level: {}, Status: {}", pct, status);
            }
            Message::LiveCheckAck { id, latency_ms } => {
                match self.manager.on_live_check_ack(id) {
                    AckOutcome::Matched => match latency_ms {
                        Some(ms) => info!("Received LIVE_CHECK_ACK:{} - Latency: {:.3} ms", id, ms),
                        None => info!("Received LIVE_CHECK_ACK:{}", id),
                    },
                    AckOutcome::Unexpected { expected } => {
                        warn!(
                            got = %id,
                            expected = expected.as_deref().unwrap_or("none"),
                            "LIVE_CHECK_ACK with unexpected ID"
                        );
                    }
                }
            }
            Message::DeviceSync { payload } => {
                if !self.caps.features.is_enabled(Feature::Bci) {
                    debug!(%payload, "device sync ignored, bci disabled");
                    return;
                }
                if let Err(e) = self.caps.device.forward(payload) {
                    warn!(error = %e, "device sync not forwarded");
                }
            }
            Message::FreeformLog { text } => match self.session_log.append(text) {
                Ok(()) => {}
                Err(LogError::NotOpened) => {
                    warn!(line = %text, "session content before any session log was opened");
                }
                Err(e) => warn!(error = %e, "session log write failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::Doubles;
    use ema_core::HeartbeatConfig;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn captured(f: impl FnOnce()) -> String {
        let cap = Capture::default();
        let writer = cap.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        cap.text()
    }

    struct Fixture {
        doubles: Doubles,
        manager: SessionManager,
        log: Arc<SessionLog>,
        dispatcher: Dispatcher,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let doubles = Doubles::new();
        let manager = SessionManager::new(HeartbeatConfig::default());
        let log = Arc::new(SessionLog::new(dir.path()));
        let dispatcher = Dispatcher::new(manager.clone(), doubles.capabilities(), log.clone());
        Fixture {
            doubles,
            manager,
            log,
            dispatcher,
            _dir: dir,
        }
    }

    #[test]
    fn ack_and_complete_update_counters() {
        let f = fixture();
        assert_eq!(f.dispatcher.dispatch("EMA_Session_ACK"), Some(Message::SessionAck));
        f.dispatcher.dispatch("Session_Complete");
        assert_eq!(*f.doubles.alert.stops.lock(), 1);
        assert_eq!(f.doubles.counters.count(CounterEvent::Responded), 1);
        assert_eq!(f.doubles.counters.count(CounterEvent::Completed), 1);
    }

    #[test]
    fn blank_and_malformed_lines_are_dropped() {
        let f = fixture();
        assert_eq!(f.dispatcher.dispatch("   "), None);
        assert_eq!(f.dispatcher.dispatch("BATTERY:0.5"), None);
        assert_eq!(f.dispatcher.dispatch("BATTERY:abc:Charging"), None);
    }

    #[test]
    fn battery_logged_as_percentage() {
        let f = fixture();
        let out = captured(|| {
            f.dispatcher.dispatch("BATTERY:0.87:Charging");
        });
        assert!(out.contains("Battery Level: 87, Status: Charging"), "{out}");
    }

    #[test]
    fn device_sync_forwarded_only_with_bci() {
        let f = fixture();
        f.dispatcher.dispatch("BCI_Sync:Q1_shown");
        assert!(f.doubles.device.forwarded.lock().is_empty());
        f.doubles.flags.set(Feature::Bci, true);
        f.dispatcher.dispatch("BCI_Sync:Q1_shown");
        assert_eq!(*f.doubles.device.forwarded.lock(), vec!["Q1_shown".to_string()]);
        f.doubles
            .device
            .fail
            .store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(f.dispatcher.dispatch("BCI_Sync:Q2_shown").is_some());
    }

    #[test]
    fn freeform_needs_an_open_session_log() {
        let f = fixture();
        let out = captured(|| {
            f.dispatcher.dispatch("Q1: 3");
        });
        assert!(out.contains("before any session log was opened"), "{out}");

        let path = f.log.open(None).unwrap();
        f.dispatcher.dispatch("Q1: 3");
        f.dispatcher.dispatch("SOMETHING_ELSE:1:2");
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(lines, vec!["Q1: 3", "SOMETHING_ELSE:1:2"]);
    }

    #[tokio::test]
    async fn framed_stream_dispatches_in_order() {
        let f = fixture();
        let (_id, _rx) = f.manager.attach("127.0.0.1:6000".parse().unwrap());
        let mut framer = ema_core::LineFramer::new();
        framer.feed(b"CLIENT_READY\nBATTERY:0.73:Char");
        framer.feed(b"ging\n");
        let got: Vec<Message> = framer
            .drain()
            .filter_map(|l| f.dispatcher.dispatch(&l))
            .collect();
        assert_eq!(
            got,
            vec![
                Message::ClientReady,
                Message::Battery {
                    level: 0.73,
                    status: "Charging".into()
                }
            ]
        );
        assert_eq!(f.manager.heartbeat_state(), ema_core::HeartbeatState::Active);
        f.manager.disconnect();
    }

    #[tokio::test]
    async fn matching_ack_logs_latency_and_stale_ack_warns() {
        let f = fixture();
        let (_id, mut rx) = f.manager.attach("127.0.0.1:6000".parse().unwrap());
        assert_eq!(f.dispatcher.dispatch("CLIENT_READY"), Some(Message::ClientReady));
        let probe = String::from_utf8(rx.recv().await.unwrap()).unwrap();
        assert!(probe.starts_with("LIVE_CHECK:0:"));

        let out = captured(|| {
            f.dispatcher.dispatch("LIVE_CHECK_ACK:0:LATENCY:42.5");
        });
        assert!(out.contains("Received LIVE_CHECK_ACK:0 - Latency: 42.500 ms"), "{out}");

        let out = captured(|| {
            f.dispatcher.dispatch("LIVE_CHECK_ACK:5");
        });
        assert!(out.contains("unexpected ID"), "{out}");
        f.manager.disconnect();
    }
}
