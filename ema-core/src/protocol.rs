//! Line protocol: inbound message kinds, outbound commands, line classifier.

use std::fmt;

/// Inbound message kinds. Anything unrecognized is session content (`FreeformLog`).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client finished its own setup; heartbeat may start.
    ClientReady,
    /// Client acknowledged an assessment prompt.
    SessionAck,
    /// Client finished the whole assessment.
    SessionComplete,
    /// Battery telemetry: level in 0..1 and a free-text charging status.
    Battery { level: f64, status: String },
    /// Reply to a liveness probe, optionally carrying the client-measured latency.
    LiveCheckAck { id: String, latency_ms: Option<f64> },
    /// Marker destined for the external device integration.
    DeviceSync { payload: String },
    /// Session content, logged verbatim.
    FreeformLog { text: String },
}

impl Message {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClientReady => "client_ready",
            Message::SessionAck => "session_ack",
            Message::SessionComplete => "session_complete",
            Message::Battery { .. } => "battery",
            Message::LiveCheckAck { .. } => "live_check_ack",
            Message::DeviceSync { .. } => "device_sync",
            Message::FreeformLog { .. } => "freeform_log",
        }
    }
}

/// A classified line together with the raw text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub raw: String,
    pub message: Message,
}

/// A line that looked like a known message but whose fields did not parse.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed BATTERY line: {0:?}")]
    MalformedBattery(String),
    #[error("malformed LIVE_CHECK_ACK line: {0:?}")]
    MalformedLiveCheckAck(String),
}

const CLIENT_READY: &str = "CLIENT_READY";
const SESSION_ACK: &str = "EMA_Session_ACK";
const SESSION_COMPLETE: &str = "Session_Complete";
const BATTERY_PREFIX: &str = "BATTERY";
const LIVE_CHECK_ACK_PREFIX: &str = "LIVE_CHECK_ACK";
const LIVE_CHECK_TOKEN: &str = "LIVE_CHECK";
const DEVICE_SYNC_PREFIX: &str = "BCI_Sync:";
const LATENCY_TAG: &str = "LATENCY";

/// Classify one trimmed line. Exact matches win over prefixes; the fallback is `FreeformLog`.
pub fn classify(line: &str) -> Result<ProtocolMessage, ProtocolError> {
    let message = match line {
        CLIENT_READY => Message::ClientReady,
        SESSION_ACK => Message::SessionAck,
        SESSION_COMPLETE => Message::SessionComplete,
        l if l.starts_with(BATTERY_PREFIX) => parse_battery(l)?,
        l if l.starts_with(LIVE_CHECK_ACK_PREFIX) => parse_live_check_ack(l)?,
        l if l.starts_with(DEVICE_SYNC_PREFIX) => Message::DeviceSync {
            payload: l[DEVICE_SYNC_PREFIX.len()..].to_string(),
        },
        l => Message::FreeformLog {
            text: l.to_string(),
        },
    };
    Ok(ProtocolMessage {
        raw: line.to_string(),
        message,
    })
}

fn parse_battery(line: &str) -> Result<Message, ProtocolError> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() < 3 {
        return Err(ProtocolError::MalformedBattery(line.to_string()));
    }
    let level: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| ProtocolError::MalformedBattery(line.to_string()))?;
    if !level.is_finite() {
        return Err(ProtocolError::MalformedBattery(line.to_string()));
    }
    Ok(Message::Battery {
        level,
        status: parts[2].trim().to_string(),
    })
}

fn parse_live_check_ack(line: &str) -> Result<Message, ProtocolError> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() < 2 {
        return Err(ProtocolError::MalformedLiveCheckAck(line.to_string()));
    }
    let id = parts[1].replace(LIVE_CHECK_TOKEN, "").trim().to_string();
    // An unparsable latency still counts as an ack; only the number is lost.
    let latency_ms = if parts.len() >= 4 && parts[2] == LATENCY_TAG {
        parts[3].trim().parse::<f64>().ok()
    } else {
        None
    };
    Ok(Message::LiveCheckAck { id, latency_ms })
}

/// Outbound commands. Each is written as exactly one `\n`-terminated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartTest,
    StartLive,
    Skip,
    Battery,
    LiveCheck { id: String, epoch_millis: i64 },
    FlashStart,
    FlashOn,
    FlashOff,
    FlashEnd,
    /// Operator-typed text, sent as is.
    Raw(String),
}

impl Command {
    /// Encode as wire bytes, newline included.
    pub fn to_line(&self) -> Vec<u8> {
        let mut out = self.to_string().into_bytes();
        out.push(b'\n');
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::StartTest => f.write_str("EMA_START_Test"),
            Command::StartLive => f.write_str("EMA_START_Live"),
            Command::Skip => f.write_str("EMA_SKIP"),
            Command::Battery => f.write_str("BATTERY"),
            Command::LiveCheck { id, epoch_millis } => {
                write!(f, "{}:{}:{}", LIVE_CHECK_TOKEN, id, epoch_millis)
            }
            Command::FlashStart => f.write_str("FLASH_START"),
            Command::FlashOn => f.write_str("FLASH_ON"),
            Command::FlashOff => f.write_str("FLASH_OFF"),
            Command::FlashEnd => f.write_str("FLASH_END"),
            Command::Raw(text) => f.write_str(text.trim_end_matches('\n')),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(line: &str) -> Message {
        classify(line).unwrap().message
    }

    #[test]
    fn exact_matches() {
        assert_eq!(kind("CLIENT_READY"), Message::ClientReady);
        assert_eq!(kind("EMA_Session_ACK"), Message::SessionAck);
        assert_eq!(kind("Session_Complete"), Message::SessionComplete);
    }

    #[test]
    fn exact_match_is_case_sensitive() {
        assert!(matches!(kind("client_ready"), Message::FreeformLog { .. }));
        assert!(matches!(
            kind("CLIENT_READY_NOW"),
            Message::FreeformLog { .. }
        ));
    }

    #[test]
    fn battery_parses_level_and_status() {
        assert_eq!(
            kind("BATTERY:0.73:Charging"),
            Message::Battery {
                level: 0.73,
                status: "Charging".into()
            }
        );
    }

    #[test]
    fn battery_malformed_is_error() {
        assert!(matches!(
            classify("BATTERY:0.5"),
            Err(ProtocolError::MalformedBattery(_))
        ));
        assert!(matches!(
            classify("BATTERY:full:Charging"),
            Err(ProtocolError::MalformedBattery(_))
        ));
        assert!(classify("BATTERY").is_err());
    }

    #[test]
    fn live_check_ack_with_latency() {
        assert_eq!(
            kind("LIVE_CHECK_ACK:7:LATENCY:42.5"),
            Message::LiveCheckAck {
                id: "7".into(),
                latency_ms: Some(42.5)
            }
        );
    }

    #[test]
    fn live_check_ack_strips_token_from_id() {
        assert_eq!(
            kind("LIVE_CHECK_ACK:LIVE_CHECK12"),
            Message::LiveCheckAck {
                id: "12".into(),
                latency_ms: None
            }
        );
    }

    #[test]
    fn live_check_ack_bad_latency_is_absent() {
        assert_eq!(
            kind("LIVE_CHECK_ACK:3:LATENCY:fast"),
            Message::LiveCheckAck {
                id: "3".into(),
                latency_ms: None
            }
        );
        assert_eq!(
            kind("LIVE_CHECK_ACK:3:OTHER:9"),
            Message::LiveCheckAck {
                id: "3".into(),
                latency_ms: None
            }
        );
    }

    #[test]
    fn live_check_ack_without_id_is_error() {
        assert!(matches!(
            classify("LIVE_CHECK_ACK"),
            Err(ProtocolError::MalformedLiveCheckAck(_))
        ));
    }

    #[test]
    fn device_sync_keeps_payload() {
        assert_eq!(
            kind("BCI_Sync:marker:3"),
            Message::DeviceSync {
                payload: "marker:3".into()
            }
        );
    }

    #[test]
    fn unknown_line_is_freeform() {
        let pm = classify("Q1: 4 (slider)").unwrap();
        assert_eq!(pm.raw, "Q1: 4 (slider)");
        assert_eq!(
            pm.message,
            Message::FreeformLog {
                text: "Q1: 4 (slider)".into()
            }
        );
    }

    #[test]
    fn command_lines() {
        assert_eq!(Command::StartLive.to_line(), b"EMA_START_Live\n");
        assert_eq!(
            Command::LiveCheck {
                id: "7".into(),
                epoch_millis: 1_700_000_000_123
            }
            .to_string(),
            "LIVE_CHECK:7:1700000000123"
        );
        assert_eq!(Command::Raw("hello\n".into()).to_line(), b"hello\n");
    }
}
