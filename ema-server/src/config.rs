//! Load config from file and environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use ema_core::heartbeat::{Cadence, HeartbeatConfig, NightCadence};
use ema_core::scheduler::{DailyWindow, PlannerConfig, WindowError};
use serde::Deserialize;

/// Daemon configuration. File: $EMA_CONFIG, ~/.config/ema/config.toml or /etc/ema/config.toml.
/// Env overrides: EMA_BIND, EMA_PORT, EMA_LOG_DIR, EMA_TEST_MODE, EMA_BCI.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address (default 127.0.0.1).
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Listen port (default 4100).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root of the server, session, diagnostic and report logs (default ./logs).
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Arm the prompt scheduler at startup instead of waiting for the `start` command.
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub diagnostic: DiagnosticSection,
    #[serde(default)]
    pub features: FeatureSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
    /// Optional reduced cadence inside a daily window; unset means the day cadence always applies.
    #[serde(default)]
    pub night: Option<NightSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NightSection {
    /// "HH:MM"
    pub start: String,
    /// "HH:MM"; may be earlier than `start` (window wraps midnight).
    pub end: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingSection {
    #[serde(default = "default_poll_interval")]
    pub battery_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub presence_interval_secs: u64,
    #[serde(default = "default_open_hour")]
    pub presence_open_hour: u32,
    #[serde(default = "default_close_hour")]
    pub presence_close_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSection {
    #[serde(default = "default_open_hour")]
    pub open_hour: u32,
    #[serde(default = "default_close_hour")]
    pub close_hour: u32,
    #[serde(default = "default_min_delay")]
    pub min_delay_minutes: i64,
    #[serde(default = "default_max_delay")]
    pub max_delay_minutes: i64,
    /// How long the prompt alert plays before the prompt counts as ignored.
    #[serde(default = "default_alert_window")]
    pub alert_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticSection {
    #[serde(default = "default_flash_interval")]
    pub flash_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSection {
    #[serde(default = "default_true")]
    pub test_mode: bool,
    #[serde(default)]
    pub bci: bool,
    /// Label reported by the device integration; unset means the integration is unavailable.
    #[serde(default)]
    pub device_label: Option<String>,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_port() -> u16 {
    4100
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_heartbeat_interval() -> u64 {
    3
}
fn default_heartbeat_timeout() -> u64 {
    100
}
fn default_poll_interval() -> u64 {
    1800
}
fn default_open_hour() -> u32 {
    9
}
fn default_close_hour() -> u32 {
    21
}
fn default_min_delay() -> i64 {
    90
}
fn default_max_delay() -> i64 {
    150
}
fn default_alert_window() -> u64 {
    120
}
fn default_flash_interval() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            timeout_secs: default_heartbeat_timeout(),
            night: None,
        }
    }
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            battery_interval_secs: default_poll_interval(),
            presence_interval_secs: default_poll_interval(),
            presence_open_hour: default_open_hour(),
            presence_close_hour: default_close_hour(),
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            open_hour: default_open_hour(),
            close_hour: default_close_hour(),
            min_delay_minutes: default_min_delay(),
            max_delay_minutes: default_max_delay(),
            alert_window_secs: default_alert_window(),
        }
    }
}

impl Default for DiagnosticSection {
    fn default() -> Self {
        Self {
            flash_interval_ms: default_flash_interval(),
        }
    }
}

impl Default for FeatureSection {
    fn default() -> Self {
        Self {
            test_mode: true,
            bci: false,
            device_label: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            log_dir: default_log_dir(),
            autostart: false,
            heartbeat: HeartbeatSection::default(),
            polling: PollingSection::default(),
            schedule: ScheduleSection::default(),
            diagnostic: DiagnosticSection::default(),
            features: FeatureSection::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid time {value:?} for {field} (expected HH:MM)")]
    BadTime { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error(transparent)]
    Window(#[from] WindowError),
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn heartbeat_config(&self) -> Result<HeartbeatConfig, ConfigError> {
        let hb = &self.heartbeat;
        let day = cadence(hb.interval_secs, hb.timeout_secs)?;
        let night = match &hb.night {
            Some(n) => Some(NightCadence {
                start: parse_hhmm("heartbeat.night.start", &n.start)?,
                end: parse_hhmm("heartbeat.night.end", &n.end)?,
                cadence: cadence(n.interval_secs, n.timeout_secs)?,
            }),
            None => None,
        };
        Ok(HeartbeatConfig { day, night })
    }

    pub fn planner_config(&self) -> Result<PlannerConfig, ConfigError> {
        let s = &self.schedule;
        let window = DailyWindow::new(s.open_hour, s.close_hour)?;
        Ok(PlannerConfig::new(
            window,
            s.min_delay_minutes,
            s.max_delay_minutes,
        )?)
    }

    pub fn presence_window(&self) -> Result<DailyWindow, ConfigError> {
        Ok(DailyWindow::new(
            self.polling.presence_open_hour,
            self.polling.presence_close_hour,
        )?)
    }

    pub fn battery_interval(&self) -> Duration {
        Duration::from_secs(self.polling.battery_interval_secs.max(1))
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.polling.presence_interval_secs.max(1))
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_secs(self.schedule.alert_window_secs)
    }

    pub fn flash_interval(&self) -> Duration {
        Duration::from_millis(self.diagnostic.flash_interval_ms.max(1))
    }

    /// Check every derived value once so a bad file fails at startup, not at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heartbeat_config()?;
        self.planner_config()?;
        self.presence_window()?;
        Ok(())
    }
}

fn cadence(interval_secs: u64, timeout_secs: u64) -> Result<Cadence, ConfigError> {
    if interval_secs == 0 {
        return Err(ConfigError::Zero("heartbeat interval"));
    }
    if timeout_secs == 0 {
        return Err(ConfigError::Zero("heartbeat timeout"));
    }
    Ok(Cadence {
        interval: Duration::from_secs(interval_secs),
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn parse_hhmm(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::BadTime {
        field,
        value: value.to_string(),
    })
}

/// Load config: default, then config file (explicit path or first existing default path), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("EMA_CONFIG").map(PathBuf::from));
    let mut c = match explicit {
        Some(p) => read_file(&p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => read_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    c.validate()?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("EMA_BIND") {
        if let Ok(a) = s.parse::<IpAddr>() {
            c.bind = a;
        }
    }
    if let Some(s) = var("EMA_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Some(s) = var("EMA_LOG_DIR") {
        if !s.is_empty() {
            c.log_dir = PathBuf::from(s);
        }
    }
    if let Some(b) = var("EMA_TEST_MODE").and_then(|s| parse_flag(&s)) {
        c.features.test_mode = b;
    }
    if let Some(b) = var("EMA_BCI").and_then(|s| parse_flag(&s)) {
        c.features.bci = b;
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/ema/config.toml"));
    }
    out.push(PathBuf::from("/etc/ema/config.toml"));
    out
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_production_values() {
        let c = Config::default();
        assert_eq!(c.listen_addr(), "127.0.0.1:4100".parse().unwrap());
        let hb = c.heartbeat_config().unwrap();
        assert_eq!(hb.day.interval, Duration::from_secs(3));
        assert_eq!(hb.day.timeout, Duration::from_secs(100));
        assert!(hb.night.is_none());
        assert_eq!(c.planner_config().unwrap(), PlannerConfig::default());
        assert_eq!(c.battery_interval(), Duration::from_secs(1800));
        assert_eq!(c.alert_window(), Duration::from_secs(120));
        assert!(c.features.test_mode);
        assert!(!c.features.bci);
    }

    #[test]
    fn parses_file_with_sections() {
        let c: Config = toml::from_str(
            r#"
            bind = "0.0.0.0"
            port = 5000
            autostart = true

            [heartbeat]
            interval_secs = 5

            [heartbeat.night]
            start = "21:30"
            end = "08:30"
            interval_secs = 900
            timeout_secs = 1400

            [features]
            bci = true
            device_label = "S01"
            "#,
        )
        .unwrap();
        assert_eq!(c.port, 5000);
        assert!(c.autostart);
        let hb = c.heartbeat_config().unwrap();
        assert_eq!(hb.day.interval, Duration::from_secs(5));
        assert_eq!(hb.day.timeout, Duration::from_secs(100));
        let night = hb.night.unwrap();
        assert_eq!(night.start, NaiveTime::from_hms_opt(21, 30, 0).unwrap());
        assert_eq!(night.cadence.timeout, Duration::from_secs(1400));
        assert!(c.features.bci);
        assert!(c.features.test_mode);
        assert_eq!(c.features.device_label.as_deref(), Some("S01"));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(toml::from_str::<Config>("prot = 1").is_err());
        assert!(toml::from_str::<Config>("[schedule]\nopen = 9").is_err());
    }

    #[test]
    fn validate_catches_bad_values() {
        let mut c = Config::default();
        c.schedule.open_hour = 22;
        assert!(matches!(c.validate(), Err(ConfigError::Window(_))));

        let mut c = Config::default();
        c.heartbeat.night = Some(NightSection {
            start: "9pm".into(),
            end: "08:00".into(),
            interval_secs: 900,
            timeout_secs: 1400,
        });
        assert!(matches!(c.validate(), Err(ConfigError::BadTime { .. })));

        let mut c = Config::default();
        c.heartbeat.interval_secs = 0;
        assert!(matches!(c.validate(), Err(ConfigError::Zero(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("EMA_PORT", "4200"),
            ("EMA_BIND", "0.0.0.0"),
            ("EMA_TEST_MODE", "off"),
            ("EMA_BCI", "1"),
            ("EMA_LOG_DIR", "/var/log/ema"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.port, 4200);
        assert_eq!(c.bind, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(!c.features.test_mode);
        assert!(c.features.bci);
        assert_eq!(c.log_dir, PathBuf::from("/var/log/ema"));
    }

    #[test]
    fn env_garbage_is_ignored() {
        let mut c = Config::default();
        apply_env(&mut c, |k| match k {
            "EMA_PORT" => Some("not-a-port".into()),
            "EMA_BCI" => Some("maybe".into()),
            _ => None,
        });
        assert_eq!(c.port, 4100);
        assert!(!c.features.bci);
    }

    #[test]
    fn explicit_file_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(matches!(read_file(&path), Err(ConfigError::Read { .. })));
        std::fs::write(&path, "port = \"x\"").unwrap();
        assert!(matches!(read_file(&path), Err(ConfigError::Parse { .. })));
        std::fs::write(&path, "port = 4300").unwrap();
        assert_eq!(read_file(&path).unwrap().port, 4300);
    }
}
