//! Tracing setup plus the flat append-only logs: per-session message log and diagnostic log.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Millisecond-resolution local timestamp used by every log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Log directory layout under the configured root.
#[derive(Debug, Clone)]
pub struct LogDirs {
    pub server: PathBuf,
    pub session: PathBuf,
    pub diagnostic: PathBuf,
    pub report: PathBuf,
}

impl LogDirs {
    pub fn create(root: &Path) -> io::Result<Self> {
        let dirs = Self {
            server: root.join("server_log"),
            session: root.join("ema_log"),
            diagnostic: root.join("latency_log"),
            report: root.join("email_report"),
        };
        for d in [&dirs.server, &dirs.session, &dirs.diagnostic, &dirs.report] {
            std::fs::create_dir_all(d)?;
        }
        Ok(dirs)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// Install the global subscriber: stdout plus a fresh server log file. Keep the guard alive
/// for the life of the process or buffered lines are lost.
pub fn init(dirs: &LogDirs) -> Result<WorkerGuard, InitError> {
    let path = dirs.server.join(format!(
        "server_log_{}.txt",
        Local::now().format(FILE_STAMP_FORMAT)
    ));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| InitError::Io {
            path: path.clone(),
            source,
        })?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_target(false),
        )
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| InitError::Configure(e.to_string()))?;
    Ok(guard)
}

fn stamp_line(message: &str) -> String {
    format!("{} - {}", Local::now().format(TIMESTAMP_FORMAT), message)
}

#[derive(thiserror::Error, Debug)]
pub enum LogError {
    /// Session content arrived before any session-start opened a log.
    #[error("no session log is open yet")]
    NotOpened,
    #[error(transparent)]
    Io(#[from] io::Error),
}

struct OpenLog {
    path: PathBuf,
    file: File,
}

/// Message log for the current prompt session. Lines are written verbatim; a log exists
/// only after `open`, never implicitly.
pub struct SessionLog {
    dir: PathBuf,
    current: Mutex<Option<OpenLog>>,
}

impl SessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    /// Start a new log file, replacing the current one. `label` prefixes the file name.
    pub fn open(&self, label: Option<&str>) -> io::Result<PathBuf> {
        let now = Local::now();
        let name = match label {
            Some(l) => format!("{}_EMA_log_{}.txt", l, now.format(FILE_STAMP_FORMAT)),
            None => format!("EMA_log_{}.txt", now.format(FILE_STAMP_FORMAT)),
        };
        let path = self.dir.join(name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "New EMA session log started at {}",
            now.format("%Y-%m-%d %H:%M:%S")
        )?;
        *self.current.lock() = Some(OpenLog {
            path: path.clone(),
            file,
        });
        Ok(path)
    }

    pub fn append(&self, line: &str) -> Result<(), LogError> {
        let mut current = self.current.lock();
        let log = current.as_mut().ok_or(LogError::NotOpened)?;
        writeln!(log.file, "{}", line.trim())?;
        Ok(())
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.current.lock().as_ref().map(|l| l.path.clone())
    }
}

/// Append-only log whose lines carry a millisecond timestamp. The file is created on first write.
pub struct TimestampedLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl TimestampedLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// New log in `dir` named `<prefix>_<YYYYmmdd_HHMMSS>.txt`.
    pub fn in_dir(dir: &Path, prefix: &str) -> Self {
        Self::new(dir.join(format!(
            "{}_{}.txt",
            prefix,
            Local::now().format(FILE_STAMP_FORMAT)
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, message: &str) -> io::Result<()> {
        let mut slot = self.file.lock();
        if slot.is_none() {
            *slot = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        match slot.as_mut() {
            Some(f) => writeln!(f, "{}", stamp_line(message)),
            None => Ok(()),
        }
    }
}
