//! Operator console on stdin.

use std::sync::Arc;

use ema_core::{Command, Feature};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::app::App;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Skip,
    Battery,
    FlashStart,
    FlashStop,
    SetFeature(Feature, bool),
    Send(String),
    Status,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str =
    "commands: start | skip | battery | flash start|stop | bci on|off | test on|off | send <text> | status | quit";

pub fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    match word {
        "" => Err(ParseError::Empty),
        "start" => Ok(ConsoleCommand::Start),
        "skip" => Ok(ConsoleCommand::Skip),
        "battery" => Ok(ConsoleCommand::Battery),
        "status" => Ok(ConsoleCommand::Status),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "flash" => match rest {
            "start" => Ok(ConsoleCommand::FlashStart),
            "stop" => Ok(ConsoleCommand::FlashStop),
            _ => Err(ParseError::Usage("flash start|stop")),
        },
        "bci" | "test" => {
            let feature = word
                .parse::<Feature>()
                .map_err(|e| ParseError::Unknown(e.0))?;
            match rest {
                "on" => Ok(ConsoleCommand::SetFeature(feature, true)),
                "off" => Ok(ConsoleCommand::SetFeature(feature, false)),
                _ => Err(ParseError::Usage("bci|test on|off")),
            }
        }
        "send" if !rest.is_empty() => Ok(ConsoleCommand::Send(rest.to_string())),
        "send" => Err(ParseError::Usage("send <text>")),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// Run one command. Returns false when the operator asked to quit.
pub fn execute(app: &App, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Start => app.scheduler.start_session(),
        ConsoleCommand::Skip => app.skip(),
        ConsoleCommand::Battery => {
            app.check_battery();
        }
        ConsoleCommand::FlashStart => {
            if !app.flash.start() {
                info!("flash sequence not started");
            }
        }
        ConsoleCommand::FlashStop => app.flash.stop(),
        ConsoleCommand::SetFeature(feature, on) => app.set_feature(feature, on),
        ConsoleCommand::Send(text) => {
            if let Err(e) = app.manager.send(&Command::Raw(text)) {
                warn!(error = %e, "message not sent");
            }
        }
        ConsoleCommand::Status => info!("{}", app.status()),
        ConsoleCommand::Quit => return false,
    }
    true
}

/// Read commands until `quit`. A closed stdin leaves the daemon running.
pub async fn run(app: Arc<App>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("{}", HELP);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse(&line) {
                Ok(cmd) => {
                    if !execute(&app, cmd) {
                        return;
                    }
                }
                Err(ParseError::Empty) => {}
                Err(e) => warn!("{}; {}", e, HELP),
            },
            Ok(None) => {
                info!("stdin closed, console disabled");
                std::future::pending::<()>().await;
            }
            Err(e) => {
                warn!(error = %e, "console read failed, console disabled");
                std::future::pending::<()>().await;
            }
        }
    }
}
