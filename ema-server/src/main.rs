// EMA server: one companion client over TCP, prompt scheduling, heartbeat and health polls.

mod alert;
mod app;
mod collaborators;
mod config;
mod console;
mod diagnostic;
mod dispatcher;
mod heartbeat;
mod logging;
mod poller;
mod scheduler;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ema-server {}", VERSION);
                return Ok(());
            }
            "--config" => {
                let p = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(p));
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    let cfg = config::load(config_path.as_deref()).context("loading config")?;
    let dirs = logging::LogDirs::create(&cfg.log_dir)
        .with_context(|| format!("creating log directories under {}", cfg.log_dir.display()))?;
    let _guard = logging::init(&dirs).context("initialising logging")?;
    info!(version = VERSION, addr = %cfg.listen_addr(), "ema-server starting");

    let rt = tokio::runtime::Runtime::new().context("starting runtime")?;
    rt.block_on(run(cfg, dirs))
}

async fn run(cfg: config::Config, dirs: logging::LogDirs) -> anyhow::Result<()> {
    let addr = cfg.listen_addr();
    let autostart = cfg.autostart;
    let app = Arc::new(app::App::new(cfg, &dirs).context("building components")?);

    let listener = session::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    let server = tokio::spawn(session::serve(
        listener,
        app.manager.clone(),
        app.dispatcher.clone(),
    ));
    app.spawn_pollers().context("starting health polls")?;
    if autostart {
        app.scheduler.schedule_next();
    }

    tokio::select! {
        r = shutdown_signal() => {
            if let Err(e) = r {
                error!(error = %e, "signal handler failed");
            }
        }
        _ = console::run(app.clone()) => {}
    }

    info!("shutting down");
    app.shutdown();
    let _ = server.await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
