// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fmd: the Foreman daemon binary.

use clap::Parser;
use fm_bus::MemoryBus;
use fm_core::SystemClock;
use fm_daemon::config::DaemonConfig;
use fm_daemon::handler::HandlerRegistry;
use fm_daemon::lifecycle::{self, DaemonDeps, StartupResult};
use fm_daemon::workers::NoopControlPlane;
use fm_store::MemoryStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fmd", version, about = "Foreman task control-plane daemon")]
struct Args {
    /// Path to a foreman.toml configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the state directory
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Log to stderr instead of the daemon log file
    #[arg(long)]
    foreground: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            // drain timeout hit; abandoned tasks will be redelivered
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("fmd: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = DaemonConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.state_dir {
        config.state_dir = Some(dir);
    }
    let state_dir = config.resolve_state_dir()?;
    std::fs::create_dir_all(&state_dir)?;

    let _log_guard = init_logging(&state_dir, args.foreground);

    // In-process adapters; broker- and store-backed ones implement the
    // same traits and slot in here.
    let handlers = Arc::new(HandlerRegistry::new());
    register_builtin_handlers(&handlers);
    let deps = DaemonDeps {
        bus: Arc::new(MemoryBus::new()),
        store: Arc::new(MemoryStore::new(SystemClock)),
        control: Arc::new(NoopControlPlane),
        handlers,
    };

    let StartupResult { daemon, listener } = lifecycle::startup(config, deps).await?;
    tokio::spawn(listener.run());

    // Signal readiness to wrappers that wait for it.
    println!("READY");

    let shutdown = Arc::clone(&daemon.shutdown);
    tokio::select! {
        _ = shutdown.notified() => info!("shutdown requested by client"),
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("signal handler failed: {e}");
            }
            info!("interrupt received");
        }
    }

    Ok(daemon.shutdown().await)
}

/// Handlers compiled into the daemon. Deployments register their own
/// kinds through the library API; `echo` stays for smoke tests.
fn register_builtin_handlers(handlers: &HandlerRegistry) {
    handlers.register_fn("echo", |payload, _cancel| async move { Ok(payload.data) });
}

fn init_logging(state_dir: &std::path::Path, foreground: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if foreground {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        None
    } else {
        let appender = tracing_appender::rolling::never(state_dir, "daemon.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).init();
        Some(guard)
    }
}
