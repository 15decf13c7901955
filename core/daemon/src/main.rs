//! Pulse daemon entrypoint.
//!
//! Runs the session poller on its own thread, fans events out to the log
//! (and optionally stdout), and answers queries on `~/.pulse/daemon.sock`.

use chrono::Utc;
use clap::Parser;
use fs_err as fs;
use std::env;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulse_core::config::pulse_dir;
use pulse_core::{load_engine_config, FanoutSink, LogSink, Poller, SessionEvent, SystemInspector};

mod server;

use server::ServerState;

const SOCKET_NAME: &str = "daemon.sock";
const LOG_FILE_NAME: &str = "pulse-daemon.log";

#[derive(Debug, Parser)]
#[command(
    name = "pulse-daemon",
    version,
    about = "Detects claude sessions and classifies them busy or idle"
)]
struct Args {
    /// Config file (default: ~/.pulse/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single poll, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,

    /// Write every event to stdout as a JSON line
    #[arg(long)]
    events: bool,

    /// Also write logs to <dir>/pulse-daemon.log (or set PULSE_LOG_DIR)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| env::var_os("PULSE_LOG_DIR").map(PathBuf::from));
    let _log_guard = init_logging(log_dir.as_deref());

    let config = match load_engine_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load config");
            std::process::exit(1);
        }
    };
    info!(
        interval_ms = config.poll_interval.as_millis() as u64,
        descriptors = %config.descriptors.directory.display(),
        idle_threshold = config.classifier.cpu_delta_idle_threshold,
        idle_confirm_polls = config.classifier.idle_confirm_polls,
        "Config loaded"
    );

    let inspector = SystemInspector::new(config.command_timeout);
    let mut sink = FanoutSink::new().with(LogSink);
    if args.events {
        sink = sink.with(print_event);
    }

    if args.once {
        let mut poller = Poller::new(inspector, config, Box::new(sink));
        poller.poll_once(Utc::now());
        if !args.events {
            print_event(&poller.registry().snapshot_event());
        }
        return;
    }

    let socket_path = match pulse_dir() {
        Ok(dir) => dir.join(SOCKET_NAME),
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };
    if let Err(err) = server::prepare_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to prepare daemon socket");
        std::process::exit(1);
    }
    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let poll_interval = config.poll_interval;
    let poller = Poller::new(inspector, config, Box::new(sink));
    let state = ServerState {
        sessions: poller.shared(),
        started_at: Utc::now(),
        poll_interval,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let poller_handle = {
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("pulse-poller".to_string())
            .spawn(move || poller.run(shutdown))
    };
    let poller_handle = match poller_handle {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "Failed to start poller thread");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Pulse daemon started");
    server::serve(listener, state);

    shutdown.store(true, Ordering::SeqCst);
    if poller_handle.join().is_err() {
        warn!("Poller thread panicked");
    }
}

/// RUST_LOG wins; PULSE_DEBUG_LOG forces debug; otherwise info.
fn env_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let debug_enabled = env::var("PULSE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    }
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let file_writer = log_dir.and_then(|dir| match fs::create_dir_all(dir) {
        Ok(()) => Some(tracing_appender::non_blocking(
            tracing_appender::rolling::never(dir, LOG_FILE_NAME),
        )),
        Err(err) => {
            eprintln!("pulse-daemon: log directory unavailable: {}", err);
            None
        }
    });

    match file_writer {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .init();
            None
        }
    }
}

fn print_event(event: &SessionEvent) {
    if let Err(err) = write_event_line(event) {
        tracing::debug!(error = %err, "Failed to write event to stdout");
    }
}

fn write_event_line(event: &SessionEvent) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, event)?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}
