//! ptymux entrypoint: argument parsing, logging bootstrap, the Unix socket
//! accept loop, and signal-driven shutdown.

use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use core_buffer::Size;
use core_config::Config;
use core_server::listener::Listener;
use core_server::monitor::run_monitor;
use core_server::reader::run_connection;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Exit codes shared with the client tooling.
const EXIT_ARGS: u8 = 1;
const EXIT_LISTEN: u8 = 3;
const EXIT_SERVER: u8 = 4;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "ptymux", version, about = "Multiplexing terminal emulator server")]
struct Args {
    /// Unix socket path to listen on (overrides the config file).
    #[arg(long)]
    listen: Option<PathBuf>,
    /// Configuration file path (default: ptymux.toml beside the socket dir).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Append logs to this file instead of stderr.
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
    /// Create one terminal at startup.
    #[arg(long)]
    spawn: bool,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL_MS: AtomicI64 = AtomicI64::new(i64::MIN / 2);

extern "C" fn handle_signal(_sig: libc::c_int) {
    // Async-signal-safe: atomics and clock_gettime only
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime is async-signal-safe
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    let now_ms = ts.tv_sec as i64 * 1000 + ts.tv_nsec as i64 / 1_000_000;

    let prev = LAST_SIGNAL_MS.swap(now_ms, Ordering::AcqRel);
    if SHUTDOWN.swap(true, Ordering::AcqRel) && now_ms - prev < 2000 {
        // Second delivery inside the grace window: go down hard
        // SAFETY: _exit is async-signal-safe
        unsafe {
            libc::_exit(EXIT_SERVER as i32);
        }
    }
}

fn install_signal_handlers() {
    let handler: extern "C" fn(libc::c_int) = handle_signal;
    // SAFETY: installing a handler that only touches atomics
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [libc::SIGTERM, libc::SIGINT, libc::SIGHUP] {
            libc::sigaction(sig, &action, std::ptr::null_mut());
        }
        // Writer threads handle EPIPE as an error return
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn default_socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir).join("ptymux").join("sock");
    }
    // SAFETY: getuid has no preconditions
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/ptymux-{uid}")).join("sock")
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::default().clamped(),
    };
    if let Some(listen) = &args.listen {
        config.server.listen = listen.display().to_string();
    }
    Ok(config)
}

fn serve(args: Args) -> Result<(), (u8, anyhow::Error)> {
    let config = load_config(&args).map_err(|e| (EXIT_ARGS, e))?;

    let socket_path = if config.server.listen.is_empty() {
        default_socket_path()
    } else {
        PathBuf::from(&config.server.listen)
    };

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))
            .map_err(|e| (EXIT_LISTEN, e))?;
    }
    // A stale socket from a dead server blocks bind
    let _ = std::fs::remove_file(&socket_path);

    let socket = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))
        .map_err(|e| (EXIT_LISTEN, e))?;
    socket
        .set_nonblocking(true)
        .context("socket setup")
        .map_err(|e| (EXIT_LISTEN, e))?;

    let listener = Listener::new(config);
    info!(server = %listener.id(), socket = %socket_path.display(), "listening");

    let monitor = {
        let listener = listener.clone();
        std::thread::Builder::new()
            .name("monitor".into())
            .spawn(move || run_monitor(listener))
            .context("spawning monitor")
            .map_err(|e| (EXIT_SERVER, e))?
    };

    if args.spawn {
        listener
            .create_term(listener.id(), Size::new(80, 24), None)
            .context("spawning initial terminal")
            .map_err(|e| (EXIT_SERVER, e))?;
    }

    let mut conn_threads = Vec::new();
    while !SHUTDOWN.load(Ordering::Acquire) {
        match socket.accept() {
            Ok((stream, _)) => {
                let listener = listener.clone();
                let handle = std::thread::Builder::new()
                    .name("reader".into())
                    .spawn(move || run_connection(listener, stream));
                match handle {
                    Ok(handle) => conn_threads.push(handle),
                    Err(err) => warn!(%err, "could not spawn reader thread"),
                }
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(err) => {
                error!(%err, "accept failed");
                break;
            }
        }
        conn_threads.retain(|handle| !handle.is_finished());
    }

    info!("shutting down");
    listener.shutdown_all();
    for handle in conn_threads {
        let _ = handle.join();
    }
    let _ = monitor.join();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help and version exit cleanly
            if err.use_stderr() {
                eprintln!("{err}");
                return ExitCode::from(EXIT_ARGS);
            }
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    let _log_guard = match init_logging(args.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("ptymux: {err:#}");
            return ExitCode::from(EXIT_ARGS);
        }
    };

    install_signal_handlers();

    match serve(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err((code, err)) => {
            error!("{err:#}");
            ExitCode::from(code)
        }
    }
}
