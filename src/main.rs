pub mod models {
    pub mod daikin;
}

pub mod cache;
pub mod client;
pub mod config;
pub mod exporter;
pub mod parser;
pub mod server;
pub mod services {
    pub mod monitor;
}

use crate::cache::DaikinDataCache;
use crate::client::DaikinClient;
use crate::config::Config;
use crate::exporter::DaikinExporter;
use crate::services::monitor;
use log::{error, info, warn};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    /// Drop the cached snapshot so the first cycle fetches from upstream.
    clear_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Let the current cycle finish, then stop.
    Graceful,
    /// A repeated signal: the current cycle may be stuck on a fetch.
    Exit,
}

fn signal_action(received: usize) -> SignalAction {
    if received <= 1 { SignalAction::Graceful } else { SignalAction::Exit }
}

pub fn run(clear_cache: bool) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (update_interval={}s, prometheus_port={}, cache_file={}, token_file={})",
        cfg.update_interval.as_secs(),
        cfg.prometheus_port,
        cfg.cache_file_path.display(),
        cfg.token_file_path.display()
    );
    cfg.warn_if_over_quota();

    // 2) Report existing cache
    let cache = DaikinDataCache::new(&cfg.cache_file_path);
    if clear_cache {
        info!("Clearing cache {} as requested", cache.path().display());
        cache.clear();
    }
    let cache_info = cache.info();
    if cache_info.exists {
        info!(
            "Found existing cache {}: {}s old, {}",
            cache.path().display(),
            cache_info.age.unwrap_or_default(),
            if cache_info.valid == Some(true) { "valid" } else { "stale" }
        );
    }

    // 3) Init Daikin client
    let client = DaikinClient::new(&cfg.oidc_client_id, &cfg.oidc_client_secret, cfg.token_file_path.clone())
        .map_err(|e| format!("Daikin Cloud client setup failed: {}", e))?;
    info!("Loaded Daikin Cloud token set from {}", cfg.token_file_path.display());

    // 4) Metrics registry and scrape endpoint
    let exporter = Arc::new(DaikinExporter::new().map_err(|e| format!("metric registration failed: {}", e))?);
    let server = server::start(&format!("0.0.0.0:{}", cfg.prometheus_port), Arc::clone(&exporter))?;
    info!("Prometheus metrics: http://{}/metrics", server.local_addr());

    // 5) Cancel the poll loop on SIGINT/SIGTERM; a second signal exits immediately
    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| format!("signal handler setup failed: {}", e))?;
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for (received, signal) in signals.forever().enumerate() {
                match signal_action(received + 1) {
                    SignalAction::Graceful => {
                        info!("Received signal {}, shutting down gracefully", signal);
                        let _ = shutdown_tx.send(());
                    }
                    SignalAction::Exit => {
                        warn!("Received signal {} again, exiting without waiting for the current cycle", signal);
                        std::process::exit(1);
                    }
                }
            }
        })
        .map_err(|e| format!("failed to spawn signal thread: {}", e))?;

    // 6) Poll loop (blocks until shutdown)
    info!("Monitoring service started");
    monitor::run_loop(&cache, &client, &exporter, cfg.update_interval, &shutdown_rx);

    server.stop();
    info!("Service stopped");
    Ok(())
}

fn parse_cli_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    while let Some(arg) = args.next() {
        let value = match arg.as_str() {
            "--clear-cache" => {
                cli.clear_cache = true;
                continue;
            }
            "--env-file" => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            s if s.starts_with("--env-file=") => match &s["--env-file=".len()..] {
                "" => return Err("`--env-file` requires a path argument".to_string()),
                p => PathBuf::from(p),
            },
            "--" => break,
            other => return Err(format!("unrecognised argument: {}", other)),
        };
        if cli.env_file.replace(value).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }
    Ok(cli)
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    let (path, explicit) = match env_file {
        Some(path) if path.is_file() => (path, true),
        Some(path) => return Err(format!("env file not found: {}", path.display())),
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let default_path = cwd.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    let applied = config::load_env_file(&path)?;
    Ok(Some(LoadedEnvFile {
        path,
        explicit,
        applied,
    }))
}

fn configure_from_cli() -> Result<(CliArgs, Option<LoadedEnvFile>), String> {
    let args = std::env::args_os()
        .skip(1) // program name
        .map(|a| a.into_string().map_err(|_| "argument contains invalid UTF-8".to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut cli = parse_cli_args(args.into_iter())?;
    let loaded = configure_env(cli.env_file.take())?;
    Ok((cli, loaded))
}

fn main() {
    let (cli, loaded_env) = match configure_from_cli() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
        if info.applied == 0 {
            warn!("Every variable in {} was already set in the environment", info.path.display());
        }
    }

    info!(
        "daikin-exporter {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.clear_cache) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
