//! Process entry point: load config, build the `Engine` value, start
//! the milter listener, wire OS signal handling to graceful shutdown.
//!
//! CLI argument parsing is out of scope (spec §1); the only argv
//! handling here is the one `--config` flag, parsed by hand, with the
//! `ZPAM_CONFIG` environment variable as a fallback, and a logged
//! warning falling back to defaults rather than refusing to start.

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;

use zpam_config::{Config, RuleStore};
use zpam_filter::Engine;
use zpam_store::{KvStore, MemoryStore, RedisConfig, RedisStore};
use zpam_trc::Level;

fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var("ZPAM_CONFIG").ok().map(PathBuf::from)
}

fn load_config() -> Config {
    match config_path() {
        Some(path) => Config::from_file(&path).unwrap_or_else(|err| {
            eprintln!("fatal: cannot load config from {}: {err}", path.display());
            std::process::exit(1);
        }),
        None => {
            tracing::warn!("no --config/ZPAM_CONFIG given, running with default configuration");
            Config::default()
        }
    }
}

fn load_rules(config: &Config) -> RuleStore {
    match &config.rules_path {
        Some(path) => RuleStore::load(path).unwrap_or_else(|err| {
            eprintln!("fatal: cannot load rules from {path}: {err}");
            std::process::exit(1);
        }),
        None => RuleStore::empty(),
    }
}

async fn build_store(config: &Config) -> Arc<dyn KvStore> {
    match std::env::var("ZPAM_REDIS_URL") {
        Ok(url) => {
            let redis_config = RedisConfig { url, pool_size: config.performance.max_concurrent_emails };
            match RedisStore::connect(redis_config) {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    eprintln!("fatal: cannot connect to redis: {err}");
                    std::process::exit(1);
                }
            }
        }
        Err(_) => {
            tracing::warn!("ZPAM_REDIS_URL not set, using in-memory token store (not durable)");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[tokio::main]
async fn main() {
    zpam_trc::init(Level::Info);
    tracing::info!(version = %zpam_filter::ENGINE_VERSION, "starting zpam");

    let config = load_config();
    let rules = load_rules(&config);
    let store = build_store(&config).await;
    let milter_config = config.milter.clone();

    let engine = match Engine::start(config, rules, store, Vec::new()).await {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            eprintln!("fatal: engine startup failed: {err}");
            std::process::exit(1);
        }
    };

    let server = zpam_milter::MilterServer::new(milter_config);
    if let Err(err) = server.serve(engine.clone(), shutdown_signal()).await {
        tracing::error!(error = %err, "milter server exited with error");
    }

    engine
        .shutdown(std::time::Duration::from_millis(engine.config().milter.shutdown_grace_ms))
        .await;
    tracing::info!("zpam stopped");
}
