//! Timesink worker process.
//!
//! Consumes measurement batches from the configured queue and commits them to
//! the store. Run one or more of these per deployment; workers coordinate
//! through the lock service, never with each other.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults (localhost backends, queue "timesink")
//! cargo run -p timesink-worker
//!
//! # With a config file of dotted `key = value` lines
//! cargo run -p timesink-worker -- /etc/timesink/worker.conf
//! ```
//!
//! Logging is controlled via `RUST_LOG` (default `info`).
//!
//! ## Signals
//!
//! SIGTERM finishes the in-flight batch, settles it, and exits. SIGHUP is
//! logged and ignored.
//!
//! This binary wires the in-memory backends; wire clients for the configured
//! endpoints plug in behind the same traits.

use std::collections::HashMap;
use std::sync::Arc;
use timesink_backend::{MemoryCache, MemoryLockService, MemoryQueue, MemoryStore};
use timesink_worker::{Worker, WorkerConfig};
use tokio::sync::watch;

/// Parse a config file of `key = value` (or `key value`) lines; `#` starts a
/// comment.
fn read_config_file(path: &str) -> std::io::Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)?;
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key, value),
            None => match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value),
                None => continue,
            },
        };
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => WorkerConfig::from_config_map(&read_config_file(&path)?)?,
        None => WorkerConfig::default(),
    };

    tracing::info!(
        queue = %config.rabbit.queue,
        broker = %format!("{}:{}", config.rabbit.host, config.rabbit.port),
        store = %format!("{}:{}", config.mongo.host, config.mongo.port),
        cache = %format!("{}:{}", config.memcache.host, config.memcache.port),
        locks = %format!("{}:{}", config.redis.host, config.redis.port),
        "timesink worker starting"
    );

    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let locks = Arc::new(MemoryLockService::new());
    let queue = Arc::new(MemoryQueue::new(config.queue_options()));

    let worker = Worker::new(store, cache, locks, queue, config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    worker.run(shutdown_rx).await;
    Ok(())
}

#[cfg(unix)]
fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, finishing current batch");
                    let _ = shutdown.send(true);
                }
                _ = sighup.recv() => {
                    tracing::info!("SIGHUP received, ignoring");
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current batch");
            let _ = shutdown.send(true);
        }
    });
}
