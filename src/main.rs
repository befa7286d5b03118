use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use curbd::config::Config;
use curbd::engine::{BroadcastPublisher, Engine};
use curbd::notify::NotifyHub;
use curbd::oracle::HeuristicOracle;
use curbd::tasks;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("CURBD_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    curbd::observability::init(metrics_port);

    let config = Config::from_env();
    let ephemeral = std::env::var("CURBD_EPHEMERAL")
        .is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));
    let data_dir = std::env::var("CURBD_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let slots_file: Option<PathBuf> = std::env::var("CURBD_SLOTS_FILE").ok().map(PathBuf::from);

    let notify = Arc::new(NotifyHub::new());
    // Storage mode is decided exactly once, here.
    let engine = if ephemeral {
        info!("running with ephemeral store");
        Arc::new(Engine::ephemeral(notify.clone(), config))
    } else {
        std::fs::create_dir_all(&data_dir)?;
        let wal_path = PathBuf::from(&data_dir).join("curbd.wal");
        let engine = Engine::open(&wal_path, notify.clone(), config)?;
        info!("replayed journal from {}", wal_path.display());
        Arc::new(engine)
    };

    if let Some(path) = slots_file {
        let added = engine.load_inventory(&path).await?;
        info!("inventory loaded from {}: {added} new slots", path.display());
    }
    info!("curbd started");
    info!("  slots: {}", engine.slot_count());
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let oracle = Arc::new(HeuristicOracle);
    let publisher = Arc::new(BroadcastPublisher::new(notify.clone()));

    let loops = [
        tokio::spawn(tasks::run_forecaster(engine.clone(), oracle)),
        tokio::spawn(tasks::run_pricer(engine.clone())),
        tokio::spawn(tasks::run_outbox_publisher(engine.clone(), publisher)),
        tokio::spawn(tasks::run_incentive_monitor(engine.clone())),
        tokio::spawn(tasks::run_compactor(engine.clone())),
    ];

    // Graceful shutdown: stop the periodic loops on SIGTERM/ctrl-c. The WAL
    // writer flushes per commit, so there is nothing else to drain.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;

    info!("shutdown signal received, stopping periodic loops");
    for handle in loops {
        handle.abort();
    }
    info!("curbd stopped");
    Ok(())
}
