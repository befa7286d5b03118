use std::sync::Arc;

use tracing::{error, info};

use crate::engine::{Engine, Publisher};
use crate::model::now_ms;
use crate::oracle::ProbabilityOracle;

/// Periodic forecast sweep: score every slot over the eta grid and upsert
/// the results. A failed iteration is logged and the loop proceeds on the
/// next tick.
pub async fn run_forecaster(engine: Arc<Engine>, oracle: Arc<dyn ProbabilityOracle>) {
    let mut interval = tokio::time::interval(engine.config().forecast_cadence);
    loop {
        interval.tick().await;
        match engine.refresh_forecasts(oracle.as_ref(), now_ms()).await {
            Ok(0) => {}
            Ok(rows) => info!("forecast tick upserted {rows} rows"),
            Err(e) => error!("forecast tick failed: {e}"),
        }
    }
}

/// Periodic repricing from the freshest upcoming forecast per slot.
pub async fn run_pricer(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().pricing_cadence);
    loop {
        interval.tick().await;
        if let Err(e) = engine.run_pricing_tick(now_ms()).await {
            error!("pricing tick failed: {e}");
        }
    }
}

/// Periodic outbox drain through the configured publisher.
pub async fn run_outbox_publisher(engine: Arc<Engine>, publisher: Arc<dyn Publisher>) {
    let batch = engine.config().outbox_batch;
    let mut interval = tokio::time::interval(engine.config().outbox_cadence);
    loop {
        interval.tick().await;
        match engine.drain_outbox(publisher.as_ref(), batch).await {
            Ok(0) => {}
            Ok(n) => info!("outbox drained {n} events"),
            Err(e) => error!("outbox drain failed: {e}"),
        }
    }
}

/// Periodic scan for low-confidence smart holds.
pub async fn run_incentive_monitor(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().incentives_cadence);
    loop {
        interval.tick().await;
        if let Err(e) = engine.run_incentives_tick(now_ms()).await {
            error!("incentives tick failed: {e}");
        }
    }
}

/// Compact the journal whenever the append count since the last compaction
/// crosses the configured threshold.
pub async fn run_compactor(engine: Arc<Engine>) {
    let threshold = engine.config().compact_threshold;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.journal_appends_since_compact().await >= threshold {
            match engine.compact_journal().await {
                Ok(()) => info!("journal compacted"),
                Err(e) => error!("journal compaction failed: {e}"),
            }
        }
    }
}
