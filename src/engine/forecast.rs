use crate::features::{FeatureOverrides, FeatureVector, assemble, cluster_code};
use crate::limits::*;
use crate::model::*;
use crate::oracle::ProbabilityOracle;

use super::{Engine, EngineError};

// ── Nearest-in-window lookup ──────────────────────────────────────

/// Bounded two-sided search for the forecast closest in time to `target`.
///
/// At most one point is taken from each side of the target, each bounded to
/// `window` ms; the closer one wins, ties break toward the earlier (≤ target)
/// point. No point within the window means no signal — a probability is
/// never synthesized.
pub fn nearest_in_window(
    series: &PredictionSeries,
    target: Ms,
    window: Ms,
) -> Option<PredictionPoint> {
    let before = series
        .latest_at_or_before(target)
        .filter(|p| target - p.eta <= window);
    let after = series
        .earliest_at_or_after(target)
        .filter(|p| p.eta - target <= window);

    match (before, after) {
        (Some(b), Some(a)) => {
            if target - b.eta <= a.eta - target {
                Some(b.clone())
            } else {
                Some(a.clone())
            }
        }
        (Some(b), None) => Some(b.clone()),
        (None, Some(a)) => Some(a.clone()),
        (None, None) => None,
    }
}

/// Soonest forecast with eta in `[now, now + window]` — forward-looking
/// only, used by the pricing engine.
pub fn upcoming_within(series: &PredictionSeries, now: Ms, window: Ms) -> Option<PredictionPoint> {
    series
        .earliest_at_or_after(now)
        .filter(|p| p.eta - now <= window)
        .cloned()
}

// ── Engine operations ────────────────────────────────────────────

impl Engine {
    /// Probability that `slot_id` is free near `target`, if any forecast
    /// falls inside the window.
    pub async fn lookup_probability(
        &self,
        slot_id: &str,
        target: Ms,
        window: Ms,
    ) -> Option<PredictionPoint> {
        let series = self.store.get_series(slot_id)?;
        let guard = series.read().await;
        nearest_in_window(&guard, target, window)
    }

    /// Upsert a forecast batch as one atomic commit. Re-running a batch
    /// replaces rows, never duplicates them.
    pub async fn upsert_predictions(
        &self,
        mut points: Vec<PredictionPoint>,
    ) -> Result<(), EngineError> {
        if points.is_empty() {
            return Ok(());
        }
        for p in &mut points {
            p.eta = minute_floor(p.eta);
            p.p_free = p.p_free.clamp(0.0, 1.0);
        }
        let commit = Commit::one(Op::UpsertPredictions {
            points: points.clone(),
        });
        self.persist(&commit).await?;
        for point in points {
            let series = self.store.series_entry(&point.slot_id);
            let mut guard = series.write().await;
            if guard.len() >= MAX_FORECAST_POINTS_PER_SLOT
                && guard.latest_at_or_before(point.eta).map(|p| p.eta) != Some(point.eta)
            {
                tracing::warn!("forecast series full for {}, dropping point", point.slot_id);
                continue;
            }
            guard.upsert(point);
        }
        Ok(())
    }

    /// Drop every forecast older than `before`.
    pub async fn prune_predictions(&self, before: Ms) -> Result<(), EngineError> {
        let commit = Commit::one(Op::PrunePredictions { before });
        self.persist(&commit).await?;
        let series_list: Vec<_> = self
            .store
            .predictions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for series in series_list {
            series.write().await.prune(before);
        }
        Ok(())
    }

    /// One forecast sweep: score every slot over the configured eta grid and
    /// upsert the results. An unavailable oracle skips the tick — downstream
    /// consumers see "no signal", never a substituted probability.
    pub async fn refresh_forecasts(
        &self,
        oracle: &dyn ProbabilityOracle,
        now: Ms,
    ) -> Result<usize, EngineError> {
        let cfg = self.config();
        let step = cfg.forecast_step_min * MINUTE_MS;
        let horizon = cfg.forecast_horizon_min * MINUTE_MS;

        let mut rows: Vec<FeatureVector> = Vec::new();
        let mut meta: Vec<(String, Ms)> = Vec::new();

        for slot_id in self.store.slot_ids() {
            let Some(slot) = self.store.get_slot(&slot_id) else {
                continue;
            };
            let slot = slot.read().await.clone();
            let mut eta = minute_floor(now) + step;
            while eta <= minute_floor(now) + horizon {
                let overrides = FeatureOverrides {
                    base_price: Some(slot.base_price),
                    dynamic_price: Some(slot.dynamic_price),
                    cluster_code: Some(cluster_code(&slot.cluster_id)),
                    ..Default::default()
                };
                match assemble(&to_iso(eta), &overrides) {
                    Ok(row) => {
                        rows.push(row);
                        meta.push((slot.slot_id.clone(), eta));
                    }
                    Err(e) => tracing::warn!("feature assembly failed for {slot_id}: {e}"),
                }
                eta += step;
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let started = std::time::Instant::now();
        let scored = tokio::time::timeout(cfg.oracle_timeout, oracle.predict(&rows)).await;
        metrics::histogram!(crate::observability::ORACLE_LATENCY_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let probs = match scored {
            Ok(Ok(probs)) if probs.len() == rows.len() => probs,
            Ok(Ok(probs)) => {
                tracing::warn!(
                    "oracle returned {} probabilities for {} rows, skipping tick",
                    probs.len(),
                    rows.len()
                );
                return Ok(0);
            }
            Ok(Err(e)) => {
                tracing::warn!("oracle unavailable, skipping forecast tick: {e}");
                return Ok(0);
            }
            Err(_) => {
                tracing::warn!("oracle timed out, skipping forecast tick");
                return Ok(0);
            }
        };

        let model_version = oracle.model_version().to_string();
        let points: Vec<PredictionPoint> = meta
            .into_iter()
            .zip(probs)
            .map(|((slot_id, eta), p)| PredictionPoint {
                slot_id,
                eta,
                p_free: p,
                conf_low: None,
                conf_high: None,
                model_version: model_version.clone(),
            })
            .collect();

        let count = points.len();
        self.upsert_predictions(points).await?;
        self.prune_predictions(minute_floor(now)).await?;
        metrics::counter!(crate::observability::FORECAST_ROWS_TOTAL).increment(count as u64);
        Ok(count)
    }
}
