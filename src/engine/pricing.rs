use serde_json::json;

use crate::config::Config;
use crate::model::*;

use super::forecast::upcoming_within;
use super::{Engine, EngineError};

pub(super) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Demand-responsive price factor. Low availability ramps the price up to
/// `1 + surge_max`; high availability discounts down to `1 - discount_max`;
/// the middle band leaves the base price alone. The result is clamped to the
/// configured floor/ceiling multipliers.
pub(super) fn price_factor(p: f64, cfg: &Config) -> f64 {
    let factor = if p < cfg.low_knee {
        1.0 + cfg.surge_max * (cfg.low_knee - p) / cfg.low_knee
    } else if p > cfg.high_knee {
        1.0 - cfg.discount_max * (p - cfg.high_knee) / (1.0 - cfg.high_knee)
    } else {
        1.0
    };
    factor.clamp(cfg.price_floor_multiplier, cfg.price_ceiling_multiplier)
}

impl Engine {
    /// One pricing sweep. Per slot: take the soonest forecast inside the
    /// forward window (never a nearest-by-distance match into the past) and
    /// reprice from base. Writes and the `pricing.adjusted` event are
    /// suppressed when the delta is under `min_price_delta`, so a tick with
    /// no new forecasts writes nothing.
    pub async fn run_pricing_tick(&self, now: Ms) -> Result<usize, EngineError> {
        let cfg = self.config().clone();
        let window = cfg.pricing_window_min * MINUTE_MS;
        let mut changed = 0;

        for slot_id in self.store.slot_ids() {
            let Some(series) = self.store.get_series(&slot_id) else {
                continue;
            };
            let point = {
                let guard = series.read().await;
                upcoming_within(&guard, now, window)
            };
            let Some(point) = point else {
                continue;
            };
            let Some(slot) = self.store.get_slot(&slot_id) else {
                continue;
            };

            let mut guard = slot.write().await;
            let new_price = round2(guard.base_price * price_factor(point.p_free, &cfg));
            if (new_price - guard.dynamic_price).abs() < cfg.min_price_delta {
                continue;
            }

            let old_price = guard.dynamic_price;
            let event = OutboxEvent::new(
                "pricing.adjusted",
                json!({
                    "slot_id": slot_id,
                    "old_price": old_price,
                    "new_price": new_price,
                    "p_free": point.p_free,
                    "at": to_iso(now),
                }),
                now,
            );
            let commit = Commit {
                ops: vec![
                    Op::SetPrice {
                        slot_id: slot_id.clone(),
                        price: new_price,
                    },
                    Op::AppendOutbox {
                        event: event.clone(),
                    },
                ],
            };
            self.persist(&commit).await?;

            guard.dynamic_price = new_price;
            drop(guard);
            self.store.push_outbox(event).await;
            metrics::counter!(crate::observability::PRICE_ADJUSTMENTS_TOTAL).increment(1);
            tracing::debug!("price adjusted {slot_id}: {old_price} -> {new_price}");
            changed += 1;
        }

        if changed > 0 {
            tracing::info!("pricing tick adjusted {changed} slots");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_scarcity_ramp() {
        let cfg = Config::default();
        assert!((price_factor(0.0, &cfg) - 1.4).abs() < 1e-9);
        assert!((price_factor(0.15, &cfg) - 1.2).abs() < 1e-9);
        assert!((price_factor(0.3, &cfg) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn factor_abundance_ramp() {
        let cfg = Config::default();
        assert!((price_factor(0.7, &cfg) - 1.0).abs() < 1e-9);
        assert!((price_factor(0.85, &cfg) - 0.9).abs() < 1e-9);
        assert!((price_factor(1.0, &cfg) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn factor_neutral_band() {
        let cfg = Config::default();
        for p in [0.3, 0.45, 0.6, 0.7] {
            assert_eq!(price_factor(p, &cfg), 1.0);
        }
    }

    #[test]
    fn factor_respects_floor_and_ceiling() {
        let cfg = Config {
            surge_max: 5.0,
            discount_max: 0.9,
            ..Config::default()
        };
        assert_eq!(price_factor(0.0, &cfg), cfg.price_ceiling_multiplier);
        assert_eq!(price_factor(1.0, &cfg), cfg.price_floor_multiplier);
    }

    #[test]
    fn round2_suppresses_jitter() {
        assert_eq!(round2(38.0000001), 38.0);
        assert_eq!(round2(26.006), 26.01);
        assert_eq!(round2(29.994), 29.99);
    }
}
