use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Engine knobs. Read once at startup; booking creation captures the
/// threshold and backup limit at request entry, so a mid-flight config swap
/// never changes an in-flight decision.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum predicted probability above which a smart hold needs no backups.
    pub reliability_threshold: f64,
    /// Max backup candidates per booking.
    pub backups_limit: usize,
    /// Default lookup radius for booking/offer probability queries, minutes.
    pub default_lookup_window_min: i64,

    /// Forward-looking pricing window, minutes.
    pub pricing_window_min: i64,
    /// Surcharge at p = 0, as a fraction of base price.
    pub surge_max: f64,
    /// Discount at p = 1, as a fraction of base price.
    pub discount_max: f64,
    /// Probability below which the surge ramp applies.
    pub low_knee: f64,
    /// Probability above which the discount ramp applies.
    pub high_knee: f64,
    /// Absolute floor/ceiling on the price factor.
    pub price_floor_multiplier: f64,
    pub price_ceiling_multiplier: f64,
    /// Writes below this delta are suppressed as float jitter.
    pub min_price_delta: f64,

    /// Trailing dedup window for incentive alerts, minutes.
    pub alert_dedup_window_min: i64,

    pub forecast_horizon_min: i64,
    pub forecast_step_min: i64,
    pub oracle_timeout: Duration,

    pub forecast_cadence: Duration,
    pub pricing_cadence: Duration,
    pub outbox_cadence: Duration,
    pub outbox_batch: usize,
    pub incentives_cadence: Duration,

    /// Journal appends before a compaction pass is triggered.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reliability_threshold: 0.7,
            backups_limit: 2,
            default_lookup_window_min: 60,
            pricing_window_min: 30,
            surge_max: 0.4,
            discount_max: 0.2,
            low_knee: 0.3,
            high_knee: 0.7,
            price_floor_multiplier: 0.5,
            price_ceiling_multiplier: 2.0,
            min_price_delta: 0.01,
            alert_dedup_window_min: 60,
            forecast_horizon_min: 60,
            forecast_step_min: 15,
            oracle_timeout: Duration::from_millis(2_000),
            forecast_cadence: Duration::from_secs(1_200),
            pricing_cadence: Duration::from_secs(120),
            outbox_cadence: Duration::from_secs(5),
            outbox_batch: 100,
            incentives_cadence: Duration::from_secs(60),
            compact_threshold: 1_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            reliability_threshold: env_parse("CURBD_RELIABILITY_THRESHOLD", d.reliability_threshold),
            backups_limit: env_parse("CURBD_BACKUPS_LIMIT", d.backups_limit)
                .min(crate::limits::MAX_BACKUPS),
            default_lookup_window_min: env_parse(
                "CURBD_LOOKUP_WINDOW_MIN",
                d.default_lookup_window_min,
            ),
            pricing_window_min: env_parse("CURBD_PRICING_WINDOW_MIN", d.pricing_window_min),
            surge_max: env_parse("CURBD_SURGE_MAX", d.surge_max),
            discount_max: env_parse("CURBD_DISCOUNT_MAX", d.discount_max),
            low_knee: env_parse("CURBD_LOW_KNEE", d.low_knee),
            high_knee: env_parse("CURBD_HIGH_KNEE", d.high_knee),
            price_floor_multiplier: env_parse("CURBD_PRICE_FLOOR", d.price_floor_multiplier),
            price_ceiling_multiplier: env_parse("CURBD_PRICE_CEILING", d.price_ceiling_multiplier),
            min_price_delta: env_parse("CURBD_MIN_PRICE_DELTA", d.min_price_delta),
            alert_dedup_window_min: env_parse("CURBD_ALERT_DEDUP_MIN", d.alert_dedup_window_min),
            forecast_horizon_min: env_parse("CURBD_FORECAST_HORIZON_MIN", d.forecast_horizon_min),
            forecast_step_min: env_parse("CURBD_FORECAST_STEP_MIN", d.forecast_step_min).max(1),
            oracle_timeout: Duration::from_millis(env_parse("CURBD_ORACLE_TIMEOUT_MS", 2_000u64)),
            forecast_cadence: Duration::from_secs(env_parse("CURBD_FORECAST_CADENCE_SEC", 1_200u64)),
            pricing_cadence: Duration::from_secs(env_parse("CURBD_PRICING_CADENCE_SEC", 120u64)),
            outbox_cadence: Duration::from_secs(env_parse("CURBD_OUTBOX_CADENCE_SEC", 5u64)),
            outbox_batch: env_parse("CURBD_OUTBOX_BATCH", d.outbox_batch)
                .min(crate::limits::MAX_OUTBOX_BATCH),
            incentives_cadence: Duration::from_secs(env_parse(
                "CURBD_INCENTIVES_CADENCE_SEC",
                60u64,
            )),
            compact_threshold: env_parse("CURBD_COMPACT_THRESHOLD", d.compact_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let c = Config::default();
        assert_eq!(c.reliability_threshold, 0.7);
        assert_eq!(c.backups_limit, 2);
        assert_eq!(c.low_knee, 0.3);
        assert_eq!(c.high_knee, 0.7);
        assert_eq!(c.min_price_delta, 0.01);
    }
}
