use chrono::{Datelike, Timelike, Utc};

use crate::engine::EngineError;

/// Feature order expected by the trained model. Kept stable across model
/// versions; `FeatureVector::as_row` emits in exactly this order.
pub const FEATURE_ORDER: [&str; 18] = [
    "past_1h_occ",
    "dynamic_price",
    "past_3h_occ",
    "capacity",
    "past_6h_occ",
    "base_price",
    "cluster_id",
    "traffic_index",
    "weather_precip",
    "month",
    "forecast_precip_next1h",
    "dayofweek",
    "hour",
    "weather_temp",
    "forecast_temp_next1h",
    "is_holiday",
    "event_flag",
    "is_weekend",
];

/// Complete, fixed-schema scoring input for one (slot, eta) pair.
///
/// Calendar fields (month, dayofweek, hour, is_weekend) are always derived
/// from the timestamp and cannot be overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub past_1h_occ: f64,
    pub past_3h_occ: f64,
    pub past_6h_occ: f64,
    pub capacity: f64,
    pub base_price: f64,
    pub dynamic_price: f64,
    pub cluster_code: f64,
    pub traffic_index: f64,
    pub weather_precip: f64,
    pub forecast_precip_next1h: f64,
    pub weather_temp: f64,
    pub forecast_temp_next1h: f64,
    pub is_holiday: bool,
    pub event_flag: bool,
    pub month: u32,
    /// Monday = 0 .. Sunday = 6.
    pub dayofweek: u32,
    pub hour: u32,
    pub is_weekend: bool,
}

impl FeatureVector {
    /// Row in `FEATURE_ORDER`, ready for the oracle.
    pub fn as_row(&self) -> [f64; 18] {
        [
            self.past_1h_occ,
            self.dynamic_price,
            self.past_3h_occ,
            self.capacity,
            self.past_6h_occ,
            self.base_price,
            self.cluster_code,
            self.traffic_index,
            self.weather_precip,
            f64::from(self.month),
            self.forecast_precip_next1h,
            f64::from(self.dayofweek),
            f64::from(self.hour),
            self.weather_temp,
            self.forecast_temp_next1h,
            f64::from(u8::from(self.is_holiday)),
            f64::from(u8::from(self.event_flag)),
            f64::from(u8::from(self.is_weekend)),
        ]
    }
}

/// Caller-supplied values. Anything left `None` takes its documented default.
#[derive(Debug, Clone, Default)]
pub struct FeatureOverrides {
    pub past_1h_occ: Option<f64>,
    pub past_3h_occ: Option<f64>,
    pub past_6h_occ: Option<f64>,
    pub capacity: Option<f64>,
    pub base_price: Option<f64>,
    pub dynamic_price: Option<f64>,
    pub cluster_code: Option<f64>,
    pub traffic_index: Option<f64>,
    pub weather_precip: Option<f64>,
    pub forecast_precip_next1h: Option<f64>,
    pub weather_temp: Option<f64>,
    pub forecast_temp_next1h: Option<f64>,
    pub is_holiday: Option<bool>,
    pub event_flag: Option<bool>,
}

mod defaults {
    pub const OCC: f64 = 0.5;
    pub const CAPACITY: f64 = 100.0;
    pub const BASE_PRICE: f64 = 40.0;
    pub const CLUSTER_CODE: f64 = 1.0;
    pub const TRAFFIC_INDEX: f64 = 50.0;
    pub const PRECIP: f64 = 0.0;
    pub const TEMP: f64 = 25.0;
}

/// Assemble the full feature vector for an arrival time. Pure function.
///
/// Malformed timestamps fail with `InvalidTimestamp`. When `dynamic_price`
/// is not explicitly overridden it mirrors the (possibly overridden) base
/// price — the model sees "current price = list price" unless told otherwise.
pub fn assemble(eta_iso: &str, overrides: &FeatureOverrides) -> Result<FeatureVector, EngineError> {
    let eta = chrono::DateTime::parse_from_rfc3339(eta_iso)
        .map_err(|_| EngineError::InvalidTimestamp(eta_iso.to_string()))?
        .with_timezone(&Utc);

    let base_price = overrides.base_price.unwrap_or(defaults::BASE_PRICE);
    let dayofweek = eta.weekday().num_days_from_monday();

    Ok(FeatureVector {
        past_1h_occ: overrides.past_1h_occ.unwrap_or(defaults::OCC),
        past_3h_occ: overrides.past_3h_occ.unwrap_or(defaults::OCC),
        past_6h_occ: overrides.past_6h_occ.unwrap_or(defaults::OCC),
        capacity: overrides.capacity.unwrap_or(defaults::CAPACITY),
        base_price,
        dynamic_price: overrides.dynamic_price.unwrap_or(base_price),
        cluster_code: overrides.cluster_code.unwrap_or(defaults::CLUSTER_CODE),
        traffic_index: overrides.traffic_index.unwrap_or(defaults::TRAFFIC_INDEX),
        weather_precip: overrides.weather_precip.unwrap_or(defaults::PRECIP),
        forecast_precip_next1h: overrides.forecast_precip_next1h.unwrap_or(defaults::PRECIP),
        weather_temp: overrides.weather_temp.unwrap_or(defaults::TEMP),
        forecast_temp_next1h: overrides.forecast_temp_next1h.unwrap_or(defaults::TEMP),
        is_holiday: overrides.is_holiday.unwrap_or(false),
        event_flag: overrides.event_flag.unwrap_or(false),
        month: eta.month(),
        dayofweek,
        hour: eta.hour(),
        is_weekend: dayofweek >= 5,
    })
}

/// Stable numeric encoding of a cluster id for the feature row.
pub fn cluster_code(cluster_id: &str) -> f64 {
    let h = cluster_id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    f64::from(h % 97)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything() {
        let v = assemble("2026-06-03T14:30:00Z", &FeatureOverrides::default()).unwrap();
        assert_eq!(v.past_1h_occ, 0.5);
        assert_eq!(v.capacity, 100.0);
        assert_eq!(v.base_price, 40.0);
        assert_eq!(v.dynamic_price, 40.0);
        assert_eq!(v.traffic_index, 50.0);
        assert_eq!(v.weather_temp, 25.0);
        assert!(!v.is_holiday);
        assert!(!v.event_flag);
    }

    #[test]
    fn calendar_fields_derived_from_timestamp() {
        // 2026-06-03 is a Wednesday
        let v = assemble("2026-06-03T14:30:00Z", &FeatureOverrides::default()).unwrap();
        assert_eq!(v.month, 6);
        assert_eq!(v.dayofweek, 2);
        assert_eq!(v.hour, 14);
        assert!(!v.is_weekend);

        // 2026-06-06 is a Saturday
        let w = assemble("2026-06-06T09:00:00Z", &FeatureOverrides::default()).unwrap();
        assert_eq!(w.dayofweek, 5);
        assert!(w.is_weekend);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let overrides = FeatureOverrides {
            traffic_index: Some(88.0),
            weather_precip: Some(2.5),
            is_holiday: Some(true),
            ..Default::default()
        };
        let v = assemble("2026-06-03T14:30:00Z", &overrides).unwrap();
        assert_eq!(v.traffic_index, 88.0);
        assert_eq!(v.weather_precip, 2.5);
        assert!(v.is_holiday);
        // untouched fields keep defaults
        assert_eq!(v.weather_temp, 25.0);
    }

    #[test]
    fn dynamic_price_mirrors_base_unless_overridden() {
        let base_only = FeatureOverrides {
            base_price: Some(55.0),
            ..Default::default()
        };
        let v = assemble("2026-06-03T14:30:00Z", &base_only).unwrap();
        assert_eq!(v.dynamic_price, 55.0);

        let both = FeatureOverrides {
            base_price: Some(55.0),
            dynamic_price: Some(61.5),
            ..Default::default()
        };
        let w = assemble("2026-06-03T14:30:00Z", &both).unwrap();
        assert_eq!(w.dynamic_price, 61.5);
    }

    #[test]
    fn malformed_timestamp_rejected() {
        let err = assemble("yesterday-ish", &FeatureOverrides::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTimestamp(_)));
    }

    #[test]
    fn row_matches_feature_order() {
        let v = assemble("2026-06-03T14:30:00Z", &FeatureOverrides::default()).unwrap();
        let row = v.as_row();
        assert_eq!(row.len(), FEATURE_ORDER.len());
        assert_eq!(row[1], v.dynamic_price);
        assert_eq!(row[9], f64::from(v.month));
        assert_eq!(row[12], f64::from(v.hour));
        assert_eq!(row[17], 0.0);
    }

    #[test]
    fn cluster_code_is_stable() {
        assert_eq!(cluster_code("C_A1"), cluster_code("C_A1"));
        assert_ne!(cluster_code("C_A1"), cluster_code("C_B2"));
    }
}
