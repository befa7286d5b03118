use async_trait::async_trait;

use crate::features::FeatureVector;

/// The trained availability model, treated as an opaque scoring function.
/// One calibrated probability per row, order-preserving.
#[async_trait]
pub trait ProbabilityOracle: Send + Sync {
    async fn predict(&self, rows: &[FeatureVector]) -> Result<Vec<f64>, OracleError>;

    fn model_version(&self) -> &str;
}

#[derive(Debug)]
pub struct OracleError(pub String);

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "oracle unavailable: {}", self.0)
    }
}

impl std::error::Error for OracleError {}

/// Stand-in scorer used when no trained model is deployed. Deterministic:
/// the same row always scores the same, so forecast re-runs upsert cleanly.
pub struct HeuristicOracle;

impl HeuristicOracle {
    fn score(row: &FeatureVector) -> f64 {
        // Commute peaks empty out availability; nights free it up.
        let hour_load = match row.hour {
            7..=10 | 16..=19 => 0.85,
            11..=15 => 0.55,
            20..=22 => 0.35,
            _ => 0.15,
        };
        let occ = 0.5 * row.past_1h_occ + 0.3 * row.past_3h_occ + 0.2 * row.past_6h_occ;
        let weekend_relief = if row.is_weekend { 0.10 } else { 0.0 };
        let rain_penalty = (row.forecast_precip_next1h * 0.05).min(0.15);
        let event_penalty = if row.event_flag { 0.20 } else { 0.0 };

        let p = 1.0 - 0.55 * hour_load - 0.35 * occ + weekend_relief - rain_penalty - event_penalty;
        p.clamp(0.02, 0.98)
    }
}

#[async_trait]
impl ProbabilityOracle for HeuristicOracle {
    async fn predict(&self, rows: &[FeatureVector]) -> Result<Vec<f64>, OracleError> {
        Ok(rows.iter().map(Self::score).collect())
    }

    fn model_version(&self) -> &str {
        "heuristic-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureOverrides, assemble};

    #[tokio::test]
    async fn one_probability_per_row_in_order() {
        let rows = vec![
            assemble("2026-06-03T08:00:00Z", &FeatureOverrides::default()).unwrap(),
            assemble("2026-06-03T03:00:00Z", &FeatureOverrides::default()).unwrap(),
        ];
        let probs = HeuristicOracle.predict(&rows).await.unwrap();
        assert_eq!(probs.len(), 2);
        // rush hour scores lower than the middle of the night
        assert!(probs[0] < probs[1]);
    }

    #[tokio::test]
    async fn probabilities_are_calibrated_range() {
        let mut rows = Vec::new();
        for h in 0..24 {
            let iso = format!("2026-06-03T{h:02}:00:00Z");
            rows.push(assemble(&iso, &FeatureOverrides::default()).unwrap());
        }
        for p in HeuristicOracle.predict(&rows).await.unwrap() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[tokio::test]
    async fn deterministic_for_identical_rows() {
        let row = assemble("2026-06-03T12:00:00Z", &FeatureOverrides::default()).unwrap();
        let a = HeuristicOracle.predict(std::slice::from_ref(&row)).await.unwrap();
        let b = HeuristicOracle.predict(std::slice::from_ref(&row)).await.unwrap();
        assert_eq!(a, b);
    }
}
