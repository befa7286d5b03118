use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// One incentive sweep: every held smart-hold whose frozen
    /// `p_free_at_hold` sits below the reliability threshold gets an
    /// incentive alert — unless an unresolved one already exists for it
    /// inside the trailing dedup window.
    pub async fn run_incentives_tick(&self, now: Ms) -> Result<usize, EngineError> {
        let threshold = self.config().reliability_threshold;
        let dedup_after = now - self.config().alert_dedup_window_min * MINUTE_MS;
        let mut created = 0;

        for booking_id in self.store.booking_ids() {
            let Some(arc) = self.store.get_booking(&booking_id) else {
                continue;
            };
            let booking = arc.read().await.clone();
            if booking.mode != BookingMode::SmartHold || booking.status != BookingStatus::Held {
                continue;
            }
            let Some(p) = booking.p_free_at_hold else {
                continue;
            };
            if p >= threshold {
                continue;
            }

            let entity_id = booking_id.to_string();
            let duplicate = {
                let alerts = self.store.alerts.read().await;
                alerts.iter().any(|a| {
                    a.kind == AlertKind::Incentive
                        && a.entity_type == "booking"
                        && a.entity_id == entity_id
                        && a.resolved_at.is_none()
                        && a.created_at >= dedup_after
                })
            };
            if duplicate {
                continue;
            }

            let alert = Alert {
                id: Ulid::new(),
                entity_type: "booking".to_string(),
                entity_id,
                kind: AlertKind::Incentive,
                severity: AlertSeverity::Warn,
                message: format!("low confidence smart hold (p_free={p:.2}); consider incentive"),
                created_at: now,
                resolved_at: None,
            };
            self.persist(&Commit::one(Op::RaiseAlert {
                alert: alert.clone(),
            }))
            .await?;
            self.store.push_alert(alert).await;
            metrics::counter!(crate::observability::ALERTS_RAISED_TOTAL).increment(1);
            created += 1;
        }

        if created > 0 {
            tracing::info!("incentives tick raised {created} alerts");
        }
        Ok(created)
    }

    pub async fn resolve_alert(&self, alert_id: Ulid, at: Ms) -> Result<(), EngineError> {
        let known = {
            let alerts = self.store.alerts.read().await;
            alerts.iter().any(|a| a.id == alert_id)
        };
        if !known {
            return Err(EngineError::StoreError(format!("unknown alert {alert_id}")));
        }
        self.persist(&Commit::one(Op::ResolveAlert { alert_id, at }))
            .await?;
        let mut alerts = self.store.alerts.write().await;
        if let Some(a) = alerts.iter_mut().find(|a| a.id == alert_id) {
            a.resolved_at = Some(at);
        }
        Ok(())
    }

    /// Alert feed for operator dashboards, newest first.
    pub async fn list_alerts(&self, include_resolved: bool) -> Vec<Alert> {
        let alerts = self.store.alerts.read().await;
        let mut out: Vec<Alert> = alerts
            .iter()
            .filter(|a| include_resolved || a.resolved_at.is_none())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}
