//! End-to-end flow over the public API: seed inventory, ingest forecasts,
//! book with backups, reprice, drain the outbox and observe the events
//! downstream.

use std::sync::Arc;

use curbd::config::Config;
use curbd::engine::{BroadcastPublisher, Engine};
use curbd::model::*;
use curbd::notify::NotifyHub;

const M: Ms = MINUTE_MS;

fn slot(id: &str, cluster: &str, base_price: f64) -> Slot {
    Slot {
        slot_id: id.into(),
        cluster_id: cluster.into(),
        base_price,
        dynamic_price: base_price,
        is_ev: false,
        is_accessible: false,
    }
}

fn pt(slot_id: &str, eta: Ms, p: f64) -> PredictionPoint {
    PredictionPoint {
        slot_id: slot_id.into(),
        eta,
        p_free: p,
        conf_low: None,
        conf_high: None,
        model_version: "v1".into(),
    }
}

#[tokio::test]
async fn booking_to_downstream_event_flow() {
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::ephemeral(notify.clone(), Config::default()));

    for s in [
        slot("S101", "C_A1", 30.0),
        slot("S102", "C_A1", 28.0),
        slot("S201", "C_B2", 40.0),
    ] {
        engine.register_slot(s).await.unwrap();
    }

    let now = parse_iso("2026-06-03T14:00:00Z").unwrap();
    let eta = now + 30 * M;
    engine
        .upsert_predictions(vec![
            pt("S101", eta, 0.2),
            pt("S102", eta, 0.8),
            pt("S101", now + 10 * M, 0.1),
        ])
        .await
        .unwrap();

    // Offers rank by probability; the slot without a forecast is absent.
    let offers = engine.search_offers(&to_iso(eta), 60).await.unwrap();
    let ids: Vec<&str> = offers.iter().map(|o| o.slot_id.as_str()).collect();
    assert_eq!(ids, vec!["S102", "S101"]);

    // Smart hold on the shaky slot picks the confident neighbor as backup.
    let booking = engine
        .create_booking("S101", &to_iso(eta), BookingMode::SmartHold, Some(60))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Held);
    assert_eq!(booking.backups.len(), 1);
    assert_eq!(booking.backups[0].slot_id, "S102");

    // Pricing reacts to the soonest upcoming forecast: S101 surges off the
    // p = 0.1 point, S102 earns the abundance discount off p = 0.8.
    engine.run_pricing_tick(now).await.unwrap();
    let repriced = engine.get_slot_snapshot("S101").await.unwrap();
    assert_eq!(repriced.dynamic_price, 38.0);
    assert_eq!(engine.get_slot_snapshot("S102").await.unwrap().dynamic_price, 26.13);

    // Subscribe downstream, then drain the outbox through the broadcast
    // publisher. Events arrive in creation order, per topic.
    let mut booking_rx = notify.subscribe("booking");
    let mut pricing_rx = notify.subscribe("pricing");
    let publisher = BroadcastPublisher::new(notify.clone());
    let published = engine
        .drain_outbox(&publisher, engine.config().outbox_batch)
        .await
        .unwrap();
    // booking.created plus the two pricing adjustments
    assert_eq!(published, 3);

    let booking_evt = booking_rx.recv().await.unwrap();
    assert_eq!(booking_evt.event_type, "booking.created");
    let payload: serde_json::Value = serde_json::from_str(&booking_evt.payload).unwrap();
    assert_eq!(payload["slot_id"], "S101");
    assert_eq!(payload["mode"], "smart_hold");

    let pricing_evt = pricing_rx.recv().await.unwrap();
    assert_eq!(pricing_evt.event_type, "pricing.adjusted");

    // Nothing left pending; a second drain publishes nothing.
    assert_eq!(engine.pending_outbox_count().await, 0);
    assert_eq!(engine.drain_outbox(&publisher, 100).await.unwrap(), 0);

    // Low-confidence hold draws exactly one incentive alert across two ticks.
    engine.run_incentives_tick(now).await.unwrap();
    engine.run_incentives_tick(now + 2 * M).await.unwrap();
    assert_eq!(engine.list_alerts(true).await.len(), 1);

    // Walk the session to completion and watch the booking finish.
    let session = engine
        .start_session(booking.booking_id, None, None, 15)
        .await
        .unwrap();
    engine
        .validate_session(session.id, ValidationMethod::Plate, Some("B-7".into()))
        .await
        .unwrap();
    engine.end_session(session.id).await.unwrap();
    let finished = engine.get_booking(booking.booking_id).await.unwrap();
    assert_eq!(finished.status, BookingStatus::Completed);

    let mut payment_rx = notify.subscribe("payment");
    engine.drain_outbox(&publisher, 100).await.unwrap();
    let payment_evt = payment_rx.recv().await.unwrap();
    assert_eq!(payment_evt.event_type, "payment.preauth_ok");
}
