use std::sync::Arc;
use std::time::{Duration, Instant};

use curbd::config::Config;
use curbd::engine::Engine;
use curbd::model::*;
use curbd::notify::NotifyHub;

const MINUTE: i64 = 60_000;
const SLOTS: usize = 200;
const BOOKINGS: usize = 2_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join("curbd_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let wal_path = dir.join(format!("stress_{}.wal", std::process::id()));
    let _ = std::fs::remove_file(&wal_path);

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::open(&wal_path, notify, Config::default()).unwrap());

    let now = now_ms();
    let eta = minute_floor(now) + 30 * MINUTE;

    println!("curbd stress: {SLOTS} slots, {BOOKINGS} bookings");

    // Inventory + one forecast batch
    let setup_start = Instant::now();
    let mut points = Vec::new();
    for i in 0..SLOTS {
        let cluster = format!("C{:02}", i % 20);
        engine
            .register_slot(Slot {
                slot_id: format!("S{i:04}"),
                cluster_id: cluster,
                base_price: 25.0 + (i % 10) as f64,
                dynamic_price: 25.0 + (i % 10) as f64,
                is_ev: false,
                is_accessible: false,
            })
            .await
            .unwrap();
        points.push(PredictionPoint {
            slot_id: format!("S{i:04}"),
            eta,
            p_free: (i % 100) as f64 / 100.0,
            conf_low: None,
            conf_high: None,
            model_version: "bench".into(),
        });
    }
    engine.upsert_predictions(points).await.unwrap();
    println!("  setup: {:.2}ms", setup_start.elapsed().as_secs_f64() * 1000.0);

    // Concurrent booking creation
    let eta_iso = to_iso(eta);
    let mut handles = Vec::with_capacity(BOOKINGS);
    let run_start = Instant::now();
    for i in 0..BOOKINGS {
        let engine = engine.clone();
        let eta_iso = eta_iso.clone();
        handles.push(tokio::spawn(async move {
            let slot_id = format!("S{:04}", i % SLOTS);
            let start = Instant::now();
            let result = engine
                .create_booking(&slot_id, &eta_iso, BookingMode::SmartHold, Some(60))
                .await;
            (start.elapsed(), result.is_ok())
        }));
    }

    let mut latencies = Vec::with_capacity(BOOKINGS);
    let mut failures = 0usize;
    for handle in handles {
        let (latency, ok) = handle.await.unwrap();
        latencies.push(latency);
        if !ok {
            failures += 1;
        }
    }
    let elapsed = run_start.elapsed();
    println!(
        "  throughput: {:.0} bookings/s, failures: {failures}",
        BOOKINGS as f64 / elapsed.as_secs_f64()
    );
    print_latency("create_booking", &mut latencies);

    // Offer search under the populated index
    let mut search_latencies = Vec::with_capacity(100);
    for _ in 0..100 {
        let start = Instant::now();
        let offers = engine.search_offers(&eta_iso, 60).await.unwrap();
        assert!(!offers.is_empty());
        search_latencies.push(start.elapsed());
    }
    print_latency("search_offers", &mut search_latencies);

    // Pricing sweep + outbox drain
    let start = Instant::now();
    engine.run_pricing_tick(now).await.unwrap();
    println!("  pricing tick: {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);

    let publisher = curbd::engine::BroadcastPublisher::new(Arc::new(NotifyHub::new()));
    let start = Instant::now();
    let mut drained = 0;
    loop {
        let n = engine.drain_outbox(&publisher, 1_000).await.unwrap();
        if n == 0 {
            break;
        }
        drained += n;
    }
    println!(
        "  outbox drain: {drained} events in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    let _ = std::fs::remove_file(&wal_path);
}
