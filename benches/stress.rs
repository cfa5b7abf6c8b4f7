use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use freewheel::config::ShopConfig;
use freewheel::gateway::NullGateway;
use freewheel::model::*;
use freewheel::Engine;

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

fn bench_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("freewheel_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    Arc::new(Engine::new(path, Arc::new(NullGateway), ShopConfig::default()).unwrap())
}

fn draft(label: String) -> UnitDraft {
    UnitDraft {
        label,
        bike_type: "city".into(),
        size: "M".into(),
        pricing: PriceTable {
            two_hour_cents: 1_500,
            four_hour_cents: 2_500,
            day_cents: 4_000,
            extra_day_cents: 3_000,
        },
        deposit_cents: 5_000,
        photo_url: None,
        features: vec![],
    }
}

async fn register_fleet(engine: &Engine, n: usize) -> Vec<Ulid> {
    let mut units = Vec::with_capacity(n);
    for i in 0..n {
        units.push(engine.register_unit(draft(format!("City {i:03}"))).await.unwrap());
    }
    println!("  registered {n} units");
    units
}

/// The i-th bookable day, walking forward from 2027-01-01.
fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2027, 1, 1).unwrap() + chrono::Days::new(i as u64)
}

fn full_day_request(unit: Ulid, d: NaiveDate) -> BookingRequest {
    BookingRequest {
        unit_ids: vec![unit],
        window: WindowRequest {
            date: d,
            kind: DurationKind::FullDay,
            start_time: None,
            end_date: None,
        },
        customer: None,
    }
}

fn hourly_request(unit: Ulid, d: NaiveDate, hour: u32) -> BookingRequest {
    BookingRequest {
        unit_ids: vec![unit],
        window: WindowRequest {
            date: d,
            kind: DurationKind::TwoHour,
            start_time: NaiveTime::from_hms_opt(hour, 0, 0),
            end_date: None,
        },
        customer: None,
    }
}

async fn phase1_sequential(engine: &Engine, unit: Ulid) {
    let n = 2_000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_hold(full_day_request(unit, day(i)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} holds in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("hold latency", &mut latencies);
}

async fn phase2_concurrent(engine: &Arc<Engine>, units: &[Ulid]) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    // One unit per task, disjoint days: full write concurrency, no conflicts.
    for (i, &unit) in units.iter().take(n_tasks).enumerate() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .create_hold(full_day_request(unit, day(i * n_per_task + j)))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} holds = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(engine: &Arc<Engine>, units: &[Ulid]) {
    // Pre-fill: a slice of the fleet partially booked.
    for (i, &unit) in units.iter().take(20).enumerate() {
        for j in 0..10 {
            engine
                .create_hold(full_day_request(unit, day(i * 10 + j)))
                .await
                .unwrap();
        }
    }

    // Writers keep booking hourly slots in the background.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for (w, &unit) in units.iter().rev().take(5).enumerate() {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let hour = 8 + ((i % 4) * 3) as u32; // 08 11 14 17, never overlapping
                let _ = engine
                    .create_hold(hourly_request(unit, day(w * 500 + i / 4), hour))
                    .await;
                i += 1;
            }
        }));
    }

    // Readers measure availability latency while writes churn.
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut readers = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let d = day((r * reads_per_reader + i) % 200);
                let t = Instant::now();
                engine
                    .check_availability(&WindowRequest {
                        date: d,
                        kind: DurationKind::FullDay,
                        start_time: None,
                        end_date: None,
                    })
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for r in readers {
        all.extend(r.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for w in writers {
        let _ = w.await;
    }
    print_latency("availability latency under write load", &mut all);
}

async fn phase4_churn(engine: &Arc<Engine>, units: &[Ulid]) {
    // Hold/cancel cycles hammer the claim insert/release paths and the WAL.
    let n_tasks = 8;
    let cycles = 250;
    let success = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for (i, &unit) in units.iter().take(n_tasks).enumerate() {
        let engine = engine.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..cycles {
                let c = engine
                    .create_hold(full_day_request(unit, day(i * cycles + j)))
                    .await
                    .unwrap();
                engine.cancel(c.reservation_id, None).await.unwrap();
                success.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    let total = n_tasks * cycles;
    println!(
        "  {ok}/{total} hold+cancel cycles in {:.2}s = {:.0} cycles/sec",
        elapsed.as_secs_f64(),
        ok as f64 / elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    println!("=== freewheel stress benchmark ===\n");

    // Each phase gets its own engine and WAL so numbers do not interfere.

    println!("[phase 1] sequential hold throughput");
    let engine = bench_engine("phase1");
    let units = register_fleet(&engine, 1).await;
    phase1_sequential(&engine, units[0]).await;

    println!("\n[phase 2] concurrent hold throughput");
    let engine = bench_engine("phase2");
    let units = register_fleet(&engine, 10).await;
    phase2_concurrent(&engine, &units).await;

    println!("\n[phase 3] availability latency under write load");
    let engine = bench_engine("phase3");
    let units = register_fleet(&engine, 50).await;
    phase3_read_under_load(&engine, &units).await;

    println!("\n[phase 4] hold/cancel churn");
    let engine = bench_engine("phase4");
    let units = register_fleet(&engine, 8).await;
    phase4_churn(&engine, &units).await;

    println!("\n=== benchmark complete ===");
}
