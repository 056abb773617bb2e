//! Benchmarking command implementation for the ccnfwd CLI
//!
//! Every worker plays one consumer face and requests the same sequence of
//! names, so all workers contend on the same entries and most requests
//! aggregate.

use anyhow::{Context, Result};
use futures::future::join_all;
use log::{info, warn};
use rust_ccnfwd_common::message::{Name, ParsedMessage};
use rust_ccnfwd_common::metrics::Histogram;
use rust_ccnfwd_common::types::FaceId;
use rust_ccnfwd_pit::{LiveFaces, Pit, PitConfig, PitError, SystemClock};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::utils::{format_duration, print_header};

/// Run the benchmark with the specified parameters
pub async fn run_benchmark(
    config: PitConfig,
    count: usize,
    prefix: String,
    concurrent: usize,
) -> Result<()> {
    let concurrent = concurrent.clamp(1, usize::from(u16::MAX));
    info!(
        "Running benchmark: count={}, prefix={}, concurrent={}",
        count, prefix, concurrent
    );

    print_header("ccnfwd PIT benchmark");
    println!("Parameters:");
    println!("  Interests per worker: {}", count);
    println!("  Name prefix: {}", prefix);
    println!("  Concurrent workers: {}", concurrent);
    println!("  Resend method: {:?}", config.resend_method);

    let resend = config.resend_method;
    let faces = Arc::new(LiveFaces::with_faces(1..=concurrent as u16));
    let pit = Arc::new(Pit::new(config, Arc::new(SystemClock::new()), faces)?);
    let latency = Arc::new(Histogram::latency_us());

    let names = (0..count)
        .map(|i| Name::from_uri(&format!("{}/{}", prefix, i)))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid benchmark prefix")?;
    let names = Arc::new(names);

    let start_time = Instant::now();
    let mut tasks = Vec::with_capacity(concurrent);
    for worker in 0..concurrent {
        let pit = Arc::clone(&pit);
        let names = Arc::clone(&names);
        let latency = Arc::clone(&latency);
        let face = FaceId(worker as u16 + 1);

        tasks.push(tokio::task::spawn_blocking(move || {
            let mut results = WorkerResults::default();
            for (i, name) in names.iter().enumerate() {
                let msg = ParsedMessage::interest(name.clone())
                    .with_nonce(((worker as u32) << 20) | i as u32 | 1)
                    .with_lifetime(4_000);

                let request_start = Instant::now();
                let outcome = pit.find_or_create_locked(&msg).and_then(|mut locked| {
                    pit.on_request(&mut locked, face, &msg, &mut [], resend)
                });
                latency.observe(request_start.elapsed().as_micros() as u64);

                match outcome {
                    Ok(true) => results.forwarded += 1,
                    Ok(false) => results.aggregated += 1,
                    Err(PitError::LockBusy { .. }) => results.lock_busy += 1,
                    Err(e) => {
                        warn!("{} request {} failed: {}", face, name, e);
                        results.failed += 1;
                    }
                }
            }
            results
        }));
    }

    let mut totals = WorkerResults::default();
    for result in join_all(tasks).await {
        let result = result.context("Benchmark worker panicked")?;
        totals.forwarded += result.forwarded;
        totals.aggregated += result.aggregated;
        totals.lock_busy += result.lock_busy;
        totals.failed += result.failed;
    }
    let request_time = start_time.elapsed();

    let satisfy_start = Instant::now();
    let mut delivered = 0usize;
    for name in names.iter() {
        delivered += pit.satisfy(&ParsedMessage::object(name.clone()))?.len();
    }
    let satisfy_time = satisfy_start.elapsed();
    let freed = pit.expire_sweep();

    print_benchmark_results(
        &totals,
        count * concurrent,
        request_time,
        satisfy_time,
        delivered,
        freed,
        &latency,
    );
    Ok(())
}

/// Outcome counters of one worker
#[derive(Debug, Clone, Default)]
struct WorkerResults {
    forwarded: usize,
    aggregated: usize,
    lock_busy: usize,
    failed: usize,
}

/// Print the benchmark results
fn print_benchmark_results(
    results: &WorkerResults,
    total: usize,
    request_time: Duration,
    satisfy_time: Duration,
    delivered: usize,
    freed: usize,
    latency: &Histogram,
) {
    let pct = |n: usize| {
        if total == 0 {
            0.0
        } else {
            n as f64 / total as f64 * 100.0
        }
    };

    print_header("Benchmark Results");
    println!("Total Interests: {}", total);
    println!("Forwarded: {} ({:.2}%)", results.forwarded, pct(results.forwarded));
    println!("Aggregated: {} ({:.2}%)", results.aggregated, pct(results.aggregated));
    println!("Lock busy: {} ({:.2}%)", results.lock_busy, pct(results.lock_busy));
    println!("Failed: {}", results.failed);

    println!("\nTiming:");
    println!("Request phase: {}", format_duration(request_time));
    if request_time.as_secs_f64() > 0.0 {
        println!(
            "Throughput: {:.2} interests/second",
            total as f64 / request_time.as_secs_f64()
        );
    }
    println!("Avg on_request latency: {:.2} us", latency.average());
    if latency.underflow() > 0 {
        println!("  <      1 us: {}", latency.underflow());
    }
    for (bound, hits) in latency.counts() {
        if hits > 0 {
            println!("  <= {:>6} us: {}", bound, hits);
        }
    }
    if latency.overflow() > 0 {
        println!("  slower: {}", latency.overflow());
    }
    println!(
        "Satisfy phase: {} ({} deliveries)",
        format_duration(satisfy_time),
        delivered
    );
    println!("Entries freed by sweep: {}", freed);
}
