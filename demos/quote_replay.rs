/// Synthetic BBO replay
///
/// Generates random-walk quotes, replays them through an ingest pipeline
/// into a bounded queue drained by a consumer thread, and reports counters
/// once per second.
///
/// Usage: quote_replay [seconds] [quote_count] [queue_capacity]

use bbo_ingest::{
    IngestPipeline, LatencyWindow, PipelineConfig, QuotePacket, QuoteRecord, ReplaySource,
    StatsSnapshot,
};
use crossbeam::queue::ArrayQueue;
use rand::Rng;
use std::env;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

const SYMBOLS: [&str; 6] = ["IBM", "AAPL", "MSFT", "SPY", "TSLA", "NVDA"];

fn generate_quotes(count: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let mut mids: Vec<u32> = SYMBOLS.iter().map(|_| rng.gen_range(500_000..5_000_000)).collect();

    (0..count)
        .map(|i| {
            let s = rng.gen_range(0..SYMBOLS.len());
            let step = rng.gen_range(-50i64..=50);
            mids[s] = (mids[s] as i64 + step).max(10_000) as u32;

            let half_spread = rng.gen_range(50u32..500);
            let pkt = QuotePacket::new(
                SYMBOLS[s],
                mids[s] - half_spread,
                rng.gen_range(1u32..1000),
                mids[s] + half_spread,
                rng.gen_range(1u32..1000),
            );

            // every 10th quote carries timing markers, every 97th is truncated
            let mut bytes = if i % 10 == 0 {
                let t1 = rng.gen::<u32>();
                pkt.with_timing([t1, t1.wrapping_add(250), t1.wrapping_add(400), t1.wrapping_add(525)])
                    .to_bytes()
            } else {
                pkt.to_bytes()
            };
            if i % 97 == 96 {
                bytes.truncate(20);
            }
            bytes
        })
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args: Vec<String> = env::args().collect();
    let seconds: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(5);
    let quote_count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let queue_capacity: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(4096);

    info!(seconds, quote_count, queue_capacity, "generating quotes");
    let quotes = generate_quotes(quote_count);

    let queue = Arc::new(ArrayQueue::<QuoteRecord>::new(queue_capacity));
    let mut pipeline = match IngestPipeline::new(PipelineConfig::default(), queue.clone()) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to start ingest pipeline");
            process::exit(1);
        }
    };

    info!(
        ghz = pipeline.time_base().ghz(),
        huge_pages = pipeline.pool().is_using_huge_pages(),
        "pipeline ready"
    );
    pipeline.warm_up();

    let stop = pipeline.stop_handle();

    let consumer = {
        let queue = queue.clone();
        let stop = stop.clone();
        let time_base = *pipeline.time_base();
        thread::spawn(move || {
            let mut consumed = 0u64;
            let mut with_timing = 0u64;
            // receive -> consumer pickup
            let mut window = LatencyWindow::new();
            while !stop.is_stopped() || !queue.is_empty() {
                match queue.pop() {
                    Some(rec) => {
                        window.record(time_base.now_ns().saturating_sub(rec.timestamp_ns));
                        consumed += 1;
                        if rec.has_extended_timing() {
                            with_timing += 1;
                        }
                    }
                    None => std::hint::spin_loop(),
                }
            }
            (consumed, with_timing, window.stats())
        })
    };

    let reporter = {
        let stats = pipeline.stats_handle();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut last = StatsSnapshot::default();
            while !stop.is_stopped() {
                thread::sleep(Duration::from_secs(1));
                let now = stats.snapshot();
                let delta = now.delta_since(&last);
                info!(rate = delta.packets_received, "packets/s");
                stats.log_summary();
                last = now;
            }
        })
    };

    let timer = thread::spawn(move || {
        thread::sleep(Duration::from_secs(seconds));
        stop.stop();
    });

    let started = Instant::now();
    let mut source = ReplaySource::new(quotes).looping();
    let handled = pipeline.run(&mut source);
    let elapsed = started.elapsed();

    if timer.join().is_err() {
        error!("timer thread panicked");
    }
    if reporter.join().is_err() {
        error!("reporter thread panicked");
    }
    let (consumed, with_timing, latency) = match consumer.join() {
        Ok(result) => result,
        Err(_) => {
            error!("consumer thread panicked");
            (0, 0, None)
        }
    };

    pipeline.log_summary();
    println!("{}", pipeline.summary());
    println!("  Consumed:          {}", consumed);
    println!("  With timing:       {}", with_timing);
    if let Some(latency) = latency {
        println!("  Queue latency:     {}", latency);
        println!("  p99/p50:           {:.2}", latency.p99_p50_ratio());
    }
    println!(
        "  Throughput:        {:.0} packets/s",
        handled as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
}
