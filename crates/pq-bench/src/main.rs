//! Micro-benchmark: enqueue -> dequeue latency & throughput for the
//! fixed-priority channel against `tokio::sync::mpsc` and `crossbeam-channel`,
//! carried over from the teacher's `pq-bench-sync` and extended to the
//! async channel shape (spec §1 calls out "benchmark the priority channel
//! against `tokio::sync::mpsc` and `crossbeam-channel`" in `SPEC_FULL.md`).
//!
//! Measurement window:
//! - Start when producers are released by a barrier.
//! - Stop after the aggregator has collected exactly `n_items` latencies.
//! - Shutdown (closing channels, joining tasks) happens outside the window.
//!
//! Run (release build recommended):
//!   cargo run --release -p pq-bench -- --implm pq --producers 4 --n-items 200000
//!   cargo run --release -p pq-bench -- --implm tokio-mpsc --producers 4 --n-items 200000
//!   cargo run --release -p pq-bench -- --implm xbeam --producers 4 --n-items 200000

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel as xbeam;
use tokio::sync::{Barrier, mpsc};

use pq_async::CancelToken;
use pq_channel::FixedPriorityChannel;
use pq_core::PriorityItem;

#[derive(Parser, Debug, Clone)]
struct Args {
    /// "pq" | "tokio-mpsc" | "xbeam"
    #[arg(long, default_value = "pq")]
    implm: String,

    /// number of producer tasks/threads
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// number of priority levels (pq only)
    #[arg(long, default_value_t = 4)]
    levels: usize,

    /// total items to measure
    #[arg(long, default_value_t = 200_000)]
    n_items: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .init();

    let args = Args::parse();
    let lats = match args.implm.as_str() {
        "pq" => bench_pq(&args).await,
        "tokio-mpsc" => bench_tokio_mpsc(&args).await,
        "xbeam" => bench_xbeam(&args),
        other => {
            eprintln!("unknown --implm={other}, use 'pq' | 'tokio-mpsc' | 'xbeam'");
            std::process::exit(2);
        }
    };

    report(&args, lats);
    Ok(())
}

async fn bench_pq(args: &Args) -> (Vec<u64>, std::time::Duration) {
    let chan = FixedPriorityChannel::<Instant>::new(args.levels);
    let start_barrier = Arc::new(Barrier::new(args.producers + 1));
    let base = args.n_items / args.producers;
    let extra = args.n_items % args.producers;

    let mut producers = Vec::with_capacity(args.producers);
    for pid in 0..args.producers {
        let chan = chan.clone();
        let sb = start_barrier.clone();
        let n = base + if pid < extra { 1 } else { 0 };
        producers.push(tokio::spawn(async move {
            sb.wait().await;
            for i in 0..n {
                let priority = (i % 4) as i64;
                chan.try_write(PriorityItem::new(priority, Instant::now()));
            }
        }));
    }

    let t0_gate = start_barrier.wait();
    let t0 = Instant::now();
    t0_gate.await;

    let mut lats = Vec::with_capacity(args.n_items);
    for _ in 0..args.n_items {
        let item = chan.read(CancelToken::none()).await.expect("channel stays open for the bench window");
        lats.push(item.item.elapsed().as_nanos() as u64);
    }
    let elapsed = t0.elapsed();

    for p in producers {
        p.await.unwrap();
    }
    chan.try_complete(None);
    (lats, elapsed)
}

async fn bench_tokio_mpsc(args: &Args) -> (Vec<u64>, std::time::Duration) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Instant>();
    let start_barrier = Arc::new(Barrier::new(args.producers + 1));
    let base = args.n_items / args.producers;
    let extra = args.n_items % args.producers;

    let mut producers = Vec::with_capacity(args.producers);
    for pid in 0..args.producers {
        let tx = tx.clone();
        let sb = start_barrier.clone();
        let n = base + if pid < extra { 1 } else { 0 };
        producers.push(tokio::spawn(async move {
            sb.wait().await;
            for _ in 0..n {
                let _ = tx.send(Instant::now());
            }
        }));
    }
    drop(tx);

    let t0_gate = start_barrier.wait();
    let t0 = Instant::now();
    t0_gate.await;

    let mut lats = Vec::with_capacity(args.n_items);
    for _ in 0..args.n_items {
        let stamp = rx.recv().await.expect("channel stays open for the bench window");
        lats.push(stamp.elapsed().as_nanos() as u64);
    }
    let elapsed = t0.elapsed();

    for p in producers {
        p.await.unwrap();
    }
    (lats, elapsed)
}

fn bench_xbeam(args: &Args) -> (Vec<u64>, std::time::Duration) {
    let (tx, rx) = xbeam::unbounded::<Instant>();
    let start_barrier = Arc::new(std::sync::Barrier::new(args.producers + 1));
    let base = args.n_items / args.producers;
    let extra = args.n_items % args.producers;

    let mut producers = Vec::with_capacity(args.producers);
    for pid in 0..args.producers {
        let tx = tx.clone();
        let sb = start_barrier.clone();
        let n = base + if pid < extra { 1 } else { 0 };
        producers.push(std::thread::spawn(move || {
            sb.wait();
            for _ in 0..n {
                let _ = tx.send(Instant::now());
            }
        }));
    }
    drop(tx);

    start_barrier.wait();
    let t0 = Instant::now();

    let mut lats = Vec::with_capacity(args.n_items);
    for _ in 0..args.n_items {
        let stamp = rx.recv().expect("channel stays open for the bench window");
        lats.push(stamp.elapsed().as_nanos() as u64);
    }
    let elapsed = t0.elapsed();

    for p in producers {
        p.join().unwrap();
    }
    (lats, elapsed)
}

fn report(args: &Args, (mut lats, elapsed): (Vec<u64>, std::time::Duration)) {
    lats.sort_unstable();
    let p50 = percentile(&lats, 50.0);
    let p95 = percentile(&lats, 95.0);
    let p99 = percentile(&lats, 99.0);
    let tps = args.n_items as f64 / elapsed.as_secs_f64();

    println!("impl,producers,n_items,p50_ns,p95_ns,p99_ns,throughput_items_per_s");
    println!(
        "{},{},{},{},{},{},{}",
        args.implm, args.producers, args.n_items, p50 as u64, p95 as u64, p99 as u64, tps as u64
    );
}

fn percentile(sorted_ns: &[u64], p: f64) -> f64 {
    if sorted_ns.is_empty() {
        return 0.0;
    }
    let n = sorted_ns.len();
    let rank = ((p / 100.0) * (n as f64 - 1.0)).round() as usize;
    sorted_ns[rank] as f64
}
