//! Runnable demo of the priority channel + parallel reader driver.
//!
//! Writes a handful of prioritized jobs into a [`FixedPriorityChannel`],
//! closes it, then drains it with [`pq_runner::run_parallel_reader`] under a
//! small concurrency cap, printing the order jobs actually ran in.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pq_async::{CancelSource, ParallelOptions, PauseTokenSource};
use pq_channel::FixedPriorityChannel;
use pq_core::PriorityItem;

#[derive(Parser, Debug)]
struct Args {
    /// number of priority levels
    #[arg(long, default_value_t = 3)]
    levels: usize,

    /// number of jobs to enqueue
    #[arg(long, default_value_t = 12)]
    jobs: usize,

    /// max concurrent jobs the reader driver may run at once
    #[arg(long, default_value_t = 2)]
    parallelism: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let chan = FixedPriorityChannel::<String>::new(args.levels);

    for i in 0..args.jobs {
        let priority = (i % args.levels) as i64;
        chan.try_write(PriorityItem::new(priority, format!("job-{i}")));
    }
    chan.try_complete(None);

    let pause = PauseTokenSource::new();
    let cancel = CancelSource::new();
    let options = Arc::new(ParallelOptions::with_max_degree_of_parallelism(
        args.parallelism,
        pause.token(),
        cancel.token(),
    ));

    pq_runner::run_parallel_reader(&chan, options, |item, _cancel| async move {
        tracing::info!(priority = item.priority, job = %item.item, "running");
        tokio::time::sleep(Duration::from_millis(10)).await;
        tracing::info!(job = %item.item, "done");
    })
    .await
    .expect("drain should not fail");

    chan.completion().await.expect("channel should complete cleanly");
}
