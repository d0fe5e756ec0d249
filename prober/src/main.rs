use anyhow::Result;
use clap::Parser;
use futures::executor;
use futures::future::try_join_all;
use log::info;
use tracewatch::helpers::stop::{self, flatten};
use tracewatch::helpers::{bootstrap, logging};
use tracewatch::target_queue::{self, TargetQueue};

use db_model::settings::{self, WorkerSettings};

/// Per-measurement persistence (row reservation, hop batches).
mod persist;
/// Probe tool selection, subprocess control & stdout parsing.
mod probe;
/// Rolling-window probe rate limiting.
mod rate_limit;
/// The long-lived per-worker loop.
mod worker;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[clap(flatten)]
    logging: logging::Params,

    #[clap(flatten)]
    queue: target_queue::Params,

    #[clap(flatten)]
    persist: db_model::persist::Params,
}

fn main() -> Result<()> {
    bootstrap::run(Cli::parse, |cli: &Cli| &cli.logging, do_run)
}

fn do_run(cli: Cli) -> Result<()> {
    db_model::persist::initialize(&cli.persist)?;

    let signals = stop::install();
    let stop_rx = signals.token();
    tokio::spawn(signals.listen());

    executor::block_on(async move {
        let queue = TargetQueue::connect(&cli.queue, "prober").await?;

        // Pool size is fixed at startup; the per-probe limits stay live
        // through the settings table and are re-read by each worker turn.
        let mut conn = db_model::persist::connect()?;
        let initial = settings::load::<WorkerSettings>(&mut conn);
        drop(conn);
        let pool_size = initial.worker_count.max(1);
        info!("Starting {} probe workers.", pool_size);

        let mut handles = Vec::with_capacity(pool_size);
        for idx in 0..pool_size {
            let consumer = queue
                .consumer(
                    initial.max_concurrent_probes.max(1) as u16,
                    &format!("tracewatch prober worker {}", idx),
                )
                .await?;
            handles.push(tokio::spawn(worker::run(idx, consumer, stop_rx.clone())));
        }
        try_join_all(handles.into_iter().map(flatten)).await?;
        Ok(())
    })
}
