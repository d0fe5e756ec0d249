use anyhow::Result;
use clap::Parser;
use futures::executor;
use tokio::try_join;
use tracewatch::helpers::stop::{self, flatten};
use tracewatch::helpers::{bootstrap, logging};
use tracewatch::target_queue::{self, TargetQueue};

mod schedule;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[clap(flatten)]
    logging: logging::Params,

    #[clap(flatten)]
    persist: db_model::persist::Params,

    #[clap(flatten)]
    queue: target_queue::Params,
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
        let queue = TargetQueue::connect(&cli.queue, "remeasure").await?;
        let schedule_handle = tokio::spawn(schedule::run(queue, stop_rx));
        try_join!(flatten(schedule_handle))?;
        Ok(())
    })
}
