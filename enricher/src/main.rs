use anyhow::Result;
use clap::Parser;
use futures::executor;
use tokio::try_join;
use tracewatch::helpers::stop::{self, flatten};
use tracewatch::helpers::{bootstrap, logging};

/// The batch enrichment cycle.
mod engine;
/// Store access: batch scans, hop updates, the asns cache.
mod persist;
/// External AS metadata sources and the merge procedure.
mod sources;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[clap(flatten)]
    logging: logging::Params,

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

    let engine_handle = tokio::spawn(engine::run(stop_rx));

    executor::block_on(async {
        try_join!(flatten(engine_handle))?;
        Ok(())
    })
}
