use anyhow::{bail, Result};
use clap::Parser;
use futures::executor;
use tokio::try_join;
use tracewatch::helpers::stop::{self, flatten};
use tracewatch::helpers::{bootstrap, logging};
use tracewatch::target_queue::{self, TargetQueue};

use crate::source::StdinSource;

/// Suffix/qtype/client/length filtering of observed queries.
mod filter;
/// dns_targets bookkeeping (no client IPs, ever).
mod persist;
/// The collect -> filter -> resolve -> enqueue cycle.
mod pipeline;
/// A/AAAA resolution of observed domains.
mod resolve;
/// The abstract query source and the generic stdin adapter.
mod source;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[clap(flatten)]
    logging: logging::Params,

    #[clap(flatten)]
    persist: db_model::persist::Params,

    #[clap(flatten)]
    queue: target_queue::Params,

    /// Where observed DNS queries come from. `stdin` reads one JSON object
    /// per line (`{"domain": ..., "timestamp": ..., "qtype"?: ...,
    /// "client_ip"?: ...}`); resolver-specific adapters pipe into it.
    #[arg(long, default_value = "stdin")]
    source: String,
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
        let source = match cli.source.as_str() {
            "stdin" => Box::new(StdinSource::spawn()),
            other => bail!("Unknown DNS query source `{}`", other),
        };
        let queue = TargetQueue::connect(&cli.queue, "collector").await?;
        let pipeline_handle = tokio::spawn(pipeline::run(source, queue, stop_rx));
        try_join!(flatten(pipeline_handle))?;
        Ok(())
    })
}
