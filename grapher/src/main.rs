use anyhow::Result;
use clap::Parser;
use futures::executor;
use tokio::try_join;
use tracewatch::helpers::stop::{self, flatten};
use tracewatch::helpers::{bootstrap, logging};

/// The projection cycle: scan, project, mark.
mod builder;
/// Neo4j connection and the node/edge upsert statement.
mod graph_store;
/// Relational side: batch scans and the graph_built flag.
mod persist;
/// Pure hop-sequence to AS-edge projection.
mod project;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[clap(flatten)]
    logging: logging::Params,

    #[clap(flatten)]
    persist: db_model::persist::Params,

    #[clap(flatten)]
    graph: graph_store::Params,
}

fn main() -> Result<()> {
    bootstrap::run(Cli::parse, |cli: &Cli| &cli.logging, do_run)
}

fn do_run(cli: Cli) -> Result<()> {
    db_model::persist::initialize(&cli.persist)?;

    let signals = stop::install();
    let stop_rx = signals.token();
    tokio::spawn(signals.listen());

    let builder_handle = tokio::spawn(builder::run(cli.graph, stop_rx));

    executor::block_on(async {
        try_join!(flatten(builder_handle))?;
        Ok(())
    })
}
