use std::time::Duration;

use anyhow::{Context, Result};
use human_panic::setup_panic;
use log::{debug, warn};

use crate::helpers::logging;

/// How long a binary may spend draining spawned tasks after its main
/// future returns; matches the shutdown grace window.
const DRAIN_WINDOW: Duration = Duration::from_secs(30);

/// Common startup path for every tracewatch binary: panic handler, `.env`,
/// logger, Tokio runtime, graceful drain on exit.
pub fn run<Cli>(
    parse_cli: impl FnOnce() -> Cli,
    logging_of: impl FnOnce(&Cli) -> &logging::Params,
    run_command: impl FnOnce(Cli) -> Result<()>,
) -> Result<()> {
    setup_panic!();
    load_env()?;

    let cli = parse_cli();
    let logger_handle = logging::configure_from(logging_of(&cli))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start Tokio runtime")?;
    let _enter = runtime.enter();

    let command_result = run_command(cli);

    debug!(
        "Waiting up to {}s for in-flight work to drain",
        DRAIN_WINDOW.as_secs()
    );
    runtime.shutdown_timeout(DRAIN_WINDOW);

    // Async write mode buffers; the handle must outlive all log calls.
    logger_handle.flush();

    command_result
}

fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => {
            warn!("No `.env` file found; relying on process environment only.");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to load `.env` file"),
    }
}
