use anyhow::{Context, Result};
use clap::Args;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use flexi_logger::{colored_default_format, detailed_format, Logger, LoggerHandle, WriteMode};
use log::Level;

#[derive(Args, Debug)]
#[group(id = "logging")]
pub struct Params {
    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Reload log levels from a flexi_logger specfile instead of the
    /// -v flags; the file is watched for changes.
    #[arg(long, value_name = "TOML FILE")]
    log_spec_file: Option<std::path::PathBuf>,
}

pub fn configure_from(params: &Params) -> Result<LoggerHandle> {
    // below-error verbosity means the operator asked for silence
    let cli_level = params.verbose.log_level().unwrap_or(Level::Error);

    let builder = Logger::try_with_env_or_str(cli_level.to_string())
        .context("Bad log spec in RUST_LOG or the verbosity flags")?
        .write_mode(WriteMode::Async)
        .format_for_stdout(colored_default_format)
        .format_for_files(detailed_format);

    if let Some(spec_file) = &params.log_spec_file {
        builder
            .start_with_specfile(spec_file)
            .with_context(|| format!("Failed to start logger with specfile {:?}", spec_file))
    } else {
        builder.start().context("Failed to start logger")
    }
}
