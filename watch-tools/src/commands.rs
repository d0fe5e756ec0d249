use anyhow::Result;
use clap::Subcommand;
use log::debug;

mod depth;
mod enqueue;
mod settings;

pub fn handle(cmd: Commands) -> Result<()> {
    let command_result = match cmd {
        Commands::Enqueue(data) => enqueue::handle(data),
        Commands::Depth(data) => depth::handle(data),
        Commands::Settings(data) => settings::handle(data),
    };
    debug!("Finished command execution. Result: {:?}", command_result);
    command_result
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a target for measurement (the manual/API producer path)
    Enqueue(enqueue::Params),
    /// Show how many probe tasks are pending
    Depth(depth::Params),
    /// Read or write live settings rows
    Settings(settings::Params),
}
