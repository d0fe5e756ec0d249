use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};

use db_model::settings;

#[derive(Args, Clone)]
pub struct Params {
    #[clap(flatten)]
    persist: db_model::persist::Params,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Clone)]
pub enum Action {
    /// Print a settings section as JSON
    Get { key: String },
    /// Replace a settings section with the given JSON value
    Set { key: String, value: String },
}

pub fn handle(params: Params) -> Result<()> {
    db_model::persist::initialize(&params.persist)?;
    let mut conn = db_model::persist::connect()?;

    match params.action {
        Action::Get { key } => {
            match settings::get_raw(&mut conn, &key)? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("(unset; defaults apply)"),
            }
            Ok(())
        }
        Action::Set { key, value } => {
            let parsed: serde_json::Value = serde_json::from_str(&value)
                .with_context(|| format!("`{}` is not valid JSON", value))?;
            settings::set_raw(&mut conn, &key, parsed, Utc::now().naive_utc())?;
            println!("updated {}", key);
            Ok(())
        }
    }
}
