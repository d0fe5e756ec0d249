use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use diesel::{Connection, PgConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DATABASE_URL: OnceLock<String> = OnceLock::new();

#[derive(Args, Clone, Debug)]
#[group(id = "persist")]
pub struct Params {
    /// Postgres connection URL for the measurement store.
    /// Prefer the environment over the command line to keep credentials
    /// out of shell history and the process list.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

/// Stores the connection URL and brings the schema up to date. Called
/// exactly once, from each binary's main; a missing or unreachable store
/// here is fatal so the supervisor can restart us.
pub fn initialize(params: &Params) -> Result<()> {
    DATABASE_URL
        .set(params.database_url.clone())
        .map_err(|_| anyhow!("persistence initialized twice"))?;

    let mut conn = connect()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!(e))
        .context("while running Postgres migrations")?;
    for migration in applied {
        info!("Schema migration run: {}", migration);
    }
    Ok(())
}

pub fn connect() -> Result<PgConnection> {
    let url = DATABASE_URL
        .get()
        .expect("initialize() runs before any connect()");
    PgConnection::establish(url).context("while connecting to Postgres")
}
