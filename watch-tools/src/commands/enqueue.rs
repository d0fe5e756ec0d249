use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use futures::executor;
use log::info;

use db_model::settings::{self, QueueSettings};
use queue_models::probe_task::{Priority, ProbeTask, TaskSource};
use tracewatch::helpers::ip::canonicalize;
use tracewatch::target_queue::{self, EnqueueOutcome, TargetQueue};

#[derive(Args, Clone)]
pub struct Params {
    #[clap(flatten)]
    persist: db_model::persist::Params,

    #[clap(flatten)]
    queue: target_queue::Params,

    /// Target address, v4 or v6.
    target_ip: String,

    /// Producer to record for this submission.
    #[arg(long, default_value = "static", value_parser = parse_source)]
    source: TaskSource,

    /// Override the source's default priority.
    #[arg(long, value_parser = parse_priority)]
    priority: Option<Priority>,
}

fn parse_source(input: &str) -> Result<TaskSource> {
    match input {
        "static" => Ok(TaskSource::Static),
        "api" => Ok(TaskSource::Api),
        other => bail!("only `static` and `api` submissions are manual, got `{}`", other),
    }
}

fn parse_priority(input: &str) -> Result<Priority> {
    match input {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        other => bail!("unknown priority `{}`", other),
    }
}

pub fn handle(params: Params) -> Result<()> {
    let ip = canonicalize(&params.target_ip)?;
    db_model::persist::initialize(&params.persist)?;

    executor::block_on(async move {
        let queue = TargetQueue::connect(&params.queue, "watch-tools").await?;
        let mut conn = db_model::persist::connect()?;
        let window = Duration::from_secs(
            settings::load::<QueueSettings>(&mut conn)
                .dedupe_window_seconds
                .max(0) as u64,
        );

        let mut task = ProbeTask::new(ip, params.source, Utc::now().naive_utc());
        if let Some(priority) = params.priority {
            task.priority = priority;
        }
        match queue.enqueue(&mut conn, &task, window).await? {
            EnqueueOutcome::Accepted => {
                info!("accepted: {} ({})", ip, task.source.as_str());
                println!("accepted");
            }
            EnqueueOutcome::Deduped => {
                info!("deduped: {} was submitted recently", ip);
                println!("deduped");
            }
        }
        Ok(())
    })
}
