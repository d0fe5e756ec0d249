use std::time::Duration;

use anyhow::{Context, Result};
use db_model::target::NewTarget;
use diesel::prelude::*;
use queue_models::probe_task::ProbeTask;

use crate::helpers::ip::ToHostNet;

use super::is_within_window;

/// Records the submission in the dedupe log. Returns false if an identical
/// `(target_ip, source, priority)` entry is younger than the window, in
/// which case nothing is written.
pub(super) fn note_enqueue(
    conn: &mut PgConnection,
    task: &ProbeTask,
    window: Duration,
) -> Result<bool> {
    use db_model::schema::enqueue_log::dsl::*;

    let net = task.target_ip.to_host_net();
    let previous = enqueue_log
        .find((net, task.source.as_str(), task.priority.as_i16()))
        .select(enqueued_at)
        .first(conn)
        .optional()
        .context("while checking the enqueue log")?;

    if is_within_window(previous, task.created_at, window) {
        return Ok(false);
    }

    diesel::insert_into(enqueue_log)
        .values((
            target_ip.eq(net),
            source.eq(task.source.as_str()),
            priority.eq(task.priority.as_i16()),
            enqueued_at.eq(task.created_at),
        ))
        .on_conflict((target_ip, source, priority))
        .do_update()
        .set(enqueued_at.eq(task.created_at))
        .execute(conn)
        .context("while updating the enqueue log")?;
    Ok(true)
}

/// Targets come into existence on first enqueue and are never deleted.
pub(super) fn ensure_target(conn: &mut PgConnection, task: &ProbeTask) -> Result<()> {
    use db_model::schema::targets::dsl::*;

    diesel::insert_into(targets)
        .values(&NewTarget {
            target_ip: task.target_ip.to_host_net(),
            source: task.source.as_str(),
            created_at: task.created_at,
        })
        .on_conflict(target_ip)
        .do_nothing()
        .execute(conn)
        .context("while ensuring target row")?;
    Ok(())
}
