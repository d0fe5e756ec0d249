use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use log::error;
use queue_models::probe_task::ProbeTask;
use tracewatch::helpers::ip::ToHostNet;

use db_model::hop::NewHop;
use db_model::measurement::NewMeasurement;
use db_model::target::NewTarget;

use crate::probe::{ParsedHop, ProbeOutcome, TraceTool};

pub struct ReservedMeasurement {
    pub id: i64,
    pub target_id: i64,
}

/// Inserts the measurement row before the probe runs; the id is thereby
/// reserved and a crash mid-probe leaves a row with completed_at unset,
/// which downstream stages ignore.
pub fn reserve_measurement(
    conn: &mut PgConnection,
    task: &ProbeTask,
    tool: TraceTool,
    started_at: NaiveDateTime,
) -> Result<ReservedMeasurement> {
    use db_model::schema::measurements::dsl as m;

    conn.transaction(|conn| -> Result<ReservedMeasurement> {
        let target_id = get_or_create_target(conn, task, started_at)?;
        let id = diesel::insert_into(m::measurements)
            .values(&NewMeasurement {
                target_id,
                tool: tool.name(),
                started_at,
                success: false,
                raw_output: "",
            })
            .returning(m::id)
            .get_result(conn)?;
        Ok(ReservedMeasurement { id, target_id })
    })
    .context("while reserving measurement row")
}

/// Normally the enqueue path has created the target already; dequeuing a
/// task for an unknown IP still must not fail the measurement.
fn get_or_create_target(
    conn: &mut PgConnection,
    task: &ProbeTask,
    now: NaiveDateTime,
) -> Result<i64> {
    use db_model::schema::targets::dsl as t;

    let net = task.target_ip.to_host_net();
    let existing = t::targets
        .filter(t::target_ip.eq(net))
        .select(t::id)
        .first::<i64>(conn)
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let inserted = diesel::insert_into(t::targets)
        .values(&NewTarget {
            target_ip: net,
            source: task.source.as_str(),
            created_at: now,
        })
        .on_conflict(t::target_ip)
        .do_nothing()
        .returning(t::id)
        .get_result::<i64>(conn)
        .optional()?;
    match inserted {
        Some(id) => Ok(id),
        // lost a concurrent insert race; the row exists now
        None => Ok(t::targets
            .filter(t::target_ip.eq(net))
            .select(t::id)
            .first(conn)?),
    }
}

/// Single batch write: hops, final measurement state and the target's
/// last_measurement_at stamp.
pub fn complete_measurement(
    conn: &mut PgConnection,
    reserved: &ReservedMeasurement,
    outcome: &ProbeOutcome,
    completed_at: NaiveDateTime,
) -> Result<()> {
    use db_model::schema::hops::dsl as h;
    use db_model::schema::measurements::dsl as m;
    use db_model::schema::targets::dsl as t;

    let rows = hop_rows(reserved.id, &outcome.hops);
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        if !rows.is_empty() {
            diesel::insert_into(h::hops).values(&rows).execute(conn)?;
        }
        diesel::update(m::measurements.find(reserved.id))
            .set((
                m::completed_at.eq(completed_at),
                m::success.eq(outcome.success()),
                m::raw_output.eq(&outcome.raw_output),
            ))
            .execute(conn)?;
        diesel::update(t::targets.find(reserved.target_id))
            .set(t::last_measurement_at.eq(completed_at))
            .execute(conn)?;
        Ok(())
    })
    .context("while persisting measurement result")
}

/// Applies the row invariants: hop numbers start at 1 and are unique per
/// measurement. Offending hops are dropped, the rest are kept.
fn hop_rows(measurement_id: i64, hops: &[ParsedHop]) -> Vec<NewHop> {
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(hops.len());
    for hop in hops {
        if hop.number < 1 {
            error!(
                "Ignoring hop with invalid number {} in measurement {}",
                hop.number, measurement_id
            );
            continue;
        }
        if !seen.insert(hop.number) {
            error!(
                "Ignoring duplicate hop number {} in measurement {}",
                hop.number, measurement_id
            );
            continue;
        }
        rows.push(NewHop {
            measurement_id,
            hop_number: hop.number,
            hop_ip: hop.ip.map(|ip| ip.to_host_net()),
            rtt_ms: hop.rtt_ms,
        });
    }
    rows
}
