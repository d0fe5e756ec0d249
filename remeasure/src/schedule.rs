use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use ipnet::IpNet;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use db_model::settings::{self, QueueSettings, RemeasurementSettings};
use queue_models::probe_task::{ProbeTask, TaskSource};
use tracewatch::target_queue::{EnqueueOutcome, TargetQueue};

pub async fn run(queue: TargetQueue, stop_rx: CancellationToken) -> Result<()> {
    info!("Remeasurement scheduler ready.");
    loop {
        let pause = match run_cycle(&queue).await {
            Ok(stats) => {
                info!(
                    "Remeasurement cycle: {} stale, {} enqueued, {} deduped",
                    stats.stale, stats.enqueued, stats.deduped
                );
                stats.next_cycle
            }
            Err(e) => {
                error!("Remeasurement cycle failed: {:?}", e);
                Duration::from_secs(RemeasurementSettings::default().interval_seconds)
            }
        };
        tokio::select! {
            biased;
            _ = stop_rx.cancelled() => return Ok(()),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

struct CycleStats {
    stale: usize,
    enqueued: usize,
    deduped: usize,
    next_cycle: Duration,
}

async fn run_cycle(queue: &TargetQueue) -> Result<CycleStats> {
    let mut conn = db_model::persist::connect()?;
    let config = settings::load::<RemeasurementSettings>(&mut conn);
    let queue_config = settings::load::<QueueSettings>(&mut conn);
    let window = Duration::from_secs(queue_config.dedupe_window_seconds.max(0) as u64);

    let now = Utc::now().naive_utc();
    let cutoff = staleness_cutoff(now, config.ttl_seconds);
    let stale = stale_targets(&mut conn, cutoff, config.batch_limit.max(0))?;

    let mut enqueued = 0;
    let mut deduped = 0;
    for net in &stale {
        let task = ProbeTask::new(net.addr(), TaskSource::Remeasure, now);
        match queue.enqueue(&mut conn, &task, window).await {
            Ok(EnqueueOutcome::Accepted) => enqueued += 1,
            Ok(EnqueueOutcome::Deduped) => deduped += 1,
            Err(e) => warn!("Could not re-enqueue {}: {:?}", net.addr(), e),
        }
    }
    Ok(CycleStats {
        stale: stale.len(),
        enqueued,
        deduped,
        next_cycle: Duration::from_secs(config.interval_seconds.max(1)),
    })
}

/// Targets measured before this instant (or never) are due again.
fn staleness_cutoff(now: NaiveDateTime, ttl_seconds: i64) -> NaiveDateTime {
    now - chrono::Duration::seconds(ttl_seconds.max(0))
}

/// Oldest first; never-measured targets lead the batch.
fn stale_targets(
    conn: &mut PgConnection,
    cutoff: NaiveDateTime,
    limit: i64,
) -> Result<Vec<IpNet>> {
    use db_model::schema::targets::dsl::*;

    targets
        .filter(
            last_measurement_at
                .lt(cutoff)
                .or(last_measurement_at.is_null()),
        )
        .order(last_measurement_at.asc().nulls_first())
        .limit(limit)
        .select(target_ip)
        .load(conn)
        .context("while selecting stale targets")
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use chrono::NaiveDate;

    use super::*;

    fn day(d: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, d)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn two_day_old_measurement_is_past_cutoff() {
        // given: ttl of one day
        let cutoff = staleness_cutoff(day(14, 12), 86400);
        // then: measured two days ago -> due; one hour ago -> not due
        assert_that!(day(12, 12) < cutoff).is_true();
        assert_that!(day(14, 11) < cutoff).is_false();
    }

    #[test]
    fn negative_ttl_is_clamped() {
        let cutoff = staleness_cutoff(day(14, 12), -5);
        assert_that!(cutoff).is_equal_to(day(14, 12));
    }
}
