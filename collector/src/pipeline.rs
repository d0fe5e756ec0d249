use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use db_model::settings::{self, CollectorSettings, QueueSettings};
use queue_models::probe_task::{ProbeTask, TaskSource};
use tracewatch::target_queue::{EnqueueOutcome, TargetQueue};

use crate::source::{DnsQuery, DnsSource};
use crate::{filter, persist, resolve};

/// Parallel resolver lookups per cycle; enough to drain a busy resolver's
/// log without stampeding it.
const RESOLVE_CONCURRENCY: usize = 20;

pub async fn run(
    mut source: Box<dyn DnsSource>,
    queue: TargetQueue,
    stop_rx: CancellationToken,
) -> Result<()> {
    info!("DNS collector ready.");
    loop {
        let pause = match run_cycle(source.as_mut(), &queue).await {
            Ok(stats) => {
                if stats.observed > 0 {
                    info!(
                        "DNS cycle: {} observed, {} kept, {} resolved IPs, {} enqueued",
                        stats.observed, stats.kept, stats.resolved, stats.enqueued
                    );
                }
                stats.pause
            }
            Err(e) => {
                error!("DNS collection cycle failed: {:?}", e);
                Duration::from_secs(CollectorSettings::default().poll_interval_seconds)
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
    observed: usize,
    kept: usize,
    resolved: usize,
    enqueued: usize,
    pause: Duration,
}

async fn run_cycle(source: &mut dyn DnsSource, queue: &TargetQueue) -> Result<CycleStats> {
    let mut conn = db_model::persist::connect()?;
    let config = settings::load::<CollectorSettings>(&mut conn);
    let queue_config = settings::load::<QueueSettings>(&mut conn);
    let pause = Duration::from_secs(config.poll_interval_seconds.max(1));

    let observed = source.fetch_new().await?;
    let kept: Vec<DnsQuery> = observed
        .iter()
        .filter(|query| !filter::should_ignore(&config, query))
        .cloned()
        .collect();

    let resolved = resolve_batch(&kept, &config).await;
    let resolved_count = resolved.iter().map(|(_, ips)| ips.len()).sum();

    let window = Duration::from_secs(queue_config.dedupe_window_seconds.max(0) as u64);
    let mut enqueued = 0;
    let mut seen_ips: HashSet<IpAddr> = HashSet::new();
    for (query, ips) in &resolved {
        for ip in ips {
            // client_ip stops here: only domain and address are persisted
            if let Err(e) =
                persist::upsert_dns_target(&mut conn, &query.domain, *ip, query.timestamp, query.qtype.as_deref())
            {
                warn!("Could not record dns target {}: {:?}", query.domain, e);
            }
            if !seen_ips.insert(*ip) {
                continue;
            }
            let task = ProbeTask::new(*ip, TaskSource::Dns, Utc::now().naive_utc());
            match queue.enqueue(&mut conn, &task, window).await {
                Ok(EnqueueOutcome::Accepted) => enqueued += 1,
                Ok(EnqueueOutcome::Deduped) => {}
                Err(e) => warn!("Could not enqueue {}: {:?}", ip, e),
            }
        }
    }

    Ok(CycleStats {
        observed: observed.len(),
        kept: kept.len(),
        resolved: resolved_count,
        enqueued,
        pause,
    })
}

async fn resolve_batch(
    queries: &[DnsQuery],
    config: &CollectorSettings,
) -> Vec<(DnsQuery, Vec<IpAddr>)> {
    let limiter = Arc::new(Semaphore::new(RESOLVE_CONCURRENCY));
    let lookups = queries.iter().map(|query| {
        let limiter = limiter.clone();
        async move {
            let _permit = limiter.acquire().await.expect("resolver semaphore open");
            let ips = resolve::resolve_domain(
                &query.domain,
                query.qtype.as_deref(),
                config.max_ips_per_domain,
            )
            .await;
            (query.clone(), ips)
        }
    });
    join_all(lookups).await
}
