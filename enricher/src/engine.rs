use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use diesel::{Connection, PgConnection};
use ipnet::IpNet;
use itertools::Itertools;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use db_model::asn::{AsnRecord, AsnUpsert};
use db_model::hop::{Hop, HopEnrichment};
use db_model::measurement::Measurement;
use db_model::settings::{self, EnrichmentSettings};

use crate::persist;
use crate::sources::{IpRecord, LookupOutcome, SourceClient};

pub async fn run(stop_rx: CancellationToken) -> Result<()> {
    let engine = Engine {
        sources: SourceClient::new()?,
    };
    info!("Enrichment engine ready for work.");
    loop {
        if stop_rx.is_cancelled() {
            return Ok(());
        }
        let pause = match engine.run_cycle().await {
            Ok(report) => {
                if report.enriched > 0 || report.touched > 0 {
                    debug!(
                        "Enrichment cycle done: {} touched, {} now enriched",
                        report.touched, report.enriched
                    );
                }
                // Keep going while there is a backlog; sleep once drained.
                (report.touched == 0).then_some(report.cycle_pause)
            }
            Err(e) => {
                error!("Enrichment cycle failed: {:?}", e);
                Some(Duration::from_secs(15))
            }
        };
        if let Some(pause) = pause {
            tokio::select! {
                biased;
                _ = stop_rx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

struct Engine {
    sources: SourceClient,
}

struct CycleReport {
    touched: usize,
    enriched: usize,
    cycle_pause: Duration,
}

/// How an IP got its answer this cycle; cached answers must not overwrite
/// the AS row's enrichment timestamps or metadata.
enum Resolution {
    Fresh(LookupOutcome),
    Cached(IpRecord),
    /// Live re-lookup failed, but a prior enrichment already mapped the IP
    /// to this ASN. The row's attempt stamp must still move so the
    /// negative TTL can take hold.
    FailedKnown(i64),
}

impl Resolution {
    fn record(&self) -> Option<&IpRecord> {
        match self {
            Resolution::Fresh(LookupOutcome::Found(record)) => Some(record),
            Resolution::Cached(record) => Some(record),
            _ => None,
        }
    }

    fn is_failed(&self) -> bool {
        matches!(
            self,
            Resolution::Fresh(LookupOutcome::Failed) | Resolution::FailedKnown(_)
        )
    }

    fn is_fresh_find(&self) -> bool {
        matches!(self, Resolution::Fresh(LookupOutcome::Found(_)))
    }
}

impl Engine {
    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut conn = db_model::persist::connect()?;
        let config = settings::load::<EnrichmentSettings>(&mut conn);
        let cycle_pause = Duration::from_secs(config.cycle_seconds.max(1));

        let batch = persist::fetch_unenriched(&mut conn, config.batch_size.max(1))?;
        if batch.is_empty() {
            return Ok(CycleReport {
                touched: 0,
                enriched: 0,
                cycle_pause,
            });
        }
        let ids: Vec<i64> = batch.iter().map(|m| m.id).collect();
        let hops = persist::fetch_batch_hops(&mut conn, &ids)?;
        let now = Utc::now().naive_utc();

        let unique_ips: BTreeSet<IpNet> = hops.iter().filter_map(|hop| hop.hop_ip).collect();
        let mut outcomes: HashMap<IpNet, Resolution> = HashMap::new();
        for net in unique_ips {
            let resolution = self.resolve(&mut conn, net, &config, now).await?;
            outcomes.insert(net, resolution);
        }

        let done = measurements_done(&batch, &hops, &outcomes, config.max_attempts);
        let enriched = conn
            .transaction(|conn| {
                for (net, resolution) in &outcomes {
                    if let Some(record) = resolution.record() {
                        persist::apply_hop_enrichment(conn, &ids, *net, &hop_update(record))?;
                    }
                }
                upsert_asn_stats(conn, &hops, &outcomes, now)?;
                persist::bump_attempts(conn, &ids)?;
                persist::mark_enriched(conn, &done, now)
            })
            .context("while committing enrichment batch")?;

        Ok(CycleReport {
            touched: ids.len(),
            enriched,
            cycle_pause,
        })
    }

    /// Source 1 of the merge order: the asns table as a write-through cache.
    /// A fresh `last_enriched` short-circuits entirely; a recent failed
    /// attempt (negative TTL) also short-circuits so flaky upstreams don't
    /// get hammered every cycle.
    async fn resolve(
        &self,
        conn: &mut PgConnection,
        net: IpNet,
        config: &EnrichmentSettings,
        now: NaiveDateTime,
    ) -> Result<Resolution> {
        let mut known_asn = None;
        if let Some((prior_hop, asn_row)) = persist::cached_ip_record(conn, net)? {
            known_asn = prior_hop.asn;
            if let Some(asn_row) = asn_row {
                let positive = chrono::Duration::seconds(config.asn_cache_ttl_seconds);
                let negative = chrono::Duration::seconds(config.negative_cache_ttl_seconds);
                let enriched_recently = asn_row
                    .last_enriched
                    .map_or(false, |at| now.signed_duration_since(at) <= positive);
                let attempted_recently = asn_row
                    .last_enrichment_attempt
                    .map_or(false, |at| now.signed_duration_since(at) <= negative);
                if enriched_recently || attempted_recently {
                    return Ok(Resolution::Cached(cache_record(&prior_hop, &asn_row)));
                }
            }
        }
        let outcome = self.sources.lookup_ip(net.addr()).await;
        if matches!(outcome, LookupOutcome::Failed) {
            if let Some(asn) = known_asn {
                return Ok(Resolution::FailedKnown(asn));
            }
        }
        Ok(Resolution::Fresh(outcome))
    }
}

fn cache_record(prior_hop: &Hop, asn_row: &AsnRecord) -> IpRecord {
    IpRecord {
        core: crate::sources::CoreRecord {
            asn: asn_row.asn,
            prefix: prior_hop.prefix.clone(),
            org_name: asn_row.org_name.clone(),
            country_code: asn_row.country_code.clone(),
            source: "cache",
        },
        peeringdb: None,
    }
}

fn hop_update(record: &IpRecord) -> HopEnrichment {
    HopEnrichment {
        asn: Some(record.core.asn),
        prefix: record.core.prefix.clone(),
        org_name: record.org_name().map(str::to_owned),
        country_code: record.country_code().map(str::to_owned),
    }
}

/// A measurement leaves the queue once every hop IP has an answer (found or
/// no-mapping), or once the retry ceiling forces it out with partial data.
fn measurements_done(
    batch: &[Measurement],
    hops: &[Hop],
    outcomes: &HashMap<IpNet, Resolution>,
    max_attempts: i32,
) -> Vec<i64> {
    let mut nets_by_measurement: HashMap<i64, Vec<IpNet>> = HashMap::new();
    for hop in hops {
        if let Some(net) = hop.hop_ip {
            nets_by_measurement.entry(hop.measurement_id).or_default().push(net);
        }
    }
    batch
        .iter()
        .filter(|m| {
            let unresolved = nets_by_measurement
                .get(&m.id)
                .map(|nets| {
                    nets.iter()
                        .any(|net| outcomes.get(net).map_or(true, Resolution::is_failed))
                })
                .unwrap_or(false);
            !unresolved || m.enrichment_attempts + 1 >= max_attempts
        })
        .map(|m| m.id)
        .collect()
}

#[derive(Default)]
struct AsnAggregate {
    fresh: Option<IpRecord>,
    /// A live re-lookup for one of this ASN's IPs failed this cycle.
    failed_attempt: bool,
    rtts: Vec<f64>,
    measurements: HashSet<i64>,
    neighbors: HashSet<i64>,
}

fn upsert_asn_stats(
    conn: &mut PgConnection,
    hops: &[Hop],
    outcomes: &HashMap<IpNet, Resolution>,
    now: NaiveDateTime,
) -> Result<()> {
    let aggregates = aggregate_asns(hops, outcomes);
    for (asn, aggregate) in aggregates {
        let existing = persist::load_asn(conn, asn)?;
        let row = fold_into_row(existing, asn, &aggregate, now);
        persist::upsert_asn(conn, &row)?;
    }
    Ok(())
}

fn aggregate_asns(
    hops: &[Hop],
    outcomes: &HashMap<IpNet, Resolution>,
) -> HashMap<i64, AsnAggregate> {
    let asn_of = |net: IpNet| -> Option<i64> {
        outcomes.get(&net).and_then(|r| r.record()).map(|r| r.core.asn)
    };
    let mut aggregates: HashMap<i64, AsnAggregate> = HashMap::new();

    for hop in hops {
        let Some(net) = hop.hop_ip else { continue };
        let Some(asn) = asn_of(net) else { continue };
        let entry = aggregates.entry(asn).or_default();
        entry.measurements.insert(hop.measurement_id);
        if let Some(rtt) = hop.rtt_ms {
            entry.rtts.push(rtt);
        }
        if entry.fresh.is_none() {
            if let Some(resolution) = outcomes.get(&net) {
                if resolution.is_fresh_find() {
                    entry.fresh = resolution.record().cloned();
                }
            }
        }
    }

    // Failed re-lookups of known ASNs contribute no data, but their rows
    // still need the attempt stamped.
    for resolution in outcomes.values() {
        if let Resolution::FailedKnown(asn) = resolution {
            aggregates.entry(*asn).or_default().failed_attempt = true;
        }
    }

    // Observed adjacencies feed the neighbor degree, mirroring how the
    // graph projector will link these ASNs.
    for (_, measurement_hops) in &hops.iter().chunk_by(|hop| hop.measurement_id) {
        let sequence: Vec<i64> = measurement_hops
            .filter_map(|hop| hop.hop_ip.and_then(asn_of))
            .dedup()
            .collect();
        for (a, b) in sequence.iter().tuple_windows() {
            if a != b {
                aggregates.entry(*a).or_default().neighbors.insert(*b);
                aggregates.entry(*b).or_default().neighbors.insert(*a);
            }
        }
    }
    aggregates
}

fn fold_into_row(
    existing: Option<AsnRecord>,
    asn: i64,
    aggregate: &AsnAggregate,
    now: NaiveDateTime,
) -> AsnUpsert {
    let mut row = existing
        .map(|r| r.to_upsert())
        .unwrap_or_else(|| AsnRecord::first_seen_now(asn, now));

    let batch_count = aggregate.measurements.len() as i64;
    if batch_count > 0 {
        row.last_seen = now;
        if let Some(batch_mean) = mean(&aggregate.rtts) {
            row.avg_rtt_ms = Some(fold_mean(
                row.avg_rtt_ms,
                row.total_measurements,
                batch_mean,
                batch_count,
            ));
        }
        row.total_measurements += batch_count;
    }
    row.neighbor_count = row.neighbor_count.max(aggregate.neighbors.len() as i32);

    if let Some(record) = &aggregate.fresh {
        row.org_name = record.org_name().map(str::to_owned);
        row.country_code = record.country_code().map(str::to_owned);
        row.source = Some(record.core.source.to_owned());
        if let Some(peeringdb) = &record.peeringdb {
            row.peeringdb_id = peeringdb.peeringdb_id;
            row.facility_count = peeringdb.facility_count;
            row.peering_policy = peeringdb.peering_policy.clone();
            row.traffic_levels = peeringdb.traffic_levels.clone();
            row.irr_as_set = peeringdb.irr_as_set.clone();
            row.prefix_count = peeringdb.prefix_count;
        }
        row.last_enriched = Some(now);
        row.last_enrichment_attempt = Some(now);
    } else if aggregate.failed_attempt {
        // Move only the attempt stamp: the negative TTL suppresses
        // re-lookups without pretending the data got refreshed.
        row.last_enrichment_attempt = Some(now);
    }
    row
}

fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

fn fold_mean(old_avg: Option<f64>, old_total: i64, batch_mean: f64, batch_count: i64) -> f64 {
    match old_avg {
        Some(avg) if old_total > 0 => {
            (avg * old_total as f64 + batch_mean * batch_count as f64)
                / (old_total + batch_count) as f64
        }
        _ => batch_mean,
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use chrono::NaiveDate;

    use crate::sources::CoreRecord;

    use super::*;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn net(s: &str) -> IpNet {
        IpNet::from(s.parse::<std::net::IpAddr>().expect(s))
    }

    fn found(asn: i64) -> Resolution {
        Resolution::Fresh(LookupOutcome::Found(record(asn)))
    }

    fn record(asn: i64) -> IpRecord {
        IpRecord {
            core: CoreRecord {
                asn,
                prefix: None,
                org_name: None,
                country_code: None,
                source: "cymru",
            },
            peeringdb: None,
        }
    }

    fn hop(measurement_id: i64, number: i32, ip: Option<&str>, rtt: Option<f64>) -> Hop {
        Hop {
            id: measurement_id * 100 + number as i64,
            measurement_id,
            hop_number: number,
            hop_ip: ip.map(net),
            rtt_ms: rtt,
            asn: None,
            prefix: None,
            org_name: None,
            country_code: None,
        }
    }

    fn measurement(id: i64, attempts: i32) -> Measurement {
        Measurement {
            id,
            target_id: 1,
            tool: "traceroute".to_owned(),
            started_at: at(),
            completed_at: Some(at()),
            success: true,
            raw_output: String::new(),
            enriched: false,
            enriched_at: None,
            enrichment_attempts: attempts,
            graph_built: false,
            graph_built_at: None,
        }
    }

    #[test]
    fn fully_resolved_measurement_is_done() {
        // given
        let batch = [measurement(1, 0)];
        let hops = [hop(1, 1, Some("10.0.0.1"), None), hop(1, 2, Some("10.0.0.2"), None)];
        let outcomes: HashMap<IpNet, Resolution> = [
            (net("10.0.0.1"), found(64500)),
            (net("10.0.0.2"), Resolution::Fresh(LookupOutcome::NoMapping)),
        ]
        .into_iter()
        .collect();
        // when
        let done = measurements_done(&batch, &hops, &outcomes, 5);
        // then: a no-mapping answer still counts as resolved
        assert_that!(done).is_equal_to(vec![1]);
    }

    #[test]
    fn failed_lookup_defers_measurement() {
        let batch = [measurement(1, 0)];
        let hops = [hop(1, 1, Some("10.0.0.1"), None)];
        let outcomes: HashMap<IpNet, Resolution> =
            [(net("10.0.0.1"), Resolution::Fresh(LookupOutcome::Failed))]
                .into_iter()
                .collect();
        let done = measurements_done(&batch, &hops, &outcomes, 5);
        assert_that!(done).has_length(0);
    }

    #[test]
    fn retry_ceiling_forces_partial_enrichment() {
        // given: fourth attempt incoming with max_attempts = 5... not yet
        let batch = [measurement(1, 3), measurement(2, 4)];
        let hops = [hop(1, 1, Some("10.0.0.1"), None), hop(2, 1, Some("10.0.0.1"), None)];
        let outcomes: HashMap<IpNet, Resolution> =
            [(net("10.0.0.1"), Resolution::Fresh(LookupOutcome::Failed))]
                .into_iter()
                .collect();
        // when
        let done = measurements_done(&batch, &hops, &outcomes, 5);
        // then: only the measurement reaching the ceiling gives up
        assert_that!(done).is_equal_to(vec![2]);
    }

    #[test]
    fn measurement_with_only_silent_hops_is_done() {
        let batch = [measurement(1, 0)];
        let hops: [Hop; 0] = [];
        let outcomes = HashMap::new();
        let done = measurements_done(&batch, &hops, &outcomes, 5);
        assert_that!(done).is_equal_to(vec![1]);
    }

    #[test]
    fn aggregate_links_adjacent_asns_and_collects_rtts() {
        // given: one measurement traversing 64500 -> 64500 -> 64501
        let hops = [
            hop(1, 1, Some("10.0.0.1"), Some(1.0)),
            hop(1, 2, Some("10.0.0.2"), Some(3.0)),
            hop(1, 3, Some("10.0.1.1"), Some(9.0)),
        ];
        let outcomes: HashMap<IpNet, Resolution> = [
            (net("10.0.0.1"), found(64500)),
            (net("10.0.0.2"), found(64500)),
            (net("10.0.1.1"), found(64501)),
        ]
        .into_iter()
        .collect();
        // when
        let aggregates = aggregate_asns(&hops, &outcomes);
        // then
        let first = &aggregates[&64500];
        assert_that!(first.rtts).is_equal_to(vec![1.0, 3.0]);
        assert_that!(first.neighbors.contains(&64501)).is_true();
        assert_that!(aggregates[&64501].neighbors.contains(&64500)).is_true();
    }

    #[test]
    fn fold_mean_weights_by_measurement_count() {
        // given: avg 10 over 4 measurements, batch mean 20 over 1
        let folded = fold_mean(Some(10.0), 4, 20.0, 1);
        // then
        assert_that!(folded).is_equal_to(12.0);
    }

    #[test]
    fn fold_mean_starts_from_batch_mean() {
        assert_that!(fold_mean(None, 0, 7.5, 2)).is_equal_to(7.5);
    }

    #[test]
    fn fresh_record_refreshes_metadata_and_timestamps() {
        // given
        let aggregate = AsnAggregate {
            fresh: Some(record(64500)),
            rtts: vec![4.0],
            measurements: [1].into_iter().collect(),
            ..AsnAggregate::default()
        };
        // when
        let row = fold_into_row(None, 64500, &aggregate, at());
        // then
        assert_that!(row.last_enriched).is_equal_to(Some(at()));
        assert_that!(row.total_measurements).is_equal_to(1);
        assert_that!(row.source).is_equal_to(Some("cymru".to_string()));
    }

    #[test]
    fn cached_record_leaves_enrichment_timestamps_alone() {
        // given
        let aggregate = AsnAggregate {
            measurements: [1].into_iter().collect(),
            ..AsnAggregate::default()
        };
        // when
        let row = fold_into_row(None, 64500, &aggregate, at());
        // then
        assert_that!(row.last_enriched).is_none();
        assert_that!(row.last_seen).is_equal_to(at());
    }

    #[test]
    fn failed_relookup_of_known_asn_is_still_unresolved() {
        // given: cache expired, live lookup failed, but the ASN is known
        let batch = [measurement(1, 0)];
        let hops = [hop(1, 1, Some("10.0.0.1"), None)];
        let outcomes: HashMap<IpNet, Resolution> =
            [(net("10.0.0.1"), Resolution::FailedKnown(64500))]
                .into_iter()
                .collect();
        // when, then: the measurement waits for a later cycle
        let done = measurements_done(&batch, &hops, &outcomes, 5);
        assert_that!(done).has_length(0);
    }

    #[test]
    fn failed_relookup_of_known_asn_marks_the_row_for_an_attempt() {
        // given
        let hops = [hop(1, 1, Some("10.0.0.1"), Some(2.0))];
        let outcomes: HashMap<IpNet, Resolution> =
            [(net("10.0.0.1"), Resolution::FailedKnown(64500))]
                .into_iter()
                .collect();
        // when
        let aggregates = aggregate_asns(&hops, &outcomes);
        // then: an entry exists even though the hop contributed no data
        let entry = &aggregates[&64500];
        assert_that!(entry.failed_attempt).is_true();
        assert_that!(entry.measurements.len()).is_equal_to(0);
        assert_that!(entry.rtts).has_length(0);
    }

    fn asn_row(asn: i64, stamped: NaiveDateTime) -> AsnRecord {
        AsnRecord {
            asn,
            org_name: Some("EXAMPLE-AS".to_owned()),
            country_code: Some("US".to_owned()),
            prefix_count: 0,
            neighbor_count: 2,
            source: Some("cymru".to_owned()),
            peeringdb_id: None,
            facility_count: 0,
            peering_policy: None,
            traffic_levels: None,
            irr_as_set: None,
            total_measurements: 7,
            avg_rtt_ms: Some(4.0),
            first_seen: stamped,
            last_seen: stamped,
            last_enriched: Some(stamped),
            last_enrichment_attempt: Some(stamped),
        }
    }

    #[test]
    fn failed_attempt_bumps_only_the_attempt_stamp() {
        // given: a row enriched a while ago, this cycle's re-lookup failed
        let earlier = at() - chrono::Duration::days(10);
        let aggregate = AsnAggregate {
            failed_attempt: true,
            ..AsnAggregate::default()
        };
        // when
        let row = fold_into_row(Some(asn_row(64500, earlier)), 64500, &aggregate, at());
        // then: the attempt moves, nothing else gets refreshed
        assert_that!(row.last_enrichment_attempt).is_equal_to(Some(at()));
        assert_that!(row.last_enriched).is_equal_to(Some(earlier));
        assert_that!(row.last_seen).is_equal_to(earlier);
        assert_that!(row.total_measurements).is_equal_to(7);
        assert_that!(row.org_name).is_equal_to(Some("EXAMPLE-AS".to_string()));
    }
}
