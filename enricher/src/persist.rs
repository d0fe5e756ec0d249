use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use ipnet::IpNet;

use db_model::asn::{AsnRecord, AsnUpsert};
use db_model::hop::{Hop, HopEnrichment};
use db_model::measurement::Measurement;

/// Measurements awaiting enrichment, oldest completion first. Rows without
/// completed_at belong to crashed probes and are skipped deliberately.
pub fn fetch_unenriched(conn: &mut PgConnection, limit: i64) -> Result<Vec<Measurement>> {
    use db_model::schema::measurements::dsl::*;

    measurements
        .filter(enriched.eq(false))
        .filter(completed_at.is_not_null())
        .order(completed_at.asc())
        .limit(limit)
        .select(Measurement::as_select())
        .load(conn)
        .context("while scanning for unenriched measurements")
}

pub fn fetch_batch_hops(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<Hop>> {
    use db_model::schema::hops::dsl::*;

    hops.filter(measurement_id.eq_any(ids))
        .filter(hop_ip.is_not_null())
        .order((measurement_id.asc(), hop_number.asc()))
        .select(Hop::as_select())
        .load(conn)
        .context("while loading hops of the enrichment batch")
}

/// The most recent prior enrichment of this IP, if any, together with the
/// cached AS row it points at.
pub fn cached_ip_record(
    conn: &mut PgConnection,
    ip: IpNet,
) -> Result<Option<(Hop, Option<AsnRecord>)>> {
    use db_model::schema::asns::dsl as a;
    use db_model::schema::hops::dsl as h;

    let prior: Option<Hop> = h::hops
        .filter(h::hop_ip.eq(ip))
        .filter(h::asn.is_not_null())
        .order(h::id.desc())
        .select(Hop::as_select())
        .first(conn)
        .optional()
        .context("while checking prior enrichment of an IP")?;
    let Some(prior) = prior else {
        return Ok(None);
    };
    let asn_row = a::asns
        .find(prior.asn.expect("filtered on asn not null"))
        .select(AsnRecord::as_select())
        .first(conn)
        .optional()
        .context("while loading cached AS row")?;
    Ok(Some((prior, asn_row)))
}

/// One bulk write per (batch, IP) pair.
pub fn apply_hop_enrichment(
    conn: &mut PgConnection,
    ids: &[i64],
    ip: IpNet,
    update: &HopEnrichment,
) -> Result<usize> {
    use db_model::schema::hops::dsl::*;

    diesel::update(
        hops.filter(measurement_id.eq_any(ids))
            .filter(hop_ip.eq(ip)),
    )
    .set(update)
    .execute(conn)
    .context("while writing hop enrichment")
}

pub fn load_asn(conn: &mut PgConnection, asn_key: i64) -> Result<Option<AsnRecord>> {
    use db_model::schema::asns::dsl as a;

    a::asns
        .find(asn_key)
        .select(AsnRecord::as_select())
        .first(conn)
        .optional()
        .context("while loading AS row")
}

pub fn upsert_asn(conn: &mut PgConnection, row: &AsnUpsert) -> Result<()> {
    use db_model::schema::asns::dsl as a;

    diesel::insert_into(a::asns)
        .values(row)
        .on_conflict(a::asn)
        .do_update()
        .set(row)
        .execute(conn)
        .context("while upserting AS row")?;
    Ok(())
}

pub fn bump_attempts(conn: &mut PgConnection, ids: &[i64]) -> Result<()> {
    use db_model::schema::measurements::dsl::*;

    diesel::update(measurements.filter(id.eq_any(ids)))
        .set(enrichment_attempts.eq(enrichment_attempts + 1))
        .execute(conn)
        .context("while counting enrichment attempts")?;
    Ok(())
}

/// Monotonic: the filter makes re-marking a no-op, so a done measurement is
/// never touched again.
pub fn mark_enriched(conn: &mut PgConnection, ids: &[i64], now: NaiveDateTime) -> Result<usize> {
    use db_model::schema::measurements::dsl::*;

    diesel::update(
        measurements
            .filter(id.eq_any(ids))
            .filter(enriched.eq(false)),
    )
    .set((enriched.eq(true), enriched_at.eq(now)))
    .execute(conn)
    .context("while marking measurements enriched")
}
