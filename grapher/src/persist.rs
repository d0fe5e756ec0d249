use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;

use db_model::hop::Hop;
use db_model::measurement::Measurement;

/// Enriched measurements not yet in the graph, oldest completion first.
pub fn fetch_unprojected(conn: &mut PgConnection, limit: i64) -> Result<Vec<Measurement>> {
    use db_model::schema::measurements::dsl::*;

    measurements
        .filter(enriched.eq(true))
        .filter(graph_built.eq(false))
        .order(completed_at.asc())
        .limit(limit)
        .select(Measurement::as_select())
        .load(conn)
        .context("while scanning for measurements to project")
}

pub fn fetch_hops(conn: &mut PgConnection, measurement: i64) -> Result<Vec<Hop>> {
    use db_model::schema::hops::dsl::*;

    hops.filter(measurement_id.eq(measurement))
        .order(hop_number.asc())
        .select(Hop::as_select())
        .load(conn)
        .context("while loading hops for projection")
}

/// Node metadata comes from the asns cache, not from individual hops, so
/// every projected node carries the best-known org and country.
pub fn fetch_asn_meta(
    conn: &mut PgConnection,
    keys: &[i64],
) -> Result<HashMap<i64, (Option<String>, Option<String>)>> {
    use db_model::schema::asns::dsl::*;

    let rows: Vec<(i64, Option<String>, Option<String>)> = asns
        .filter(asn.eq_any(keys))
        .select((asn, org_name, country_code))
        .load(conn)
        .context("while loading AS metadata for projection")?;
    Ok(rows
        .into_iter()
        .map(|(key, org, country)| (key, (org, country)))
        .collect())
}

/// Monotonic flag flip; a measurement already marked stays marked.
pub fn mark_graph_built(conn: &mut PgConnection, id_val: i64, now: NaiveDateTime) -> Result<()> {
    use db_model::schema::measurements::dsl::*;

    diesel::update(
        measurements
            .find(id_val)
            .filter(graph_built.eq(false)),
    )
    .set((graph_built.eq(true), graph_built_at.eq(now)))
    .execute(conn)
    .context("while marking measurement graph_built")?;
    Ok(())
}
