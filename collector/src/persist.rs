use std::net::IpAddr;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use tracewatch::helpers::ip::ToHostNet;

/// Upserts the domain-to-IP observation. The schema has no column for
/// client addresses on purpose.
pub fn upsert_dns_target(
    conn: &mut PgConnection,
    observed_domain: &str,
    ip: IpAddr,
    seen_at: NaiveDateTime,
    qtype: Option<&str>,
) -> Result<()> {
    use db_model::schema::dns_targets::dsl::*;

    diesel::insert_into(dns_targets)
        .values((
            domain.eq(observed_domain),
            target_ip.eq(ip.to_host_net()),
            first_seen.eq(seen_at),
            last_seen.eq(seen_at),
            query_count.eq(1_i64),
            last_qtype.eq(qtype),
        ))
        .on_conflict((domain, target_ip))
        .do_update()
        .set((
            last_seen.eq(seen_at),
            query_count.eq(query_count + 1),
            last_qtype.eq(qtype),
        ))
        .execute(conn)
        .context("while upserting dns_targets row")?;
    Ok(())
}
