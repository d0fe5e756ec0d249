use chrono::NaiveDateTime;
use diesel::prelude::*;

/// Write-through cache of AS metadata, one row per ASN. Only the enrichment
/// engine writes here; `last_seen` and `total_measurements` are monotonic.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::asns)]
#[diesel(primary_key(asn))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AsnRecord {
    pub asn: i64,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
    pub prefix_count: i32,
    pub neighbor_count: i32,
    pub source: Option<String>,
    pub peeringdb_id: Option<i64>,
    pub facility_count: i32,
    pub peering_policy: Option<String>,
    pub traffic_levels: Option<String>,
    pub irr_as_set: Option<String>,
    pub total_measurements: i64,
    pub avg_rtt_ms: Option<f64>,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub last_enriched: Option<NaiveDateTime>,
    pub last_enrichment_attempt: Option<NaiveDateTime>,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::asns)]
#[diesel(treat_none_as_null = true)]
pub struct AsnUpsert {
    pub asn: i64,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
    pub prefix_count: i32,
    pub neighbor_count: i32,
    pub source: Option<String>,
    pub peeringdb_id: Option<i64>,
    pub facility_count: i32,
    pub peering_policy: Option<String>,
    pub traffic_levels: Option<String>,
    pub irr_as_set: Option<String>,
    pub total_measurements: i64,
    pub avg_rtt_ms: Option<f64>,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub last_enriched: Option<NaiveDateTime>,
    pub last_enrichment_attempt: Option<NaiveDateTime>,
}

impl AsnRecord {
    /// Fresh row for an ASN seen for the first time.
    pub fn first_seen_now(asn: i64, now: NaiveDateTime) -> AsnUpsert {
        AsnUpsert {
            asn,
            org_name: None,
            country_code: None,
            prefix_count: 0,
            neighbor_count: 0,
            source: None,
            peeringdb_id: None,
            facility_count: 0,
            peering_policy: None,
            traffic_levels: None,
            irr_as_set: None,
            total_measurements: 0,
            avg_rtt_ms: None,
            first_seen: now,
            last_seen: now,
            last_enriched: None,
            last_enrichment_attempt: None,
        }
    }

    pub fn to_upsert(&self) -> AsnUpsert {
        AsnUpsert {
            asn: self.asn,
            org_name: self.org_name.clone(),
            country_code: self.country_code.clone(),
            prefix_count: self.prefix_count,
            neighbor_count: self.neighbor_count,
            source: self.source.clone(),
            peeringdb_id: self.peeringdb_id,
            facility_count: self.facility_count,
            peering_policy: self.peering_policy.clone(),
            traffic_levels: self.traffic_levels.clone(),
            irr_as_set: self.irr_as_set.clone(),
            total_measurements: self.total_measurements,
            avg_rtt_ms: self.avg_rtt_ms,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            last_enriched: self.last_enriched,
            last_enrichment_attempt: self.last_enrichment_attempt,
        }
    }
}
