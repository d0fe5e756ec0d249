use diesel::prelude::*;
use ipnet::IpNet;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::hops)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Hop {
    pub id: i64,
    pub measurement_id: i64,
    pub hop_number: i32,
    pub hop_ip: Option<IpNet>,
    pub rtt_ms: Option<f64>,
    pub asn: Option<i64>,
    pub prefix: Option<String>,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
}

/// What the worker pool writes; enrichment fields start out null and are
/// owned by the enrichment engine afterwards.
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::hops)]
pub struct NewHop {
    pub measurement_id: i64,
    pub hop_number: i32,
    pub hop_ip: Option<IpNet>,
    pub rtt_ms: Option<f64>,
}

/// Enrichment result applied to all hops sharing one IP.
#[derive(AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::hops)]
pub struct HopEnrichment {
    pub asn: Option<i64>,
    pub prefix: Option<String>,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
}
