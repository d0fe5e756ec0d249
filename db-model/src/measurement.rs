use chrono::NaiveDateTime;
use diesel::prelude::*;

/// One probe run against one target. Row state only ever moves forward:
/// inserted -> completed -> enriched -> graph_built.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::measurements)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Measurement {
    pub id: i64,
    pub target_id: i64,
    pub tool: String,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub success: bool,
    pub raw_output: String,
    pub enriched: bool,
    pub enriched_at: Option<NaiveDateTime>,
    pub enrichment_attempts: i32,
    pub graph_built: bool,
    pub graph_built_at: Option<NaiveDateTime>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::measurements)]
pub struct NewMeasurement<'a> {
    pub target_id: i64,
    pub tool: &'a str,
    pub started_at: NaiveDateTime,
    pub success: bool,
    pub raw_output: &'a str,
}
