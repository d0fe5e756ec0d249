use chrono::NaiveDateTime;
use diesel::prelude::*;
use ipnet::IpNet;

/// Targets come into existence on first enqueue and are never deleted;
/// `source` records whichever producer saw the IP first.
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::targets)]
pub struct NewTarget<'a> {
    pub target_ip: IpNet,
    pub source: &'a str,
    pub created_at: NaiveDateTime,
}
