//! PeeringDB `net` objects by ASN. Best-effort: any failure just means the
//! extension fields stay empty this round.

use log::{debug, warn};
use serde::Deserialize;

use super::PeeringDbInfo;

const API_ROOT: &str = "https://www.peeringdb.com/api";

#[derive(Deserialize)]
struct NetEnvelope {
    #[serde(default)]
    data: Vec<NetRecord>,
}

#[derive(Deserialize)]
struct NetRecord {
    id: Option<i64>,
    name: Option<String>,
    country: Option<String>,
    policy_general: Option<String>,
    info_traffic: Option<String>,
    irr_as_set: Option<String>,
    #[serde(default)]
    netfac_set: Vec<serde_json::Value>,
    #[serde(default)]
    netixlan_set: Vec<NetIxLan>,
}

#[derive(Deserialize)]
struct NetIxLan {
    ipaddr4: Option<String>,
    ipaddr6: Option<String>,
}

pub async fn lookup(http: &reqwest::Client, asn: i64) -> Option<PeeringDbInfo> {
    match try_lookup(http, asn).await {
        Ok(info) => info,
        Err(e) => {
            warn!("PeeringDB lookup failed for AS{}: {:?}", asn, e);
            None
        }
    }
}

async fn try_lookup(http: &reqwest::Client, asn: i64) -> anyhow::Result<Option<PeeringDbInfo>> {
    let envelope: NetEnvelope = http
        .get(format!("{}/net", API_ROOT))
        .query(&[("asn", asn.to_string()), ("depth", "2".to_owned())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let Some(record) = envelope.data.into_iter().next() else {
        debug!("AS{} is not registered in PeeringDB", asn);
        return Ok(None);
    };
    let prefix_count = record
        .netixlan_set
        .iter()
        .map(|lan| lan.ipaddr4.is_some() as i32 + lan.ipaddr6.is_some() as i32)
        .sum();
    Ok(Some(PeeringDbInfo {
        peeringdb_id: record.id,
        org_name: empty_to_none(record.name),
        country_code: empty_to_none(record.country),
        facility_count: record.netfac_set.len() as i32,
        peering_policy: empty_to_none(record.policy_general),
        traffic_levels: empty_to_none(record.info_traffic),
        irr_as_set: empty_to_none(record.irr_as_set),
        prefix_count,
    }))
}

fn empty_to_none(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn envelope_parses_with_extension_counts() {
        // given
        let json = serde_json::json!({
            "data": [{
                "id": 433,
                "name": "Google LLC",
                "country": "US",
                "policy_general": "Open",
                "info_traffic": "100+ Tbps",
                "irr_as_set": "AS-GOOGLE",
                "netfac_set": [{}, {}, {}],
                "netixlan_set": [
                    {"ipaddr4": "203.0.113.1", "ipaddr6": "2001:db8::1"},
                    {"ipaddr4": "203.0.113.2", "ipaddr6": null}
                ]
            }]
        });
        // when
        let envelope: NetEnvelope = serde_json::from_value(json).unwrap();
        let record = &envelope.data[0];
        // then
        assert_that!(record.netfac_set).has_length(3);
        let prefix_count: i32 = record
            .netixlan_set
            .iter()
            .map(|lan| lan.ipaddr4.is_some() as i32 + lan.ipaddr6.is_some() as i32)
            .sum();
        assert_that!(prefix_count).is_equal_to(3);
    }

    #[test]
    fn blank_strings_become_none() {
        assert_that!(empty_to_none(Some("  ".to_owned()))).is_none();
        assert_that!(empty_to_none(Some("Open".to_owned()))).is_some();
        assert_that!(empty_to_none(None)).is_none();
    }
}
