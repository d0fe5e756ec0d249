//! Free-tier fallback sources, consulted in order when Cymru has no answer:
//! RIPE Stat, then ip-api.com, then ipinfo.io.

use std::net::IpAddr;

use anyhow::Result;
use serde::Deserialize;

use super::CoreRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackSource {
    RipeStat,
    IpApi,
    IpInfo,
}

pub const FALLBACKS: &[FallbackSource] = &[
    FallbackSource::RipeStat,
    FallbackSource::IpApi,
    FallbackSource::IpInfo,
];

impl FallbackSource {
    pub fn name(&self) -> &'static str {
        match self {
            FallbackSource::RipeStat => "ripe",
            FallbackSource::IpApi => "ip-api",
            FallbackSource::IpInfo => "ipinfo",
        }
    }
}

pub async fn lookup(
    http: &reqwest::Client,
    source: FallbackSource,
    ip: IpAddr,
) -> Result<Option<CoreRecord>> {
    match source {
        FallbackSource::RipeStat => ripe_stat(http, ip).await,
        FallbackSource::IpApi => ip_api(http, ip).await,
        FallbackSource::IpInfo => ip_info(http, ip).await,
    }
}

#[derive(Deserialize)]
struct RipeEnvelope {
    #[serde(default)]
    data: RipeData,
}

#[derive(Deserialize, Default)]
struct RipeData {
    #[serde(default)]
    records: Vec<Vec<RipeField>>,
}

#[derive(Deserialize)]
struct RipeField {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

async fn ripe_stat(http: &reqwest::Client, ip: IpAddr) -> Result<Option<CoreRecord>> {
    let envelope: RipeEnvelope = http
        .get("https://stat.ripe.net/data/whois/data.json")
        .query(&[("resource", ip.to_string())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let mut asn = None;
    let mut org_name: Option<String> = None;
    let mut country_code = None;
    let mut prefix = None;
    for record in &envelope.data.records {
        for field in record {
            match field.key.to_ascii_lowercase().as_str() {
                "origin" => {
                    asn = asn.or_else(|| field.value.trim_start_matches("AS").trim().parse().ok())
                }
                "netname" | "descr" | "org-name" => {
                    // keep the most descriptive name we see
                    if org_name.as_ref().map_or(true, |o| field.value.len() > o.len()) {
                        org_name = Some(field.value.clone());
                    }
                }
                "country" => country_code = country_code.or_else(|| Some(field.value.clone())),
                "route" | "route6" => prefix = prefix.or_else(|| Some(field.value.clone())),
                _ => {}
            }
        }
    }
    Ok(asn.map(|asn| CoreRecord {
        asn,
        prefix,
        org_name,
        country_code,
        source: FallbackSource::RipeStat.name(),
    }))
}

#[derive(Deserialize)]
struct IpApiReply {
    #[serde(default)]
    status: String,
    #[serde(rename = "as", default)]
    as_field: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

async fn ip_api(http: &reqwest::Client, ip: IpAddr) -> Result<Option<CoreRecord>> {
    let reply: IpApiReply = http
        .get(format!("http://ip-api.com/json/{}", ip))
        .query(&[("fields", "status,countryCode,as,org")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if reply.status != "success" {
        return Ok(None);
    }
    let (asn, org_name) = split_as_field(&reply.as_field);
    Ok(asn.map(|asn| CoreRecord {
        asn,
        prefix: None,
        org_name,
        country_code: reply.country_code,
        source: FallbackSource::IpApi.name(),
    }))
}

#[derive(Deserialize)]
struct IpInfoReply {
    #[serde(default)]
    org: String,
    country: Option<String>,
}

async fn ip_info(http: &reqwest::Client, ip: IpAddr) -> Result<Option<CoreRecord>> {
    let reply: IpInfoReply = http
        .get(format!("https://ipinfo.io/{}/json", ip))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let (asn, org_name) = split_as_field(&reply.org);
    Ok(asn.map(|asn| CoreRecord {
        asn,
        prefix: None,
        org_name,
        country_code: reply.country,
        source: FallbackSource::IpInfo.name(),
    }))
}

/// Both ip-api and ipinfo report `"AS15169 Google LLC"` in one field.
fn split_as_field(field: &str) -> (Option<i64>, Option<String>) {
    let mut parts = field.trim().splitn(2, char::is_whitespace);
    let asn = parts
        .next()
        .and_then(|tok| tok.trim_start_matches("AS").parse().ok());
    let org = parts
        .next()
        .map(|rest| rest.trim().to_owned())
        .filter(|rest| !rest.is_empty());
    (asn, org)
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn splits_combined_as_org_field() {
        // given, when
        let (asn, org) = split_as_field("AS15169 Google LLC");
        // then
        assert_that!(asn).is_equal_to(Some(15169));
        assert_that!(org).is_equal_to(Some("Google LLC".to_string()));
    }

    #[test]
    fn tolerates_missing_org() {
        let (asn, org) = split_as_field("AS15169");
        assert_that!(asn).is_equal_to(Some(15169));
        assert_that!(org).is_none();
    }

    #[test]
    fn tolerates_empty_field() {
        let (asn, org) = split_as_field("");
        assert_that!(asn).is_none();
        assert_that!(org).is_none();
    }

    #[test]
    fn ripe_records_pick_longest_org_name() {
        // given
        let json = serde_json::json!({
            "data": { "records": [[
                { "key": "origin", "value": "AS15169" },
                { "key": "netname", "value": "GOOGLE" },
                { "key": "descr", "value": "Google LLC, Mountain View" },
                { "key": "country", "value": "US" },
                { "key": "route", "value": "8.8.8.0/24" }
            ]]}
        });
        let envelope: RipeEnvelope = serde_json::from_value(json).unwrap();
        // when: replicate the fold
        let mut org_name: Option<String> = None;
        for record in &envelope.data.records {
            for field in record {
                if matches!(field.key.as_str(), "netname" | "descr" | "org-name")
                    && org_name.as_ref().map_or(true, |o| field.value.len() > o.len())
                {
                    org_name = Some(field.value.clone());
                }
            }
        }
        // then
        assert_that!(org_name.unwrap()).is_equal_to("Google LLC, Mountain View".to_string());
    }
}
