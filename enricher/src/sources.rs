//! AS metadata sources and their merge procedure. Consultation order is
//! fixed: the asns cache (handled by the engine), then Team Cymru, then
//! PeeringDB once an ASN is known, then the external fallbacks. When two
//! sources answer the same field, PeeringDB wins over the fallbacks, which
//! win over Cymru.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};

pub mod cymru;
pub mod external;
pub mod peeringdb;

/// Every source answers within this bound or is treated as failed.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Core IP-to-AS fields as one source reports them.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreRecord {
    pub asn: i64,
    pub prefix: Option<String>,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
    /// Which source supplied these fields; recorded in `asns.source`.
    pub source: &'static str,
}

/// The PeeringDB-only extension fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeeringDbInfo {
    pub peeringdb_id: Option<i64>,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
    pub facility_count: i32,
    pub peering_policy: Option<String>,
    pub traffic_levels: Option<String>,
    pub irr_as_set: Option<String>,
    pub prefix_count: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpRecord {
    pub core: CoreRecord,
    pub peeringdb: Option<PeeringDbInfo>,
}

impl IpRecord {
    /// Field-level merge for the hop columns: PeeringDB overrides the core
    /// record where it has an answer.
    pub fn org_name(&self) -> Option<&str> {
        self.peeringdb
            .as_ref()
            .and_then(|p| p.org_name.as_deref())
            .or(self.core.org_name.as_deref())
    }

    pub fn country_code(&self) -> Option<&str> {
        self.peeringdb
            .as_ref()
            .and_then(|p| p.country_code.as_deref())
            .or(self.core.country_code.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(IpRecord),
    /// Sources answered: this IP maps to no routed AS (private space etc.).
    NoMapping,
    /// Every source errored; worth retrying next cycle.
    Failed,
}

pub struct SourceClient {
    http: reqwest::Client,
}

impl SourceClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tracewatch/", env!("CARGO_PKG_VERSION")))
            .timeout(CALL_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// The merge procedure: Cymru first; fallbacks only when Cymru has no
    /// answer; PeeringDB by ASN once one is known.
    pub async fn lookup_ip(&self, ip: IpAddr) -> LookupOutcome {
        let mut any_answered = false;

        let core = match cymru::lookup(ip).await {
            Ok(Some(core)) => Some(core),
            Ok(None) => {
                any_answered = true;
                None
            }
            Err(e) => {
                debug!("Cymru lookup failed for {}: {:?}", ip, e);
                None
            }
        };

        let core = match core {
            Some(core) => Some(core),
            None => {
                let (fallback, answered) = self.try_fallbacks(ip).await;
                any_answered |= answered;
                fallback
            }
        };

        match core {
            Some(core) => {
                let peeringdb = peeringdb::lookup(&self.http, core.asn).await;
                LookupOutcome::Found(IpRecord { core, peeringdb })
            }
            None if any_answered => LookupOutcome::NoMapping,
            None => LookupOutcome::Failed,
        }
    }

    async fn try_fallbacks(&self, ip: IpAddr) -> (Option<CoreRecord>, bool) {
        let mut any_answered = false;
        for source in external::FALLBACKS {
            match external::lookup(&self.http, *source, ip).await {
                Ok(Some(core)) => return (Some(core), true),
                Ok(None) => any_answered = true,
                Err(e) => warn!("{} lookup failed for {}: {:?}", source.name(), ip, e),
            }
        }
        (None, any_answered)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    fn cymru_core() -> CoreRecord {
        CoreRecord {
            asn: 15169,
            prefix: Some("8.8.8.0/24".to_owned()),
            org_name: Some("GOOGLE, US".to_owned()),
            country_code: Some("US".to_owned()),
            source: "cymru",
        }
    }

    #[test]
    fn peeringdb_org_overrides_cymru() {
        // given
        let record = IpRecord {
            core: cymru_core(),
            peeringdb: Some(PeeringDbInfo {
                org_name: Some("Google LLC".to_owned()),
                ..Default::default()
            }),
        };
        // when, then: org comes from PeeringDB, the rest stays Cymru's
        assert_that!(record.org_name().unwrap()).is_equal_to("Google LLC");
        assert_that!(record.country_code().unwrap()).is_equal_to("US");
        assert_that!(record.core.source).is_equal_to("cymru");
    }

    #[test]
    fn core_fields_survive_without_peeringdb() {
        let record = IpRecord {
            core: cymru_core(),
            peeringdb: None,
        };
        assert_that!(record.org_name().unwrap()).is_equal_to("GOOGLE, US");
    }
}
