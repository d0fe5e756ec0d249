//! Live runtime configuration, stored as JSONB rows in the `settings` table.
//! Components re-read their section every cycle; anything missing or
//! malformed falls back to the compiled-in defaults so a bad write can
//! never take a loop down.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::schema::settings::dsl;

/// A named section of the settings table with a fixed key.
pub trait SettingsSection: DeserializeOwned + Default {
    const KEY: &'static str;
}

/// Reads a section, falling back to defaults on a missing row, a malformed
/// value, or a store hiccup (the next cycle will retry anyway).
pub fn load<S: SettingsSection>(conn: &mut PgConnection) -> S {
    let row: QueryResult<serde_json::Value> = dsl::settings
        .filter(dsl::key.eq(S::KEY))
        .select(dsl::value)
        .first(conn);
    match row {
        Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("Malformed settings under `{}`, using defaults: {}", S::KEY, e);
            S::default()
        }),
        Err(diesel::NotFound) => S::default(),
        Err(e) => {
            warn!("Could not read settings `{}`, using defaults: {}", S::KEY, e);
            S::default()
        }
    }
}

pub fn get_raw(conn: &mut PgConnection, key: &str) -> Result<Option<serde_json::Value>> {
    dsl::settings
        .filter(dsl::key.eq(key))
        .select(dsl::value)
        .first(conn)
        .optional()
        .context("while reading settings row")
}

pub fn set_raw(
    conn: &mut PgConnection,
    key: &str,
    value: serde_json::Value,
    now: NaiveDateTime,
) -> Result<()> {
    diesel::insert_into(dsl::settings)
        .values((dsl::key.eq(key), dsl::value.eq(&value), dsl::updated_at.eq(now)))
        .on_conflict(dsl::key)
        .do_update()
        .set((dsl::value.eq(&value), dsl::updated_at.eq(now)))
        .execute(conn)
        .context("while upserting settings row")?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub rate_limit_per_minute: u32,
    pub max_concurrent_probes: usize,
    pub worker_count: usize,
    pub probe_timeout_seconds: u64,
    /// Ordered by preference; the first tool present on the host wins.
    pub tool_preference: Vec<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 30,
            max_concurrent_probes: 5,
            worker_count: 2,
            probe_timeout_seconds: 30,
            tool_preference: vec![
                "scamper".to_owned(),
                "traceroute".to_owned(),
                "mtr".to_owned(),
            ],
        }
    }
}

impl SettingsSection for WorkerSettings {
    const KEY: &'static str = "worker_settings";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub batch_size: i64,
    pub cycle_seconds: u64,
    pub asn_cache_ttl_seconds: i64,
    pub negative_cache_ttl_seconds: i64,
    pub max_attempts: i32,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            cycle_seconds: 15,
            asn_cache_ttl_seconds: 7 * 24 * 3600,
            negative_cache_ttl_seconds: 3600,
            max_attempts: 5,
        }
    }
}

impl SettingsSection for EnrichmentSettings {
    const KEY: &'static str = "enrichment_settings";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeasurementSettings {
    pub ttl_seconds: i64,
    pub batch_limit: i64,
    pub interval_seconds: u64,
}

impl Default for RemeasurementSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 86400,
            batch_limit: 200,
            interval_seconds: 3600,
        }
    }
}

impl SettingsSection for RemeasurementSettings {
    const KEY: &'static str = "remeasurement_settings";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub dedupe_window_seconds: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            dedupe_window_seconds: 60,
        }
    }
}

impl SettingsSection for QueueSettings {
    const KEY: &'static str = "queue_settings";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub max_ips_per_domain: usize,
    pub poll_interval_seconds: u64,
    pub ignore_domains_suffix: Vec<String>,
    pub ignore_qtypes: Vec<String>,
    pub ignore_clients: Vec<String>,
    pub max_domain_length: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            max_ips_per_domain: 4,
            poll_interval_seconds: 30,
            ignore_domains_suffix: vec![],
            ignore_qtypes: vec![],
            ignore_clients: vec![],
            max_domain_length: 253,
        }
    }
}

impl SettingsSection for CollectorSettings {
    const KEY: &'static str = "collector_settings";
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        // given
        let json = serde_json::json!({ "rate_limit_per_minute": 7 });
        // when
        let parsed: WorkerSettings = serde_json::from_value(json).unwrap();
        // then
        assert_that!(parsed.rate_limit_per_minute).is_equal_to(7);
        assert_that!(parsed.max_concurrent_probes).is_equal_to(5);
        assert_that!(parsed.tool_preference).has_length(3);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        // given
        let json = serde_json::json!({ "ttl_seconds": 120, "surprise": true });
        // when
        let parsed: RemeasurementSettings = serde_json::from_value(json).unwrap();
        // then
        assert_that!(parsed.ttl_seconds).is_equal_to(120);
        assert_that!(parsed.batch_limit).is_equal_to(200);
    }
}
