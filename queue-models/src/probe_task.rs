use std::net::IpAddr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use type_safe_id::{StaticType, TypeSafeId};

use crate::TypeRoutedMessage;

/// One unit of work for the worker pool: probe this address once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeTask {
    pub id: ProbeTaskId,
    pub target_ip: IpAddr,
    pub source: TaskSource,
    pub priority: Priority,
    pub created_at: NaiveDateTime,
    /// If set, workers discard the task once this instant has passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDateTime>,
}

impl ProbeTask {
    pub fn new(target_ip: IpAddr, source: TaskSource, created_at: NaiveDateTime) -> Self {
        Self {
            id: ProbeTaskId::new(),
            target_ip,
            source,
            priority: source.default_priority(),
            created_at,
            deadline: None,
        }
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        matches!(self.deadline, Some(deadline) if deadline < now)
    }
}

impl TypeRoutedMessage for ProbeTask {
    fn routing_key() -> &'static str {
        "probe"
    }
}

/// Which producer put the task on the queue. Also recorded on the target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Static,
    Api,
    Dns,
    Remeasure,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Static => "static",
            TaskSource::Api => "api",
            TaskSource::Dns => "dns",
            TaskSource::Remeasure => "remeasure",
        }
    }

    /// Remeasurements yield to fresh observations.
    pub fn default_priority(&self) -> Priority {
        match self {
            TaskSource::Remeasure => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// AMQP per-message priority; the queue is declared with a matching
    /// x-max-priority so higher strictly precedes lower.
    pub fn amqp_level(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 5,
            Priority::High => 9,
        }
    }

    /// Compact form for the dedupe log's smallint column.
    pub fn as_i16(&self) -> i16 {
        self.amqp_level() as i16
    }
}

// Marker type so the id can name its own kind in serialized form
#[derive(Default, Clone)]
pub struct ProbeTaskMarker;

impl StaticType for ProbeTaskMarker {
    const TYPE: &'static str = "probetask";
}

pub type ProbeTaskId = TypeSafeId<ProbeTaskMarker>;

#[cfg(test)]
mod tests {
    use assertor::*;
    use chrono::NaiveDate;

    use super::*;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 14)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn remeasure_defaults_to_low_priority() {
        // given, when
        let task = ProbeTask::new("192.0.2.1".parse().unwrap(), TaskSource::Remeasure, at(9));
        // then
        assert_that!(task.priority).is_equal_to(Priority::Low);
    }

    #[test]
    fn deadline_in_past_expires_task() {
        // given
        let mut task = ProbeTask::new("192.0.2.1".parse().unwrap(), TaskSource::Api, at(9));
        task.deadline = Some(at(10));
        // when, then
        assert_that!(task.is_expired(at(11))).is_true();
        assert_that!(task.is_expired(at(9))).is_false();
    }

    #[test]
    fn no_deadline_never_expires() {
        let task = ProbeTask::new("2001:db8::1".parse().unwrap(), TaskSource::Dns, at(9));
        assert_that!(task.is_expired(at(23))).is_false();
    }

    #[test]
    fn survives_json_round_trip_with_source_names() {
        // given
        let task = ProbeTask::new("8.8.8.8".parse().unwrap(), TaskSource::Dns, at(9));
        // when
        let json = serde_json::to_string(&task).unwrap();
        // then
        assert_that!(json.contains(r#""source":"dns""#)).is_true();
        let back: ProbeTask = serde_json::from_str(&json).unwrap();
        assert_that!(back.target_ip).is_equal_to(task.target_ip);
        assert_that!(back.priority).is_equal_to(task.priority);
    }
}
