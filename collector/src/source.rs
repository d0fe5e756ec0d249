use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::warn;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// One observed resolver query. `client_ip` exists only so the client
/// filter can act on it; nothing downstream may store it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DnsQuery {
    pub domain: String,
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub qtype: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
}

/// Abstract over where queries come from; resolver-specific adapters
/// implement this and nothing else.
#[async_trait]
pub trait DnsSource: Send {
    /// Queries observed since the last call. Empty is normal.
    async fn fetch_new(&mut self) -> Result<Vec<DnsQuery>>;
}

/// Generic adapter: newline-delimited JSON on stdin, one query per line.
/// Whatever produces the lines (a log tailer, an exporter) stays outside
/// this process.
pub struct StdinSource {
    rx: UnboundedReceiver<DnsQuery>,
}

impl StdinSource {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(query) = parse_line(&line) {
                    if tx.send(query).is_err() {
                        break;
                    }
                }
            }
        });
        Self { rx }
    }
}

fn parse_line(line: &str) -> Option<DnsQuery> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(query) => Some(query),
        Err(e) => {
            warn!("Skipping unparsable query line: {}", e);
            None
        }
    }
}

#[async_trait]
impl DnsSource for StdinSource {
    async fn fetch_new(&mut self) -> Result<Vec<DnsQuery>> {
        let mut drained = vec![];
        while let Ok(query) = self.rx.try_recv() {
            drained.push(query);
        }
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn parses_full_query_line() {
        // given
        let line = r#"{"domain": "example.com", "timestamp": "2024-05-14T12:00:00", "qtype": "A", "client_ip": "192.168.1.9"}"#;
        // when
        let query = parse_line(line).unwrap();
        // then
        assert_that!(query.domain).is_equal_to("example.com".to_string());
        assert_that!(query.qtype).is_equal_to(Some("A".to_string()));
        assert_that!(query.client_ip).is_some();
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let line = r#"{"domain": "example.com", "timestamp": "2024-05-14T12:00:00"}"#;
        let query = parse_line(line).unwrap();
        assert_that!(query.qtype).is_none();
        assert_that!(query.client_ip).is_none();
    }

    #[test]
    fn blank_and_garbage_lines_are_skipped() {
        assert_that!(parse_line("")).is_none();
        assert_that!(parse_line("   ")).is_none();
        assert_that!(parse_line("not json")).is_none();
    }
}
