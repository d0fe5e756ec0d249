//! Team Cymru IP-to-ASN mapping over plain WHOIS (RFC 3912). One query per
//! connection in verbose mode; the reply is pipe-separated text:
//! `AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name`.

use std::net::IpAddr;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{CoreRecord, CALL_TIMEOUT};

const WHOIS_ENDPOINT: &str = "whois.cymru.com:43";

/// `Ok(None)` means Cymru answered but knows no origin AS for the address.
pub async fn lookup(ip: IpAddr) -> Result<Option<CoreRecord>> {
    let response = tokio::time::timeout(CALL_TIMEOUT, query(ip))
        .await
        .map_err(|_| anyhow!("Cymru WHOIS timed out after {:?}", CALL_TIMEOUT))??;
    Ok(parse_response(&response))
}

async fn query(ip: IpAddr) -> Result<String> {
    let mut stream = TcpStream::connect(WHOIS_ENDPOINT)
        .await
        .with_context(|| format!("while connecting to {}", WHOIS_ENDPOINT))?;
    stream
        .write_all(format!(" -v {}\r\n", ip).as_bytes())
        .await
        .with_context(|| "while sending WHOIS query")?;
    let mut response = String::new();
    // The server closes the connection after the reply.
    stream
        .read_to_string(&mut response)
        .await
        .with_context(|| "while reading WHOIS reply")?;
    Ok(response)
}

fn parse_response(text: &str) -> Option<CoreRecord> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("AS ") || line.starts_with("AS|") {
            continue; // column header
        }
        if line.starts_with("Error") {
            continue;
        }
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 7 {
            continue;
        }
        // Multi-origin answers list several ASNs; the first is the best guess.
        let as_field = parts[0].split_whitespace().next().unwrap_or("");
        if as_field.eq_ignore_ascii_case("NA") {
            return None;
        }
        let Ok(asn) = as_field.parse::<i64>() else {
            continue;
        };
        return Some(CoreRecord {
            asn,
            prefix: non_empty(parts[2]),
            org_name: non_empty(parts[6]),
            country_code: non_empty(parts[3]),
            source: "cymru",
        });
    }
    None
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() || field.eq_ignore_ascii_case("NA") {
        None
    } else {
        Some(field.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn parses_verbose_reply() {
        // given
        let reply = "AS      | IP               | BGP Prefix          | CC | Registry | Allocated  | AS Name\n\
                     13335   | 1.1.1.1          | 1.1.1.0/24          | US | arin     | 2010-07-14 | CLOUDFLARENET, US\n";
        // when
        let record = parse_response(reply).unwrap();
        // then
        assert_that!(record.asn).is_equal_to(13335);
        assert_that!(record.prefix.unwrap()).is_equal_to("1.1.1.0/24".to_string());
        assert_that!(record.country_code.unwrap()).is_equal_to("US".to_string());
        assert_that!(record.org_name.unwrap().contains("CLOUDFLARE")).is_true();
    }

    #[test]
    fn na_answer_is_no_mapping() {
        let reply = "AS      | IP               | BGP Prefix          | CC | Registry | Allocated  | AS Name\n\
                     NA      | 10.0.0.1         | NA                  | NA | NA       | NA         | NA\n";
        assert_that!(parse_response(reply)).is_none();
    }

    #[test]
    fn multi_origin_takes_first_asn() {
        let reply = "13335 23456 | 1.1.1.1 | 1.1.1.0/24 | US | arin | 2010-07-14 | CLOUDFLARENET, US\n";
        assert_that!(parse_response(reply).unwrap().asn).is_equal_to(13335);
    }

    #[test]
    fn garbage_reply_is_no_mapping() {
        assert_that!(parse_response("Error: no entries found\n")).is_none();
        assert_that!(parse_response("")).is_none();
    }
}
