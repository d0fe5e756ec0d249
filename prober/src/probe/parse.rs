//! Tolerant per-tool stdout parsers. Lines that don't match are skipped;
//! a hop with no responding router keeps its number with ip and rtt unset.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHop {
    pub number: i32,
    pub ip: Option<IpAddr>,
    pub rtt_ms: Option<f64>,
}

fn hop_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+(.*)$").expect("static regex"))
}

fn rtt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*ms").expect("static regex"))
}

fn mtr_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // hop.|-- host loss% snt last avg ...
        Regex::new(r"^\s*(\d+)\.\|--\s+(\S+)\s+(\d+(?:\.\d+)?)%\s+\d+\s+[0-9.]+\s+([0-9.]+)")
            .expect("static regex")
    })
}

/// `traceroute -n` output, e.g.
/// `  3  203.0.113.9  4.1 ms  4.3 ms  4.0 ms` or `  2  * * *`.
/// RTT is the mean of the samples present on the line. Hostname forms with
/// the address in parentheses are tolerated.
pub fn traceroute(output: &str) -> Vec<ParsedHop> {
    let mut hops = vec![];
    for line in output.lines() {
        if line.trim_start().starts_with("traceroute") {
            continue;
        }
        let Some(caps) = hop_line_re().captures(line) else {
            continue;
        };
        let number: i32 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let rest = caps[2].trim();

        if rest.split_whitespace().all(|tok| tok == "*") {
            hops.push(ParsedHop {
                number,
                ip: None,
                rtt_ms: None,
            });
            continue;
        }

        let ip = hop_ip_from(rest);
        let samples: Vec<f64> = rtt_re()
            .captures_iter(rest)
            .filter_map(|c| c[1].parse().ok())
            .collect();
        let rtt_ms = mean(&samples);
        hops.push(ParsedHop {
            number,
            ip,
            rtt_ms,
        });
    }
    hops
}

/// scamper text trace output: `N  ip  rtt ms` rows after a `trace to ...`
/// header line.
pub fn scamper(output: &str) -> Vec<ParsedHop> {
    let mut hops = vec![];
    for line in output.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("trace") || trimmed.starts_with("scamper") {
            continue;
        }
        let Some(caps) = hop_line_re().captures(line) else {
            continue;
        };
        let number: i32 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let rest = caps[2].trim();
        let mut tokens = rest.split_whitespace();
        let host = tokens.next().unwrap_or("");
        if host.contains('*') {
            hops.push(ParsedHop {
                number,
                ip: None,
                rtt_ms: None,
            });
            continue;
        }
        let ip = parse_host_token(host);
        let rtt_ms = rtt_re()
            .captures(rest)
            .and_then(|c| c[1].parse().ok());
        hops.push(ParsedHop {
            number,
            ip,
            rtt_ms,
        });
    }
    hops
}

/// `mtr -n -r -c <count>` report output; the Avg column is the hop RTT.
/// A `???` host is a hop that never answered.
pub fn mtr(output: &str) -> Vec<ParsedHop> {
    let mut hops = vec![];
    for line in output.lines() {
        let Some(caps) = mtr_line_re().captures(line) else {
            continue;
        };
        let number: i32 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let host = &caps[2];
        if host == "???" {
            hops.push(ParsedHop {
                number,
                ip: None,
                rtt_ms: None,
            });
            continue;
        }
        let ip = parse_host_token(host);
        let rtt_ms = caps[4].parse().ok().filter(|_| ip.is_some());
        hops.push(ParsedHop {
            number,
            ip,
            rtt_ms,
        });
    }
    hops
}

/// First token, or the parenthesized address that follows a hostname in
/// `host.example.net (203.0.113.9)` lines.
fn hop_ip_from(rest: &str) -> Option<IpAddr> {
    let mut tokens = rest.split_whitespace();
    let first = tokens.next()?;
    parse_host_token(first).or_else(|| tokens.next().and_then(parse_host_token))
}

/// `203.0.113.9` or `(203.0.113.9)`; anything unparsable stays unknown.
fn parse_host_token(token: &str) -> Option<IpAddr> {
    let candidate = match (token.find('('), token.find(')')) {
        (Some(open), Some(close)) if close > open => &token[open + 1..close],
        _ => token,
    };
    candidate.parse().ok()
}

fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().expect(s))
    }

    #[test]
    fn traceroute_happy_path_with_mean_rtt() {
        // given
        let output = "traceroute to 1.1.1.1 (1.1.1.1), 30 hops max, 60 byte packets\n\
                      \x20 1  192.168.1.1  0.456 ms  0.412 ms  0.398 ms\n\
                      \x20 2  203.0.113.9  4.000 ms  5.000 ms  6.000 ms\n";
        // when
        let hops = traceroute(output);
        // then
        assert_that!(hops).has_length(2);
        assert_that!(hops[0].ip).is_equal_to(ip("192.168.1.1"));
        assert_that!(hops[1].rtt_ms.unwrap()).is_equal_to(5.0);
    }

    #[test]
    fn traceroute_preserves_timeout_hop_between_resolved_ones() {
        // given: the classic silent middle hop
        let output = " 1  10.0.0.1  1.0 ms\n 2  * * *\n 3  1.0.0.1  8.0 ms\n";
        // when
        let hops = traceroute(output);
        // then
        assert_that!(hops).has_length(3);
        assert_that!(hops[1].number).is_equal_to(2);
        assert_that!(hops[1].ip).is_none();
        assert_that!(hops[1].rtt_ms).is_none();
        assert_that!(hops[2].ip).is_equal_to(ip("1.0.0.1"));
    }

    #[test]
    fn traceroute_partial_star_samples_average_the_rest() {
        let output = " 4  203.0.113.7  2.0 ms * 4.0 ms\n";
        let hops = traceroute(output);
        assert_that!(hops[0].rtt_ms.unwrap()).is_equal_to(3.0);
    }

    #[test]
    fn traceroute_hostname_with_parenthesized_ip() {
        let output = " 5  core1.example.net (198.51.100.3)  12.5 ms\n";
        let hops = traceroute(output);
        assert_that!(hops[0].ip).is_equal_to(ip("198.51.100.3"));
    }

    #[test]
    fn traceroute_skips_garbage_lines() {
        // given
        let output = "no hop here\n 1  10.0.0.1  1.0 ms\nanother stray line\n";
        // when
        let hops = traceroute(output);
        // then
        assert_that!(hops).has_length(1);
    }

    #[test]
    fn traceroute_ipv6_hop() {
        let output = " 1  2001:db8::1  0.5 ms\n";
        let hops = traceroute(output);
        assert_that!(hops[0].ip).is_equal_to(ip("2001:db8::1"));
    }

    #[test]
    fn scamper_trace_rows() {
        // given
        let output = "trace to 8.8.8.8\n 1  192.168.1.1  0.456 ms\n 2  *\n 3  8.8.8.8  9.1 ms\n";
        // when
        let hops = scamper(output);
        // then
        assert_that!(hops).has_length(3);
        assert_that!(hops[0].rtt_ms).is_equal_to(Some(0.456));
        assert_that!(hops[1].ip).is_none();
        assert_that!(hops[2].ip).is_equal_to(ip("8.8.8.8"));
    }

    #[test]
    fn mtr_report_uses_avg_column() {
        // given
        let output = "Start: 2024-05-14T12:00:00+0000\n\
                      HOST: vantage    Loss%   Snt   Last   Avg  Best  Wrst StDev\n\
                      \x20 1.|-- 192.168.1.1   0.0%     3    0.4   0.5   0.4   0.6   0.1\n\
                      \x20 2.|-- ???          100.0%    3    0.0   0.0   0.0   0.0   0.0\n\
                      \x20 3.|-- 203.0.113.9   0.0%     3    7.9   8.2   7.7   8.8   0.4\n";
        // when
        let hops = mtr(output);
        // then
        assert_that!(hops).has_length(3);
        assert_that!(hops[0].rtt_ms).is_equal_to(Some(0.5));
        assert_that!(hops[1].ip).is_none();
        assert_that!(hops[1].rtt_ms).is_none();
        assert_that!(hops[2].rtt_ms).is_equal_to(Some(8.2));
    }
}
