use std::net::IpAddr;

use log::debug;

/// Resolves a domain through the system resolver and applies the qtype
/// restriction and per-domain cap. Resolution failures just mean no
/// targets from this domain.
pub async fn resolve_domain(domain: &str, qtype: Option<&str>, max_ips: usize) -> Vec<IpAddr> {
    match tokio::net::lookup_host((domain, 0u16)).await {
        Ok(addrs) => filter_addresses(addrs.map(|sa| sa.ip()).collect(), qtype, max_ips),
        Err(e) => {
            debug!("Could not resolve {}: {}", domain, e);
            vec![]
        }
    }
}

/// Order-preserving dedupe, address family per the observed qtype (A keeps
/// v4, AAAA keeps v6, anything else keeps both), capped at `max_ips`.
pub fn filter_addresses(addrs: Vec<IpAddr>, qtype: Option<&str>, max_ips: usize) -> Vec<IpAddr> {
    let wanted = |addr: &IpAddr| match qtype {
        Some(q) if q.eq_ignore_ascii_case("A") => addr.is_ipv4(),
        Some(q) if q.eq_ignore_ascii_case("AAAA") => addr.is_ipv6(),
        _ => true,
    };
    let mut seen = std::collections::HashSet::new();
    addrs
        .into_iter()
        .filter(wanted)
        .filter(|addr| seen.insert(*addr))
        .take(max_ips.max(1))
        .collect()
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().expect(s)
    }

    #[test]
    fn caps_and_dedupes_preserving_order() {
        // given
        let addrs = vec![
            addr("192.0.2.1"),
            addr("192.0.2.1"),
            addr("192.0.2.2"),
            addr("192.0.2.3"),
        ];
        // when
        let kept = filter_addresses(addrs, None, 2);
        // then
        assert_that!(kept).is_equal_to(vec![addr("192.0.2.1"), addr("192.0.2.2")]);
    }

    #[test]
    fn a_query_keeps_only_v4() {
        let addrs = vec![addr("192.0.2.1"), addr("2001:db8::1")];
        let kept = filter_addresses(addrs, Some("A"), 4);
        assert_that!(kept).is_equal_to(vec![addr("192.0.2.1")]);
    }

    #[test]
    fn aaaa_query_keeps_only_v6() {
        let addrs = vec![addr("192.0.2.1"), addr("2001:db8::1")];
        let kept = filter_addresses(addrs, Some("aaaa"), 4);
        assert_that!(kept).is_equal_to(vec![addr("2001:db8::1")]);
    }

    #[test]
    fn other_qtypes_keep_both_families() {
        let addrs = vec![addr("192.0.2.1"), addr("2001:db8::1")];
        let kept = filter_addresses(addrs, Some("HTTPS"), 4);
        assert_that!(kept).has_length(2);
    }

    #[test]
    fn zero_cap_is_clamped_to_one() {
        let kept = filter_addresses(vec![addr("192.0.2.1")], None, 0);
        assert_that!(kept).has_length(1);
    }
}
