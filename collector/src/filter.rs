use db_model::settings::CollectorSettings;

use crate::source::DnsQuery;

/// Whether an observed query should be dropped before resolution.
/// Reverse zones are always ignored; the rest follows the live settings.
pub fn should_ignore(config: &CollectorSettings, query: &DnsQuery) -> bool {
    let domain = query.domain.to_ascii_lowercase();
    let domain = domain.trim_end_matches('.');

    if config.max_domain_length > 0 && domain.len() > config.max_domain_length {
        return true;
    }
    if domain.ends_with(".in-addr.arpa") || domain.ends_with(".ip6.arpa") {
        return true;
    }
    if config
        .ignore_domains_suffix
        .iter()
        .any(|suffix| domain.ends_with(&suffix.to_ascii_lowercase()))
    {
        return true;
    }
    if let Some(qtype) = &query.qtype {
        if config
            .ignore_qtypes
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(qtype))
        {
            return true;
        }
    }
    if let Some(client) = &query.client_ip {
        if config.ignore_clients.iter().any(|ignored| ignored == client) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use chrono::NaiveDate;

    use super::*;

    fn query(domain: &str) -> DnsQuery {
        DnsQuery {
            domain: domain.to_owned(),
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 14)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            qtype: None,
            client_ip: None,
        }
    }

    fn config() -> CollectorSettings {
        CollectorSettings {
            ignore_domains_suffix: vec![".local".to_owned(), "ads.example".to_owned()],
            ignore_qtypes: vec!["PTR".to_owned()],
            ignore_clients: vec!["192.168.1.50".to_owned()],
            ..CollectorSettings::default()
        }
    }

    #[test]
    fn plain_domain_passes() {
        assert_that!(should_ignore(&config(), &query("example.com"))).is_false();
    }

    #[test]
    fn reverse_zones_always_drop() {
        assert_that!(should_ignore(&config(), &query("1.0.0.10.in-addr.arpa"))).is_true();
        assert_that!(should_ignore(&config(), &query("8.b.d.0.1.0.0.2.ip6.arpa"))).is_true();
    }

    #[test]
    fn suffix_filter_is_case_insensitive() {
        assert_that!(should_ignore(&config(), &query("printer.LOCAL"))).is_true();
        assert_that!(should_ignore(&config(), &query("tracker.ads.example"))).is_true();
    }

    #[test]
    fn qtype_filter_applies() {
        // given
        let mut q = query("example.com");
        q.qtype = Some("ptr".to_owned());
        // when, then
        assert_that!(should_ignore(&config(), &q)).is_true();
    }

    #[test]
    fn client_filter_applies() {
        let mut q = query("example.com");
        q.client_ip = Some("192.168.1.50".to_owned());
        assert_that!(should_ignore(&config(), &q)).is_true();
    }

    #[test]
    fn overlong_domain_drops() {
        let long = format!("{}.example.com", "a".repeat(260));
        assert_that!(should_ignore(&config(), &query(&long))).is_true();
    }

    #[test]
    fn trailing_dot_is_normalized() {
        assert_that!(should_ignore(&config(), &query("printer.local."))).is_true();
    }
}
