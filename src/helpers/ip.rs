use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("not a valid IPv4/IPv6 address: `{input}`")]
pub struct IpSyntaxError {
    pub input: String,
}

/// Parses an IP address into its canonical textual form. IPv6 addresses are
/// compressed per RFC 5952 (this is what `Ipv6Addr`'s `Display` produces),
/// IPv4 addresses are plain dotted quads.
pub fn canonicalize(input: &str) -> Result<IpAddr, IpSyntaxError> {
    input.trim().parse().map_err(|_| IpSyntaxError {
        input: input.to_owned(),
    })
}

pub trait ToHostNet {
    /// Full-length prefix (/32 or /128) for storing a single host in an
    /// `inet` column.
    fn to_host_net(&self) -> IpNet;
}

impl ToHostNet for IpAddr {
    fn to_host_net(&self) -> IpNet {
        IpNet::from(*self)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn canonicalizes_exploded_v6() {
        // given
        let input = "2001:0db8:0000:0000:0000:0000:0000:0001";
        // when
        let parsed = canonicalize(input).unwrap();
        // then
        assert_that!(parsed.to_string()).is_equal_to("2001:db8::1".to_string());
    }

    #[test]
    fn rejects_garbage() {
        assert_that!(canonicalize("not-an-ip")).is_err();
        assert_that!(canonicalize("999.1.1.1")).is_err();
    }

    #[test]
    fn host_net_round_trip() {
        // given
        let addr: IpAddr = "192.0.2.7".parse().unwrap();
        // when
        let net = addr.to_host_net();
        // then
        assert_that!(net.prefix_len()).is_equal_to(32);
        assert_that!(net.addr()).is_equal_to(addr);
    }
}
