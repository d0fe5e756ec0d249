//! Turns an enriched hop list into directed AS adjacencies. Hops without an
//! ASN are dropped entirely: a silent span between two known ASNs still
//! yields an adjacency (an observed transition over an opaque stretch),
//! while runs of the same ASN collapse to one node.

use db_model::hop::Hop;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsHop {
    pub asn: i64,
    /// RTT of the first hop belonging to this ASN in the path.
    pub rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsEdge {
    pub src: i64,
    pub dst: i64,
    /// RTT at the entry hop of the destination ASN.
    pub rtt_ms: Option<f64>,
}

/// `[A, A, null, B, B, C]` becomes `[A, B, C]`.
pub fn as_sequence(hops: &[Hop]) -> Vec<AsHop> {
    let mut sequence: Vec<AsHop> = vec![];
    for hop in hops {
        let Some(asn) = hop.asn else { continue };
        match sequence.last() {
            Some(last) if last.asn == asn => {}
            _ => sequence.push(AsHop {
                asn,
                rtt_ms: hop.rtt_ms,
            }),
        }
    }
    sequence
}

/// Consecutive distinct pairs, counted once per measurement: a flapping
/// path may revisit the same transition, but the edge observation is
/// recorded a single time.
pub fn project_edges(sequence: &[AsHop]) -> Vec<AsEdge> {
    let mut edges: Vec<AsEdge> = vec![];
    for pair in sequence.windows(2) {
        let (src, dst) = (pair[0], pair[1]);
        if src.asn == dst.asn {
            continue;
        }
        if edges.iter().any(|e| e.src == src.asn && e.dst == dst.asn) {
            continue;
        }
        edges.push(AsEdge {
            src: src.asn,
            dst: dst.asn,
            rtt_ms: dst.rtt_ms,
        });
    }
    edges
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use ipnet::IpNet;

    use super::*;

    fn hop(number: i32, asn: Option<i64>, rtt: Option<f64>) -> Hop {
        Hop {
            id: number as i64,
            measurement_id: 1,
            hop_number: number,
            hop_ip: asn.map(|_| IpNet::from("10.0.0.1".parse::<std::net::IpAddr>().unwrap())),
            rtt_ms: rtt,
            asn,
            prefix: None,
            org_name: None,
            country_code: None,
        }
    }

    #[test]
    fn collapses_runs_and_drops_nulls() {
        // given: hop ASNs [A, A, null, B, B, C]
        let hops = [
            hop(1, Some(10), Some(1.0)),
            hop(2, Some(10), Some(2.0)),
            hop(3, None, None),
            hop(4, Some(20), Some(5.0)),
            hop(5, Some(20), Some(6.0)),
            hop(6, Some(30), Some(9.0)),
        ];
        // when
        let sequence = as_sequence(&hops);
        // then
        let asns: Vec<i64> = sequence.iter().map(|h| h.asn).collect();
        assert_that!(asns).is_equal_to(vec![10, 20, 30]);
        // first hop of each run carries the RTT
        assert_that!(sequence[1].rtt_ms).is_equal_to(Some(5.0));
    }

    #[test]
    fn opaque_gap_still_links_surrounding_asns() {
        // given: a timed-out hop between two resolved ASNs
        let hops = [hop(1, Some(10), Some(1.0)), hop(2, None, None), hop(3, Some(20), Some(8.0))];
        // when
        let edges = project_edges(&as_sequence(&hops));
        // then
        assert_that!(edges).has_length(1);
        assert_that!(edges[0].src).is_equal_to(10);
        assert_that!(edges[0].dst).is_equal_to(20);
        assert_that!(edges[0].rtt_ms).is_equal_to(Some(8.0));
    }

    #[test]
    fn flapping_path_counts_each_edge_once() {
        // given: A -> B -> A -> B
        let hops = [
            hop(1, Some(10), None),
            hop(2, Some(20), None),
            hop(3, Some(10), None),
            hop(4, Some(20), None),
        ];
        // when
        let edges = project_edges(&as_sequence(&hops));
        // then: A->B and the return B->A, each once
        assert_that!(edges).has_length(2);
        assert_that!(edges[0]).is_equal_to(AsEdge {
            src: 10,
            dst: 20,
            rtt_ms: None,
        });
        assert_that!(edges[1].src).is_equal_to(20);
        assert_that!(edges[1].dst).is_equal_to(10);
    }

    #[test]
    fn single_asn_path_yields_no_edges() {
        let hops = [hop(1, Some(10), None), hop(2, Some(10), None)];
        assert_that!(project_edges(&as_sequence(&hops))).has_length(0);
    }

    #[test]
    fn all_unresolved_path_is_empty() {
        let hops = [hop(1, None, None), hop(2, None, None)];
        assert_that!(as_sequence(&hops)).has_length(0);
    }
}
