use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Args;
use neo4rs::{query, Graph};

use crate::project::AsEdge;

#[derive(Args, Clone, Debug)]
#[group(id = "graph")]
pub struct Params {
    /// Bolt URI of the Neo4j instance holding the AS graph.
    #[arg(long, env = "NEO4J_URI", default_value = "bolt://localhost:7687")]
    neo4j_uri: String,

    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    /// Prefer the environment over the command line for this one.
    #[arg(long, env = "NEO4J_PASSWORD")]
    neo4j_password: String,
}

#[derive(Debug, Clone)]
pub struct AsNodeMeta {
    pub asn: i64,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
}

pub struct GraphStore {
    graph: Graph,
}

/// Single statement covering both node upserts and the edge observation.
/// Counters increment atomically within the MERGE; min/max fold in a
/// null-tolerant way. Unknown strings travel as '' and unknown RTTs as a
/// negative sentinel because bolt parameters have no typed null here.
const UPSERT_EDGE: &str = "
MERGE (a:AS {asn: $src_asn})
  ON CREATE SET a.org_name = CASE WHEN $src_org = '' THEN NULL ELSE $src_org END,
                a.country  = CASE WHEN $src_country = '' THEN NULL ELSE $src_country END,
                a.first_seen = $ts
  ON MATCH SET  a.org_name = coalesce(CASE WHEN $src_org = '' THEN NULL ELSE $src_org END, a.org_name),
                a.country  = coalesce(CASE WHEN $src_country = '' THEN NULL ELSE $src_country END, a.country),
                a.last_seen = $ts
MERGE (b:AS {asn: $dst_asn})
  ON CREATE SET b.org_name = CASE WHEN $dst_org = '' THEN NULL ELSE $dst_org END,
                b.country  = CASE WHEN $dst_country = '' THEN NULL ELSE $dst_country END,
                b.first_seen = $ts
  ON MATCH SET  b.org_name = coalesce(CASE WHEN $dst_org = '' THEN NULL ELSE $dst_org END, b.org_name),
                b.country  = coalesce(CASE WHEN $dst_country = '' THEN NULL ELSE $dst_country END, b.country),
                b.last_seen = $ts
WITH a, b
MERGE (a)-[r:ROUTE]->(b)
  ON CREATE SET r.observed_count = 1,
                r.min_rtt = CASE WHEN $rtt < 0 THEN NULL ELSE $rtt END,
                r.max_rtt = CASE WHEN $rtt < 0 THEN NULL ELSE $rtt END,
                r.last_seen = $ts
  ON MATCH SET  r.observed_count = r.observed_count + 1,
                r.min_rtt = CASE
                    WHEN $rtt < 0 THEN r.min_rtt
                    WHEN r.min_rtt IS NULL OR $rtt < r.min_rtt THEN $rtt
                    ELSE r.min_rtt END,
                r.max_rtt = CASE
                    WHEN $rtt < 0 THEN r.max_rtt
                    WHEN r.max_rtt IS NULL OR $rtt > r.max_rtt THEN $rtt
                    ELSE r.max_rtt END,
                r.last_seen = $ts
";

impl GraphStore {
    pub async fn connect(params: &Params) -> Result<Self> {
        let graph = Graph::new(
            &params.neo4j_uri,
            &params.neo4j_user,
            &params.neo4j_password,
        )
        .await
        .with_context(|| format!("while connecting to Neo4j at {}", params.neo4j_uri))?;
        Ok(Self { graph })
    }

    pub async fn upsert_edge(
        &self,
        edge: &AsEdge,
        src: &AsNodeMeta,
        dst: &AsNodeMeta,
        observed_at: NaiveDateTime,
    ) -> Result<()> {
        let statement = query(UPSERT_EDGE)
            .param("src_asn", edge.src)
            .param("dst_asn", edge.dst)
            .param("src_org", src.org_name.clone().unwrap_or_default())
            .param("src_country", src.country_code.clone().unwrap_or_default())
            .param("dst_org", dst.org_name.clone().unwrap_or_default())
            .param("dst_country", dst.country_code.clone().unwrap_or_default())
            .param("rtt", edge.rtt_ms.unwrap_or(-1.0))
            .param("ts", observed_at.and_utc().to_rfc3339());
        self.graph
            .run(statement)
            .await
            .with_context(|| format!("while upserting edge {} -> {}", edge.src, edge.dst))
    }
}
