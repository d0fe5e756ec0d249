use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::graph_store::{AsNodeMeta, GraphStore, Params};
use crate::persist;
use crate::project;

const BATCH_LIMIT: i64 = 50;
const IDLE_PAUSE: Duration = Duration::from_secs(10);

pub async fn run(params: Params, stop_rx: CancellationToken) -> Result<()> {
    let store = GraphStore::connect(&params).await?;
    info!("Graph projector ready for work.");
    loop {
        if stop_rx.is_cancelled() {
            return Ok(());
        }
        let projected = match run_cycle(&store).await {
            Ok(count) => count,
            Err(e) => {
                error!("Graph projection cycle failed: {:?}", e);
                0
            }
        };
        if projected == 0 {
            tokio::select! {
                biased;
                _ = stop_rx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(IDLE_PAUSE) => {}
            }
        }
    }
}

async fn run_cycle(store: &GraphStore) -> Result<usize> {
    let mut conn = db_model::persist::connect()?;
    let batch = persist::fetch_unprojected(&mut conn, BATCH_LIMIT)?;
    for measurement in &batch {
        project_measurement(&mut conn, store, measurement.id).await?;
    }
    Ok(batch.len())
}

async fn project_measurement(
    conn: &mut diesel::PgConnection,
    store: &GraphStore,
    measurement_id: i64,
) -> Result<()> {
    let hops = persist::fetch_hops(conn, measurement_id)?;
    let sequence = project::as_sequence(&hops);
    let edges = project::project_edges(&sequence);

    if !edges.is_empty() {
        let mut keys: Vec<i64> = sequence.iter().map(|h| h.asn).collect();
        keys.sort_unstable();
        keys.dedup();
        let meta = persist::fetch_asn_meta(conn, &keys)?;
        let node = |asn: i64| {
            let (org_name, country_code) = meta.get(&asn).cloned().unwrap_or((None, None));
            AsNodeMeta {
                asn,
                org_name,
                country_code,
            }
        };

        let observed_at = Utc::now().naive_utc();
        for edge in &edges {
            store
                .upsert_edge(edge, &node(edge.src), &node(edge.dst), observed_at)
                .await?;
        }
    }

    // Zero-edge measurements are marked too; re-projecting them would
    // change nothing but keep the scan busy forever.
    persist::mark_graph_built(conn, measurement_id, Utc::now().naive_utc())?;
    debug!(
        "Projected measurement {}: {} edges",
        measurement_id,
        edges.len()
    );
    Ok(())
}
