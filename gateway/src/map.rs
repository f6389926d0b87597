//! Map builder: aggregates recent positions into per-node items and derives
//! connectivity from reporter relationships and neighbor reports.
//!
//! `nodeLine` holds undirected links between nodes that carried each other's
//! positions, `nodeCoverage` holds triangles whose three corners all sit
//! within the distance gate and mutually appear in one another's reporter
//! sets, and `nodeLineNeighbor` holds links taken from NEIGHBORINFO
//! broadcasts. The derivations are pure functions over the fetched items so
//! the geometry is testable without a database.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::mesh;
use crate::model::NodeNeighborEdge;
use crate::repo::Repository;
use crate::service::{info_item, parse_iso_minute, position_item, InfoItem, PositionItem};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapItem {
    pub id: i64,
    pub id_hex: String,
    pub info: Option<InfoItem>,
    /// Up to five most recent positions, one per reporter path, newest first.
    pub positions: Vec<PositionItem>,
    /// Nodes that carried this node's position in the report window.
    pub report_node_id: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapCoordinatesResponse {
    pub items: Vec<MapItem>,
    pub node_line: Vec<(i64, i64)>,
    pub node_coverage: Vec<(i64, i64, i64)>,
    pub node_line_neighbor: Vec<(i64, i64)>,
}

/// Preset filter token admitting nodes without a known modem preset.
const UNKNOWN_PRESET: &str = "UNKNOWN";

pub struct MapService {
    repo: Arc<Repository>,
    cache: Arc<ResponseCache>,
    config: Arc<GatewayConfig>,
}

impl MapService {
    pub fn new(
        repo: Arc<Repository>,
        cache: Arc<ResponseCache>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self { repo, cache, config }
    }

    /// Aggregated map view for `[start, end]` with a reporter window of
    /// `report_node_hours` and a comma-separated modem preset filter.
    pub async fn coordinates(
        &self,
        start: &str,
        end: &str,
        report_node_hours: i64,
        preset_filter: &str,
    ) -> Result<MapCoordinatesResponse, GatewayError> {
        let tz = self.config.display_tz();
        let start_time = parse_iso_minute(start, tz)?;
        let end_time = parse_iso_minute(end, tz)?;

        let mut presets: Vec<String> = preset_filter
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        presets.sort();

        let cache_key = format!(
            "map.coordinates/{}_{}_{}_{}",
            start_time.format("%Y%m%d%H%M%S"),
            end_time.format("%Y%m%d%H%M%S"),
            report_node_hours,
            presets.join(",")
        );
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(response) = serde_json::from_str(&cached) {
                return Ok(response);
            }
        }

        match self
            .build(start_time, end_time, report_node_hours, &presets)
            .await
        {
            Ok(response) => {
                if let Ok(serialized) = serde_json::to_string(&response) {
                    self.cache.put(cache_key, serialized);
                }
                Ok(response)
            }
            Err(err) => {
                error!("map coordinates: {err}");
                Err(err.internalize())
            }
        }
    }

    async fn build(
        &self,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
        report_node_hours: i64,
        presets: &[String],
    ) -> Result<MapCoordinatesResponse, GatewayError> {
        let node_ids = self.repo.fetch_position_node_ids(start, end).await?;

        let mut items = Vec::new();
        for node_id in node_ids {
            // One broken node must not take the whole map down.
            match self.build_item(node_id, report_node_hours, presets).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(err) => error!("map item for node {node_id}: {err}"),
            }
        }

        let max_distance = self.config.meshtastic.neighborinfo.max_distance;
        let (node_line, node_coverage) = derive_links(&items, max_distance);
        let edges = self.repo.fetch_neighbor_edges_in_range(start, end).await?;
        let node_line_neighbor = derive_neighbor_lines(&items, &edges, max_distance);

        Ok(MapCoordinatesResponse {
            items,
            node_line,
            node_coverage,
            node_line_neighbor,
        })
    }

    async fn build_item(
        &self,
        node_id: i64,
        report_node_hours: i64,
        presets: &[String],
    ) -> Result<Option<MapItem>, GatewayError> {
        let tz = self.config.display_tz();
        let info_row = self.repo.fetch_node_info(node_id).await?;

        let preset = info_row
            .as_ref()
            .and_then(|info| info.lora_modem_preset.clone())
            .unwrap_or_else(|| UNKNOWN_PRESET.to_string());
        if !presets.is_empty() && !presets.iter().any(|p| *p == preset) {
            return Ok(None);
        }

        let positions: Vec<PositionItem> = self
            .repo
            .fetch_positions(node_id, 5)
            .await?
            .iter()
            .filter_map(|row| position_item(row, tz))
            .collect();
        if positions.is_empty() {
            return Ok(None);
        }

        let report_node_id = self
            .repo
            .fetch_position_reporters(node_id, report_node_hours)
            .await?;

        Ok(Some(MapItem {
            id: node_id,
            id_hex: format!("!{}", mesh::node_id_to_hex(node_id)),
            info: info_row.map(|row| info_item(&row, tz)),
            positions,
            report_node_id,
        }))
    }
}

// ── Link derivation ───────────────────────────────────────────────────────────

fn latest_distance(a: &MapItem, b: &MapItem) -> Option<f64> {
    let pa = a.positions.first()?;
    let pb = b.positions.first()?;
    Some(mesh::distance_in_meters(
        pa.latitude,
        pa.longitude,
        pb.latitude,
        pb.longitude,
    ))
}

fn push_unique_pair(pairs: &mut Vec<(i64, i64)>, a: i64, b: i64) {
    let pair = (a.min(b), a.max(b));
    if !pairs.contains(&pair) {
        pairs.push(pair);
    }
}

/// Direct links and coverage triangles from reporter chains.
///
/// For every node A and reporter B of A within the distance gate, the pair
/// (A,B) becomes a link; the chain continues to B's reporters C, and when A
/// and C also report each other and sit within the gate, sorted (A,B,C)
/// becomes a coverage triangle. Pairs are normalized `(min,max)`, triples
/// ascending, both deduplicated in insertion order.
pub fn derive_links(
    items: &[MapItem],
    max_distance: f64,
) -> (Vec<(i64, i64)>, Vec<(i64, i64, i64)>) {
    let by_id: HashMap<i64, &MapItem> = items.iter().map(|item| (item.id, item)).collect();
    let mut node_line: Vec<(i64, i64)> = Vec::new();
    let mut node_coverage: Vec<(i64, i64, i64)> = Vec::new();

    for a in items {
        if a.positions.is_empty() || a.report_node_id.is_empty() {
            continue;
        }
        for &b_id in &a.report_node_id {
            if b_id == a.id {
                continue;
            }
            let Some(b) = by_id.get(&b_id) else { continue };
            let Some(distance_ab) = latest_distance(a, b) else { continue };
            if distance_ab > max_distance {
                continue;
            }
            push_unique_pair(&mut node_line, a.id, b_id);

            for &c_id in &b.report_node_id {
                if c_id == b_id {
                    continue;
                }
                let Some(c) = by_id.get(&c_id) else { continue };
                let Some(distance_bc) = latest_distance(b, c) else { continue };
                if distance_bc > max_distance {
                    continue;
                }
                push_unique_pair(&mut node_line, b_id, c_id);

                if c_id == a.id {
                    continue;
                }
                if c.report_node_id.contains(&a.id) || a.report_node_id.contains(&c_id) {
                    let Some(distance_ac) = latest_distance(a, c) else { continue };
                    if distance_ac > max_distance {
                        continue;
                    }
                    let mut trio = [a.id, b_id, c_id];
                    trio.sort_unstable();
                    let trio = (trio[0], trio[1], trio[2]);
                    if !node_coverage.contains(&trio) {
                        node_coverage.push(trio);
                    }
                }
            }
        }
    }
    (node_line, node_coverage)
}

/// Links taken from neighbor reports: both endpoints must be map items with
/// a current position within the distance gate.
pub fn derive_neighbor_lines(
    items: &[MapItem],
    edges: &[NodeNeighborEdge],
    max_distance: f64,
) -> Vec<(i64, i64)> {
    let by_id: HashMap<i64, &MapItem> = items.iter().map(|item| (item.id, item)).collect();
    let mut lines: Vec<(i64, i64)> = Vec::new();
    for edge in edges {
        if edge.node_id == edge.edge_node_id {
            continue;
        }
        let (Some(a), Some(b)) = (by_id.get(&edge.node_id), by_id.get(&edge.edge_node_id)) else {
            continue;
        };
        let Some(distance) = latest_distance(a, b) else { continue };
        if distance > max_distance {
            continue;
        }
        push_unique_pair(&mut lines, edge.node_id, edge.edge_node_id);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, lat: f64, lon: f64, reporters: &[i64]) -> MapItem {
        MapItem {
            id,
            id_hex: format!("!{}", mesh::node_id_to_hex(id)),
            info: None,
            positions: vec![PositionItem {
                latitude: lat,
                longitude: lon,
                altitude: None,
                precision_bit: None,
                precision_in_meters: None,
                sats_in_view: None,
                update_at: "2024-07-03T06:00:00+00:00".into(),
                via_id: id,
                via_id_hex: format!("!{}", mesh::node_id_to_hex(id)),
                channel: Some("MeshTW".into()),
                root_topic: Some("msh/TW".into()),
            }],
            report_node_id: reporters.to_vec(),
        }
    }

    #[test]
    fn distance_gate_filters_far_pairs() {
        // A at origin, B ~111 m east, C ~111 km east. A reports A and B,
        // B reports C: only (A,B) survives a 1 km gate.
        let a = item(1, 0.0, 0.0, &[1]);
        let b = item(2, 0.0, 0.001, &[1]);
        let c = item(3, 0.0, 1.0, &[2]);
        let (lines, coverage) = derive_links(&[a, b, c], 1_000.0);
        assert_eq!(lines, vec![(1, 2)]);
        assert!(coverage.is_empty());
    }

    #[test]
    fn mutual_reporters_form_a_coverage_triangle() {
        // Pairwise close, reporter sets wired A→B→C→A.
        let a = item(1, 0.0, 0.0, &[3]);
        let b = item(2, 0.0, 0.001, &[1]);
        let c = item(3, 0.001, 0.0, &[2]);
        let (lines, coverage) = derive_links(&[a, b, c], 1_000.0);
        assert!(lines.contains(&(1, 2)));
        assert!(lines.contains(&(2, 3)));
        assert!(lines.contains(&(1, 3)));
        assert_eq!(lines.len(), 3);
        assert_eq!(coverage, vec![(1, 2, 3)]);
    }

    #[test]
    fn pairs_are_normalized_and_unique() {
        // Reporting in both directions yields one normalized pair.
        let a = item(9, 0.0, 0.0, &[2]);
        let b = item(2, 0.0, 0.001, &[9]);
        let (lines, _) = derive_links(&[a, b], 1_000.0);
        assert_eq!(lines, vec![(2, 9)]);
        for &(x, y) in &lines {
            assert!(x < y);
        }
    }

    #[test]
    fn self_reports_never_form_links() {
        let a = item(1, 0.0, 0.0, &[1]);
        let (lines, coverage) = derive_links(&[a], 1_000.0);
        assert!(lines.is_empty());
        assert!(coverage.is_empty());
    }

    #[test]
    fn neighbor_lines_respect_positions_and_distance() {
        let a = item(1, 0.0, 0.0, &[]);
        let b = item(2, 0.0, 0.001, &[]);
        let c = item(3, 0.0, 1.0, &[]);
        let edges = vec![
            NodeNeighborEdge { node_id: 2, edge_node_id: 1, snr: Some(5.5) },
            NodeNeighborEdge { node_id: 1, edge_node_id: 2, snr: None },
            NodeNeighborEdge { node_id: 1, edge_node_id: 3, snr: None },
            NodeNeighborEdge { node_id: 1, edge_node_id: 404, snr: None },
        ];
        let lines = derive_neighbor_lines(&[a, b, c], &edges, 1_000.0);
        // Far edge and unknown endpoint are dropped; duplicates collapse.
        assert_eq!(lines, vec![(1, 2)]);
    }

    #[test]
    fn coverage_triples_are_strictly_ascending() {
        let a = item(30, 0.0, 0.0, &[10]);
        let b = item(10, 0.0, 0.001, &[20]);
        let c = item(20, 0.001, 0.0, &[30]);
        let (_, coverage) = derive_links(&[a, b, c], 1_000.0);
        assert_eq!(coverage, vec![(10, 20, 30)]);
        for &(x, y, z) in &coverage {
            assert!(x < y && y < z);
        }
    }
}
