//! Read services consumed by the API collaborator: per-node projections and
//! the analysis queries. Timestamps are serialized in the configured display
//! timezone. Domain errors carry their message; anything unexpected is
//! logged here and collapsed into the opaque internal error.

use std::sync::Arc;

use chrono::{DateTime, DurationRound, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::mesh;
use crate::model::{NodeInfo, NodePosition, NodeTelemetryDevice};
use crate::repo::Repository;

// ── Input parsing ─────────────────────────────────────────────────────────────

/// Parse an ISO-8601 timestamp. Offset-less inputs are interpreted in the
/// display timezone.
pub fn parse_iso(value: &str, tz: Tz) -> Result<DateTime<Utc>, GatewayError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            if let Some(local) = naive.and_local_timezone(tz).earliest() {
                return Ok(local.with_timezone(&Utc));
            }
        }
    }
    Err(GatewayError::domain("invalid date format"))
}

/// Query windows are minute-granular.
pub fn parse_iso_minute(value: &str, tz: Tz) -> Result<DateTime<Utc>, GatewayError> {
    let parsed = parse_iso(value, tz)?;
    Ok(parsed.duration_trunc(TimeDelta::minutes(1)).unwrap_or(parsed))
}

// ── Projections ───────────────────────────────────────────────────────────────

/// Channel display label. The map and JSON topic families are suffixed so
/// the origin path stays visible.
fn channel_label(topic: &str) -> Option<String> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 2 {
        return None;
    }
    let channel = parts[parts.len() - 2];
    if channel == "map" {
        Some(format!("{channel}(MapReport)"))
    } else if parts.len() >= 3 && parts[parts.len() - 3] == "json" {
        Some(format!("{channel}(json)"))
    } else {
        Some(channel.to_string())
    }
}

fn display_time(timestamp: DateTime<Utc>, tz: Tz) -> String {
    timestamp.with_timezone(&tz).to_rfc3339()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoItem {
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hardware: Option<String>,
    pub is_licensed: Option<bool>,
    pub role: Option<String>,
    pub firmware: Option<String>,
    pub lora_region: Option<String>,
    pub lora_modem_preset: Option<String>,
    pub has_default_channel: Option<bool>,
    pub num_online_local_nodes: Option<i32>,
    pub update_at: String,
    pub channel: Option<String>,
    pub root_topic: Option<String>,
}

pub fn info_item(row: &NodeInfo, tz: Tz) -> InfoItem {
    InfoItem {
        long_name: row.long_name.clone(),
        short_name: row.short_name.clone(),
        hardware: row.hw_model.clone(),
        is_licensed: row.is_licensed,
        role: row.role.clone(),
        firmware: row.firmware_version.clone(),
        lora_region: row.lora_region.clone(),
        lora_modem_preset: row.lora_modem_preset.clone(),
        has_default_channel: row.has_default_channel,
        num_online_local_nodes: row.num_online_local_nodes,
        update_at: display_time(row.update_at, tz),
        channel: channel_label(&row.topic),
        root_topic: mesh::root_topic(&row.topic),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionItem {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub precision_bit: Option<i32>,
    pub precision_in_meters: Option<i64>,
    pub sats_in_view: Option<i32>,
    pub update_at: String,
    /// Node whose uplink carried this observation.
    pub via_id: i64,
    pub via_id_hex: String,
    pub channel: Option<String>,
    pub root_topic: Option<String>,
}

/// `None` when the reporter segment of the stored topic cannot be parsed.
pub fn position_item(row: &NodePosition, tz: Tz) -> Option<PositionItem> {
    let via_id_hex = mesh::reporter_from_topic(&row.topic)
        .map(str::to_string)
        .unwrap_or_else(|| format!("!{}", mesh::node_id_to_hex(row.node_id)));
    let Some(via_id) = mesh::node_hex_to_id(&via_id_hex) else {
        debug!("invalid reporter in topic {}", row.topic);
        return None;
    };
    Some(PositionItem {
        latitude: row.latitude,
        longitude: row.longitude,
        altitude: row.altitude,
        precision_bit: row.precision_bits,
        precision_in_meters: row
            .precision_bits
            .filter(|&b| b >= 0)
            .map(|b| mesh::precision_to_meters(b as u32).round() as i64),
        sats_in_view: row.sats_in_view,
        update_at: display_time(row.update_at, tz),
        via_id,
        via_id_hex,
        channel: mesh::channel_from_topic(&row.topic).map(String::from),
        root_topic: mesh::root_topic(&row.topic),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryDeviceItem {
    pub battery_level: Option<i32>,
    pub voltage: Option<f64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub create_at: String,
    pub update_at: String,
    pub via_id: i64,
    pub via_id_hex: String,
    pub channel: Option<String>,
    pub root_topic: Option<String>,
}

fn telemetry_device_item(row: &NodeTelemetryDevice, tz: Tz) -> Option<TelemetryDeviceItem> {
    let via_id_hex = mesh::reporter_from_topic(&row.topic)
        .map(str::to_string)
        .unwrap_or_else(|| format!("!{}", mesh::node_id_to_hex(row.node_id)));
    let Some(via_id) = mesh::node_hex_to_id(&via_id_hex) else {
        debug!("invalid reporter in topic {}", row.topic);
        return None;
    };
    Some(TelemetryDeviceItem {
        battery_level: row.battery_level,
        voltage: row.voltage,
        channel_utilization: row.channel_utilization,
        air_util_tx: row.air_util_tx,
        create_at: display_time(row.create_at, tz),
        update_at: display_time(row.update_at, tz),
        via_id,
        via_id_hex,
        channel: mesh::channel_from_topic(&row.topic).map(String::from),
        root_topic: mesh::root_topic(&row.topic),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoResponse {
    pub id: i64,
    pub id_hex: String,
    pub item: Option<InfoItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePositionResponse {
    pub id: i64,
    pub id_hex: String,
    pub position: Option<PositionItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTelemetryDeviceResponse {
    pub id: i64,
    pub id_hex: String,
    pub items: Vec<TelemetryDeviceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHourlyItem {
    pub known_count: i32,
    pub unknown_count: i32,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHourlyResponse {
    pub items: Vec<ActiveHourlyItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionEntry {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionResponse {
    pub items: Vec<DistributionEntry>,
}

/// Settings snapshot for clients that need to bound their own queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingData {
    pub meshtastic_position_max_query_period: i64,
    pub meshtastic_neighborinfo_max_query_period: i64,
}

// ── Node service ──────────────────────────────────────────────────────────────

pub struct NodeService {
    repo: Arc<Repository>,
    config: Arc<GatewayConfig>,
}

impl NodeService {
    pub fn new(repo: Arc<Repository>, config: Arc<GatewayConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn info(&self, node_id: i64) -> Result<NodeInfoResponse, GatewayError> {
        let tz = self.config.display_tz();
        match self.repo.fetch_node_info(node_id).await {
            Ok(row) => Ok(NodeInfoResponse {
                id: node_id,
                id_hex: format!("!{}", mesh::node_id_to_hex(node_id)),
                item: row.map(|r| info_item(&r, tz)),
            }),
            Err(err) => {
                error!("node info {node_id}: {err}");
                Err(err.internalize())
            }
        }
    }

    pub async fn position(&self, node_id: i64) -> Result<NodePositionResponse, GatewayError> {
        let tz = self.config.display_tz();
        match self.repo.fetch_positions(node_id, 1).await {
            Ok(rows) => Ok(NodePositionResponse {
                id: node_id,
                id_hex: format!("!{}", mesh::node_id_to_hex(node_id)),
                position: rows.first().and_then(|r| position_item(r, tz)),
            }),
            Err(err) => {
                error!("node position {node_id}: {err}");
                Err(err.internalize())
            }
        }
    }

    pub async fn telemetry_device(
        &self,
        node_id: i64,
        start: &str,
        end: &str,
    ) -> Result<NodeTelemetryDeviceResponse, GatewayError> {
        let tz = self.config.display_tz();
        let start_time = parse_iso_minute(start, tz)?;
        let end_time = parse_iso_minute(end, tz)?;
        match self
            .repo
            .fetch_telemetry_device_range(node_id, start_time, end_time)
            .await
        {
            Ok(rows) => Ok(NodeTelemetryDeviceResponse {
                id: node_id,
                id_hex: format!("!{}", mesh::node_id_to_hex(node_id)),
                items: rows.iter().filter_map(|r| telemetry_device_item(r, tz)).collect(),
            }),
            Err(err) => {
                error!("node telemetry {node_id}: {err}");
                Err(err.internalize())
            }
        }
    }
}

// ── Analysis service ──────────────────────────────────────────────────────────

pub struct AnalysisService {
    repo: Arc<Repository>,
    config: Arc<GatewayConfig>,
}

impl AnalysisService {
    pub fn new(repo: Arc<Repository>, config: Arc<GatewayConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn active_hourly_records(
        &self,
        start: &str,
        end: &str,
    ) -> Result<ActiveHourlyResponse, GatewayError> {
        let tz = self.config.display_tz();
        let start_time = parse_iso(start, tz)?;
        let end_time = parse_iso(end, tz)?;
        match self.repo.fetch_active_hourly(start_time, end_time).await {
            Ok(rows) => Ok(ActiveHourlyResponse {
                items: rows
                    .iter()
                    .map(|r| ActiveHourlyItem {
                        known_count: r.known_count,
                        unknown_count: r.unknown_count,
                        timestamp: display_time(r.hourly, tz),
                    })
                    .collect(),
            }),
            Err(err) => {
                error!("active hourly records: {err}");
                Err(err.internalize())
            }
        }
    }

    pub async fn distribution(&self, kind: &str) -> Result<DistributionResponse, GatewayError> {
        let result = match kind {
            "hardware" => self.repo.distribution_hardware().await,
            "firmware" => self.repo.distribution_firmware().await,
            "role" => self.repo.distribution_role().await,
            _ => return Err(GatewayError::domain("unsupported distribution type")),
        };
        match result {
            Ok(rows) => Ok(DistributionResponse {
                items: rows
                    .into_iter()
                    .map(|r| DistributionEntry { name: r.name, count: r.count })
                    .collect(),
            }),
            Err(err) => {
                error!("distribution {kind}: {err}");
                Err(err.internalize())
            }
        }
    }

    pub fn setting_data(&self) -> SettingData {
        SettingData {
            meshtastic_position_max_query_period: self.config.meshtastic.position.max_query_period,
            meshtastic_neighborinfo_max_query_period: self
                .config
                .meshtastic
                .neighborinfo
                .max_query_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_rfc3339_and_naive_inputs() {
        let tz: Tz = "Asia/Taipei".parse().unwrap();
        let with_offset = parse_iso_minute("2024-07-03T14:42:31+08:00", tz).unwrap();
        assert_eq!(with_offset, Utc.with_ymd_and_hms(2024, 7, 3, 6, 42, 0).unwrap());
        // Offset-less input is local to the display timezone.
        let naive = parse_iso_minute("2024-07-03T14:42:31", tz).unwrap();
        assert_eq!(naive, with_offset);
        assert!(parse_iso_minute("yesterday", tz).is_err());
    }

    #[test]
    fn channel_labels_mark_their_topic_family() {
        assert_eq!(
            channel_label("msh/TW/2/e/MeshTW/!a1b2c3d4").as_deref(),
            Some("MeshTW")
        );
        assert_eq!(
            channel_label("msh/TW/2/map/").as_deref(),
            Some("map(MapReport)")
        );
        assert_eq!(
            channel_label("msh/TW/2/json/MeshTW/!a1b2c3d4").as_deref(),
            Some("MeshTW(json)")
        );
        assert_eq!(channel_label("lonely"), None);
    }

    #[test]
    fn position_item_parses_the_reporter() {
        let t = Utc.with_ymd_and_hms(2024, 7, 3, 6, 0, 0).unwrap();
        let row = NodePosition {
            node_id: 0xff,
            latitude: 25.0,
            longitude: 121.5,
            altitude: None,
            precision_bits: Some(13),
            sats_in_view: None,
            create_at: t,
            update_at: t,
            topic: "msh/TW/2/e/MeshTW/!a1b2c3d4".into(),
        };
        let item = position_item(&row, Tz::UTC).unwrap();
        assert_eq!(item.via_id, 0xa1b2c3d4);
        assert_eq!(item.via_id_hex, "!a1b2c3d4");
        assert_eq!(item.precision_in_meters, Some(2918));

        // An empty reporter segment falls back to the node itself.
        let own = NodePosition { topic: "msh/TW/2/map/".into(), ..row.clone() };
        let item = position_item(&own, Tz::UTC).unwrap();
        assert_eq!(item.via_id, 0xff);
        assert_eq!(item.via_id_hex, "!000000ff");

        // Garbage reporter segments drop the item.
        let bad = NodePosition { topic: "msh/TW/2/e/MeshTW/garbage".into(), ..row };
        assert!(position_item(&bad, Tz::UTC).is_none());
    }
}
