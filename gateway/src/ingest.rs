//! Ingest pipeline: validates decoded events and dispatches them into the
//! repository. Every event is independently fallible — errors are logged and
//! the event is dropped, never retried.

use std::sync::Arc;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tracing::{error, info};

use crate::codec::{
    EventPayload, MapReportEvent, MeshEvent, NeighborInfoEvent, NodeInfoEvent, PositionEvent,
    TelemetryEvent,
};
use crate::error::GatewayError;
use crate::mesh;
use crate::model::{
    NodeInfo, NodeNeighborEdge, NodeNeighborInfo, NodePosition, NodeTelemetryAirQuality,
    NodeTelemetryDevice, NodeTelemetryEnvironment, NodeTelemetryPower,
};
use crate::repo::Repository;

/// Truncate to the hour boundary; hour-keyed entities share one row per hour.
pub(crate) fn hour_floor(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(timestamp)
}

fn second_floor(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::seconds(1))
        .unwrap_or(timestamp)
}

/// Coordinates must be inside the closed lat/lon intervals and not the
/// null island origin.
pub(crate) fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
        && !(latitude == 0.0 && longitude == 0.0)
}

/// Map reports from firmware 2.3.1.x flooded the mesh with bogus data;
/// reports without a version are equally untrustworthy.
pub(crate) fn mapreport_firmware_ok(firmware_version: Option<&str>) -> bool {
    match firmware_version {
        Some(version) => !version.starts_with("2.3.1."),
        None => false,
    }
}

pub struct IngestPipeline {
    repo: Arc<Repository>,
}

impl IngestPipeline {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Entry point for one decoded event. Never propagates.
    pub async fn handle(&self, event: MeshEvent) {
        let topic = event.topic.clone();
        if let Err(err) = self.process(event).await {
            error!("ingest failed on {topic}: {err}");
        }
    }

    async fn process(&self, event: MeshEvent) -> Result<(), GatewayError> {
        let now = Utc::now();
        // The sender is heard regardless of what the payload turns out to be.
        self.repo.ensure_node(event.from, Some(now)).await?;

        let timestamp = event.timestamp.unwrap_or(now);
        if timestamp > now {
            // Future-dated packets are rejected outright.
            return Ok(());
        }

        match event.payload {
            EventPayload::MapReport(report) => {
                self.handle_mapreport(event.from, timestamp, event.topic, report).await
            }
            EventPayload::NeighborInfo(info) => {
                self.handle_neighborinfo(timestamp, event.topic, info).await
            }
            EventPayload::NodeInfo(info) => {
                self.handle_nodeinfo(timestamp, event.topic, info).await
            }
            EventPayload::Position(position) => {
                self.handle_position(event.from, timestamp, event.topic, position).await
            }
            EventPayload::Telemetry(telemetry) => {
                self.handle_telemetry(event.from, event.topic, telemetry).await
            }
            EventPayload::Unknown(_) => Ok(()),
        }
    }

    async fn handle_mapreport(
        &self,
        from: i64,
        timestamp: DateTime<Utc>,
        topic: String,
        report: MapReportEvent,
    ) -> Result<(), GatewayError> {
        if !mapreport_firmware_ok(report.firmware_version.as_deref()) {
            info!(
                "skipping mapreport from {from} (firmware {:?})",
                report.firmware_version
            );
            return Ok(());
        }
        let update_at = second_floor(timestamp);

        self.repo
            .upsert_node_info(NodeInfo {
                node_id: from,
                long_name: report.long_name,
                short_name: report.short_name,
                hw_model: report.hw_model,
                is_licensed: None,
                role: report.role,
                firmware_version: report.firmware_version,
                lora_region: report.region,
                lora_modem_preset: report.modem_preset,
                has_default_channel: report.has_default_channel,
                num_online_local_nodes: report.num_online_local_nodes.map(|v| v as i32),
                update_at,
                topic: topic.clone(),
            })
            .await?;

        if let (Some(lat_i), Some(lon_i)) = (report.latitude_i, report.longitude_i) {
            let latitude = f64::from(lat_i) / 1e7;
            let longitude = f64::from(lon_i) / 1e7;
            if !valid_coordinates(latitude, longitude) {
                return Ok(());
            }
            self.repo
                .upsert_node_position(NodePosition {
                    node_id: from,
                    latitude,
                    longitude,
                    altitude: report.altitude.map(f64::from),
                    precision_bits: report.position_precision.map(|v| v as i32),
                    sats_in_view: None,
                    create_at: hour_floor(timestamp),
                    update_at,
                    topic,
                })
                .await?;
        }
        Ok(())
    }

    async fn handle_neighborinfo(
        &self,
        timestamp: DateTime<Utc>,
        topic: String,
        info: NeighborInfoEvent,
    ) -> Result<(), GatewayError> {
        let node_id = info
            .node_id
            .ok_or_else(|| GatewayError::domain("neighborinfo without node_id"))?;

        self.repo
            .upsert_node_neighbor_info(NodeNeighborInfo {
                node_id,
                last_sent_by_id: info.last_sent_by_id,
                node_broadcast_interval_secs: info.node_broadcast_interval_secs,
                update_at: timestamp,
                topic,
            })
            .await?;

        // An empty neighbor list keeps whatever edges are already stored.
        if !info.neighbors.is_empty() {
            let edges: Vec<NodeNeighborEdge> = info
                .neighbors
                .iter()
                .map(|n| NodeNeighborEdge {
                    node_id,
                    edge_node_id: n.node_id,
                    snr: n.snr,
                })
                .collect();
            self.repo.replace_neighbor_edges(node_id, &edges).await?;
        }
        Ok(())
    }

    async fn handle_nodeinfo(
        &self,
        timestamp: DateTime<Utc>,
        topic: String,
        info: NodeInfoEvent,
    ) -> Result<(), GatewayError> {
        let (Some(id), Some(long_name), Some(short_name)) =
            (info.id, info.long_name, info.short_name)
        else {
            return Ok(());
        };
        let node_id = mesh::node_hex_to_id(&id)
            .ok_or_else(|| GatewayError::domain(format!("invalid node id '{id}'")))?;

        self.repo
            .upsert_node_info(NodeInfo {
                node_id,
                long_name: Some(long_name),
                short_name: Some(short_name),
                hw_model: info.hw_model,
                is_licensed: info.is_licensed,
                role: info.role,
                firmware_version: None,
                lora_region: None,
                lora_modem_preset: None,
                has_default_channel: None,
                num_online_local_nodes: None,
                update_at: second_floor(timestamp),
                topic,
            })
            .await?;
        Ok(())
    }

    async fn handle_position(
        &self,
        from: i64,
        timestamp: DateTime<Utc>,
        topic: String,
        position: PositionEvent,
    ) -> Result<(), GatewayError> {
        let (Some(lat_i), Some(lon_i)) = (position.latitude_i, position.longitude_i) else {
            return Ok(());
        };
        let latitude = f64::from(lat_i) / 1e7;
        let longitude = f64::from(lon_i) / 1e7;
        if !valid_coordinates(latitude, longitude) {
            return Ok(());
        }

        self.repo
            .upsert_node_position(NodePosition {
                node_id: from,
                latitude,
                longitude,
                altitude: position.altitude.map(f64::from),
                precision_bits: position.precision_bits.map(|v| v as i32),
                sats_in_view: position.sats_in_view.map(|v| v as i32),
                create_at: hour_floor(timestamp),
                update_at: timestamp,
                topic,
            })
            .await?;
        Ok(())
    }

    async fn handle_telemetry(
        &self,
        from: i64,
        topic: String,
        telemetry: TelemetryEvent,
    ) -> Result<(), GatewayError> {
        let Some(seconds) = telemetry.time else {
            return Ok(());
        };
        let Some(mut time) = DateTime::from_timestamp(seconds, 0) else {
            return Err(GatewayError::domain(format!(
                "telemetry time {seconds} out of range"
            )));
        };
        // Sender clocks drift; a future time collapses to now.
        let now = Utc::now();
        if time > now {
            time = now;
        }
        let create_at = hour_floor(time);

        if let Some(m) = telemetry.air_quality_metrics {
            self.repo
                .upsert_telemetry_air_quality(NodeTelemetryAirQuality {
                    node_id: from,
                    pm10_standard: m.pm10_standard.map(|v| v as i32),
                    pm25_standard: m.pm25_standard.map(|v| v as i32),
                    pm100_standard: m.pm100_standard.map(|v| v as i32),
                    pm10_environmental: m.pm10_environmental.map(|v| v as i32),
                    pm25_environmental: m.pm25_environmental.map(|v| v as i32),
                    pm100_environmental: m.pm100_environmental.map(|v| v as i32),
                    particles_03um: m.particles_03um.map(|v| v as i32),
                    particles_05um: m.particles_05um.map(|v| v as i32),
                    particles_10um: m.particles_10um.map(|v| v as i32),
                    particles_25um: m.particles_25um.map(|v| v as i32),
                    particles_50um: m.particles_50um.map(|v| v as i32),
                    particles_100um: m.particles_100um.map(|v| v as i32),
                    create_at,
                    update_at: time,
                    topic: topic.clone(),
                })
                .await?;
        }
        if let Some(m) = telemetry.device_metrics {
            self.repo
                .upsert_telemetry_device(NodeTelemetryDevice {
                    node_id: from,
                    battery_level: m.battery_level.map(|v| v as i32),
                    voltage: m.voltage,
                    channel_utilization: m.channel_utilization,
                    air_util_tx: m.air_util_tx,
                    uptime_seconds: m.uptime_seconds,
                    create_at,
                    update_at: time,
                    topic: topic.clone(),
                })
                .await?;
        }
        if let Some(m) = telemetry.environment_metrics {
            self.repo
                .upsert_telemetry_environment(NodeTelemetryEnvironment {
                    node_id: from,
                    temperature: m.temperature,
                    relative_humidity: m.relative_humidity,
                    barometric_pressure: m.barometric_pressure,
                    gas_resistance: m.gas_resistance,
                    voltage: m.voltage,
                    current: m.current,
                    iaq: m.iaq.map(|v| v as i32),
                    distance: m.distance,
                    lux: m.lux,
                    white_lux: m.white_lux,
                    ir_lux: m.ir_lux,
                    uv_lux: m.uv_lux,
                    wind_direction: m.wind_direction.map(|v| v as i32),
                    wind_speed: m.wind_speed,
                    weight: m.weight,
                    wind_gust: m.wind_gust,
                    wind_lull: m.wind_lull,
                    create_at,
                    update_at: time,
                    topic: topic.clone(),
                })
                .await?;
        }
        if let Some(m) = telemetry.power_metrics {
            self.repo
                .upsert_telemetry_power(NodeTelemetryPower {
                    node_id: from,
                    ch1_voltage: m.ch1_voltage,
                    ch1_current: m.ch1_current,
                    ch2_voltage: m.ch2_voltage,
                    ch2_current: m.ch2_current,
                    ch3_voltage: m.ch3_voltage,
                    ch3_current: m.ch3_current,
                    create_at,
                    update_at: time,
                    topic,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hour_floor_aligns_to_the_hour() {
        let t = Utc.with_ymd_and_hms(2024, 7, 3, 14, 42, 31).unwrap();
        assert_eq!(hour_floor(t), Utc.with_ymd_and_hms(2024, 7, 3, 14, 0, 0).unwrap());
        let aligned = Utc.with_ymd_and_hms(2024, 7, 3, 14, 0, 0).unwrap();
        assert_eq!(hour_floor(aligned), aligned);
    }

    #[test]
    fn coordinate_validation() {
        assert!(valid_coordinates(25.0330, 121.5654));
        assert!(valid_coordinates(-90.0, 180.0));
        assert!(!valid_coordinates(90.1, 0.0));
        assert!(!valid_coordinates(0.0, -180.5));
        // Null island is treated as no fix.
        assert!(!valid_coordinates(0.0, 0.0));
        assert!(valid_coordinates(0.0, 1.0));
    }

    #[test]
    fn mapreport_firmware_guard() {
        assert!(!mapreport_firmware_ok(None));
        assert!(!mapreport_firmware_ok(Some("2.3.1.abcdef")));
        assert!(mapreport_firmware_ok(Some("2.3.15.deadbeef")));
        assert!(mapreport_firmware_ok(Some("2.4.1.394e0e1")));
    }
}
