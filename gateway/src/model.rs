//! Canonical entities and the monotonic merge rule.
//!
//! Every upsertable entity implements [`MonotonicMerge`]: an incoming row
//! older than the stored one is discarded, otherwise non-null incoming fields
//! win field by field and null never clobbers a stored value. The repository
//! applies the result under a row lock, so the rule here is the single source
//! of truth for conflict resolution.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::mesh;

pub trait MonotonicMerge: Sized + Clone {
    fn update_at(&self) -> DateTime<Utc>;

    /// Field-level merge of `self` (incoming) over `existing`. Only called
    /// when `self` is at least as new as `existing`.
    fn merged_into(self, existing: &Self) -> Self;

    /// Resolve an upsert: keep the stored row when the incoming one is
    /// older, otherwise merge.
    fn apply(existing: Option<&Self>, incoming: Self) -> Self {
        match existing {
            None => incoming,
            Some(stored) if incoming.update_at() < stored.update_at() => stored.clone(),
            Some(stored) => incoming.merged_into(stored),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Node {
    pub id: i64,
    pub id_hex: String,
    pub last_heard_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeInfo {
    pub node_id: i64,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hw_model: Option<String>,
    pub is_licensed: Option<bool>,
    pub role: Option<String>,
    pub firmware_version: Option<String>,
    pub lora_region: Option<String>,
    pub lora_modem_preset: Option<String>,
    pub has_default_channel: Option<bool>,
    pub num_online_local_nodes: Option<i32>,
    pub update_at: DateTime<Utc>,
    pub topic: String,
}

impl MonotonicMerge for NodeInfo {
    fn update_at(&self) -> DateTime<Utc> {
        self.update_at
    }

    fn merged_into(self, existing: &Self) -> Self {
        Self {
            node_id: existing.node_id,
            long_name: self.long_name.or_else(|| existing.long_name.clone()),
            short_name: self.short_name.or_else(|| existing.short_name.clone()),
            hw_model: self.hw_model.or_else(|| existing.hw_model.clone()),
            is_licensed: self.is_licensed.or(existing.is_licensed),
            role: self.role.or_else(|| existing.role.clone()),
            firmware_version: self
                .firmware_version
                .or_else(|| existing.firmware_version.clone()),
            lora_region: self.lora_region.or_else(|| existing.lora_region.clone()),
            lora_modem_preset: self
                .lora_modem_preset
                .or_else(|| existing.lora_modem_preset.clone()),
            has_default_channel: self.has_default_channel.or(existing.has_default_channel),
            num_online_local_nodes: self
                .num_online_local_nodes
                .or(existing.num_online_local_nodes),
            update_at: self.update_at,
            topic: self.topic,
        }
    }
}

/// One position observation per (node, hour, reporter path).
#[derive(Debug, Clone, FromRow)]
pub struct NodePosition {
    pub node_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub precision_bits: Option<i32>,
    pub sats_in_view: Option<i32>,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub topic: String,
}

impl NodePosition {
    /// Cap the revealed precision: positions missing `precision_bits` or
    /// exceeding `max_bits` are displaced by a random offset bounded by the
    /// meter-equivalent of `max_bits`, and stored with that precision.
    pub fn fuzz_to_max_precision(&mut self, max_bits: u32) {
        let over_cap = match self.precision_bits {
            None => true,
            Some(bits) => bits < 0 || bits as u32 > max_bits,
        };
        if !over_cap {
            return;
        }
        let radius = mesh::precision_to_meters(max_bits);
        let (lat, lon) = mesh::blur_position(self.latitude, self.longitude, radius);
        self.latitude = lat;
        self.longitude = lon;
        self.precision_bits = Some(max_bits as i32);
    }
}

impl MonotonicMerge for NodePosition {
    fn update_at(&self) -> DateTime<Utc> {
        self.update_at
    }

    fn merged_into(self, existing: &Self) -> Self {
        Self {
            node_id: existing.node_id,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude.or(existing.altitude),
            precision_bits: self.precision_bits.or(existing.precision_bits),
            sats_in_view: self.sats_in_view.or(existing.sats_in_view),
            create_at: existing.create_at,
            update_at: self.update_at,
            topic: existing.topic.clone(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeNeighborInfo {
    pub node_id: i64,
    pub last_sent_by_id: Option<i64>,
    pub node_broadcast_interval_secs: Option<i32>,
    pub update_at: DateTime<Utc>,
    pub topic: String,
}

impl MonotonicMerge for NodeNeighborInfo {
    fn update_at(&self) -> DateTime<Utc> {
        self.update_at
    }

    fn merged_into(self, existing: &Self) -> Self {
        Self {
            node_id: existing.node_id,
            last_sent_by_id: self.last_sent_by_id.or(existing.last_sent_by_id),
            node_broadcast_interval_secs: self
                .node_broadcast_interval_secs
                .or(existing.node_broadcast_interval_secs),
            update_at: self.update_at,
            topic: self.topic,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeNeighborEdge {
    pub node_id: i64,
    pub edge_node_id: i64,
    pub snr: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeTelemetryDevice {
    pub node_id: i64,
    pub battery_level: Option<i32>,
    pub voltage: Option<f64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub uptime_seconds: Option<i64>,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub topic: String,
}

impl MonotonicMerge for NodeTelemetryDevice {
    fn update_at(&self) -> DateTime<Utc> {
        self.update_at
    }

    fn merged_into(self, existing: &Self) -> Self {
        Self {
            node_id: existing.node_id,
            battery_level: self.battery_level.or(existing.battery_level),
            voltage: self.voltage.or(existing.voltage),
            channel_utilization: self.channel_utilization.or(existing.channel_utilization),
            air_util_tx: self.air_util_tx.or(existing.air_util_tx),
            uptime_seconds: self.uptime_seconds.or(existing.uptime_seconds),
            create_at: existing.create_at,
            update_at: self.update_at,
            topic: self.topic,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeTelemetryEnvironment {
    pub node_id: i64,
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub barometric_pressure: Option<f64>,
    pub gas_resistance: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub iaq: Option<i32>,
    pub distance: Option<f64>,
    pub lux: Option<f64>,
    pub white_lux: Option<f64>,
    pub ir_lux: Option<f64>,
    pub uv_lux: Option<f64>,
    pub wind_direction: Option<i32>,
    pub wind_speed: Option<f64>,
    pub weight: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wind_lull: Option<f64>,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub topic: String,
}

impl MonotonicMerge for NodeTelemetryEnvironment {
    fn update_at(&self) -> DateTime<Utc> {
        self.update_at
    }

    fn merged_into(self, existing: &Self) -> Self {
        Self {
            node_id: existing.node_id,
            temperature: self.temperature.or(existing.temperature),
            relative_humidity: self.relative_humidity.or(existing.relative_humidity),
            barometric_pressure: self.barometric_pressure.or(existing.barometric_pressure),
            gas_resistance: self.gas_resistance.or(existing.gas_resistance),
            voltage: self.voltage.or(existing.voltage),
            current: self.current.or(existing.current),
            iaq: self.iaq.or(existing.iaq),
            distance: self.distance.or(existing.distance),
            lux: self.lux.or(existing.lux),
            white_lux: self.white_lux.or(existing.white_lux),
            ir_lux: self.ir_lux.or(existing.ir_lux),
            uv_lux: self.uv_lux.or(existing.uv_lux),
            wind_direction: self.wind_direction.or(existing.wind_direction),
            wind_speed: self.wind_speed.or(existing.wind_speed),
            weight: self.weight.or(existing.weight),
            wind_gust: self.wind_gust.or(existing.wind_gust),
            wind_lull: self.wind_lull.or(existing.wind_lull),
            create_at: existing.create_at,
            update_at: self.update_at,
            topic: self.topic,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeTelemetryAirQuality {
    pub node_id: i64,
    pub pm10_standard: Option<i32>,
    pub pm25_standard: Option<i32>,
    pub pm100_standard: Option<i32>,
    pub pm10_environmental: Option<i32>,
    pub pm25_environmental: Option<i32>,
    pub pm100_environmental: Option<i32>,
    pub particles_03um: Option<i32>,
    pub particles_05um: Option<i32>,
    pub particles_10um: Option<i32>,
    pub particles_25um: Option<i32>,
    pub particles_50um: Option<i32>,
    pub particles_100um: Option<i32>,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub topic: String,
}

impl MonotonicMerge for NodeTelemetryAirQuality {
    fn update_at(&self) -> DateTime<Utc> {
        self.update_at
    }

    fn merged_into(self, existing: &Self) -> Self {
        Self {
            node_id: existing.node_id,
            pm10_standard: self.pm10_standard.or(existing.pm10_standard),
            pm25_standard: self.pm25_standard.or(existing.pm25_standard),
            pm100_standard: self.pm100_standard.or(existing.pm100_standard),
            pm10_environmental: self.pm10_environmental.or(existing.pm10_environmental),
            pm25_environmental: self.pm25_environmental.or(existing.pm25_environmental),
            pm100_environmental: self.pm100_environmental.or(existing.pm100_environmental),
            particles_03um: self.particles_03um.or(existing.particles_03um),
            particles_05um: self.particles_05um.or(existing.particles_05um),
            particles_10um: self.particles_10um.or(existing.particles_10um),
            particles_25um: self.particles_25um.or(existing.particles_25um),
            particles_50um: self.particles_50um.or(existing.particles_50um),
            particles_100um: self.particles_100um.or(existing.particles_100um),
            create_at: existing.create_at,
            update_at: self.update_at,
            topic: self.topic,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeTelemetryPower {
    pub node_id: i64,
    pub ch1_voltage: Option<f64>,
    pub ch1_current: Option<f64>,
    pub ch2_voltage: Option<f64>,
    pub ch2_current: Option<f64>,
    pub ch3_voltage: Option<f64>,
    pub ch3_current: Option<f64>,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub topic: String,
}

impl MonotonicMerge for NodeTelemetryPower {
    fn update_at(&self) -> DateTime<Utc> {
        self.update_at
    }

    fn merged_into(self, existing: &Self) -> Self {
        Self {
            node_id: existing.node_id,
            ch1_voltage: self.ch1_voltage.or(existing.ch1_voltage),
            ch1_current: self.ch1_current.or(existing.ch1_current),
            ch2_voltage: self.ch2_voltage.or(existing.ch2_voltage),
            ch2_current: self.ch2_current.or(existing.ch2_current),
            ch3_voltage: self.ch3_voltage.or(existing.ch3_voltage),
            ch3_current: self.ch3_current.or(existing.ch3_current),
            create_at: existing.create_at,
            update_at: self.update_at,
            topic: self.topic,
        }
    }
}

/// Hourly active-node rollup produced by the retention scheduler.
#[derive(Debug, Clone, FromRow)]
pub struct AnalysisActiveHourly {
    pub hourly: DateTime<Utc>,
    pub known_count: i32,
    pub unknown_count: i32,
}

/// Grouped count used by the analysis distribution queries.
#[derive(Debug, Clone, FromRow)]
pub struct DistributionItem {
    pub name: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn info(node_id: i64, update_at: DateTime<Utc>) -> NodeInfo {
        NodeInfo {
            node_id,
            long_name: None,
            short_name: None,
            hw_model: None,
            is_licensed: None,
            role: None,
            firmware_version: None,
            lora_region: None,
            lora_modem_preset: None,
            has_default_channel: None,
            num_online_local_nodes: None,
            update_at,
            topic: "msh/TW/2/e/MeshTW/!00000001".into(),
        }
    }

    #[test]
    fn older_update_never_overwrites() {
        let t = Utc::now();
        let mut newer = info(1, t);
        newer.long_name = Some("A".into());
        let mut older = info(1, t - TimeDelta::hours(1));
        older.long_name = Some("B".into());

        let stored = NodeInfo::apply(None, newer.clone());
        let stored = NodeInfo::apply(Some(&stored), older);
        assert_eq!(stored.long_name.as_deref(), Some("A"));
        assert_eq!(stored.update_at, t);
    }

    #[test]
    fn null_never_clobbers() {
        let t = Utc::now();
        let mut first = info(1, t);
        first.hw_model = Some("X".into());
        let mut second = info(1, t + TimeDelta::minutes(1));
        second.role = Some("R".into());

        let stored = NodeInfo::apply(None, first);
        let stored = NodeInfo::apply(Some(&stored), second);
        assert_eq!(stored.hw_model.as_deref(), Some("X"));
        assert_eq!(stored.role.as_deref(), Some("R"));
        assert_eq!(stored.update_at, t + TimeDelta::minutes(1));
    }

    #[test]
    fn final_update_at_is_max_of_inputs() {
        let t = Utc::now();
        let stamps = [
            t,
            t - TimeDelta::hours(2),
            t + TimeDelta::minutes(5),
            t - TimeDelta::seconds(30),
        ];
        let mut stored: Option<NodeInfo> = None;
        for stamp in stamps {
            stored = Some(NodeInfo::apply(stored.as_ref(), info(1, stamp)));
        }
        assert_eq!(stored.unwrap().update_at, t + TimeDelta::minutes(5));
    }

    #[test]
    fn position_fuzzing_caps_precision() {
        let t = Utc::now();
        let mut position = NodePosition {
            node_id: 7,
            latitude: 25.0330,
            longitude: 121.5654,
            altitude: None,
            precision_bits: Some(32),
            sats_in_view: None,
            create_at: t,
            update_at: t,
            topic: "msh/TW/2/e/MeshTW/!00000007".into(),
        };
        position.fuzz_to_max_precision(13);
        assert_eq!(position.precision_bits, Some(13));
        let moved =
            mesh::distance_in_meters(25.0330, 121.5654, position.latitude, position.longitude);
        assert!(moved <= mesh::precision_to_meters(13) * 1.05, "moved {moved}");
    }

    #[test]
    fn position_within_cap_is_untouched() {
        let t = Utc::now();
        let mut position = NodePosition {
            node_id: 7,
            latitude: 25.0,
            longitude: 121.0,
            altitude: None,
            precision_bits: Some(11),
            sats_in_view: None,
            create_at: t,
            update_at: t,
            topic: "t".into(),
        };
        position.fuzz_to_max_precision(13);
        assert_eq!(position.precision_bits, Some(11));
        assert_eq!(position.latitude, 25.0);
        assert_eq!(position.longitude, 121.0);
    }
}
