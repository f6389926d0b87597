//! Frame codec: raw MQTT `(topic, payload)` in, normalized tagged event out.
//!
//! Classification by topic family:
//! - topics containing `#` are broker reflections of our own wildcard
//!   subscriptions and are dropped
//! - `/2/stat/` is the deprecated status channel and is dropped
//! - `/2/json/` carries the firmware's JSON mirror of a packet
//! - `/2/e/` and `/2/map` carry a protobuf ServiceEnvelope
//!
//! Encrypted packets are opened with AES-CTR using the channel key from the
//! second-to-last topic segment (falling back to the published default key).
//! Downstream stages only ever see [`MeshEvent`] — every payload is decoded
//! into a typed shape here.

use std::collections::HashMap;

use aes::{Aes128, Aes256};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use prost::Message;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::ChannelKey;
use crate::mesh;

/// Key every firmware ships for the default channel.
pub const DEFAULT_CHANNEL_KEY: &str = "1PG7OiApB1nwvP+rz05pAQ==";

type Aes128Ctr = Ctr128BE<Aes128>;
type Aes256Ctr = Ctr128BE<Aes256>;

/// Normalized event handed to the ingest pipeline.
#[derive(Debug, Clone)]
pub struct MeshEvent {
    pub packet_id: u32,
    pub from: i64,
    pub to: i64,
    pub channel: u32,
    pub sender_hex: String,
    /// Sender-reported observation time; `None` when absent or zero.
    pub timestamp: Option<DateTime<Utc>>,
    pub topic: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    MapReport(MapReportEvent),
    NeighborInfo(NeighborInfoEvent),
    NodeInfo(NodeInfoEvent),
    Position(PositionEvent),
    Telemetry(TelemetryEvent),
    /// Port or JSON type the gateway does not ingest. The sender still
    /// counts as heard.
    Unknown(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MapReportEvent {
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub role: Option<String>,
    pub hw_model: Option<String>,
    pub firmware_version: Option<String>,
    pub region: Option<String>,
    pub modem_preset: Option<String>,
    pub has_default_channel: Option<bool>,
    pub latitude_i: Option<i32>,
    pub longitude_i: Option<i32>,
    pub altitude: Option<i32>,
    pub position_precision: Option<u32>,
    pub num_online_local_nodes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeInfoEvent {
    /// `!hex` node id as carried in the payload.
    pub id: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hw_model: Option<String>,
    pub is_licensed: Option<bool>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PositionEvent {
    pub latitude_i: Option<i32>,
    pub longitude_i: Option<i32>,
    pub altitude: Option<i32>,
    pub precision_bits: Option<u32>,
    pub sats_in_view: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NeighborInfoEvent {
    pub node_id: Option<i64>,
    pub last_sent_by_id: Option<i64>,
    pub node_broadcast_interval_secs: Option<i32>,
    pub neighbors: Vec<NeighborEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NeighborEntry {
    pub node_id: i64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub snr: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryEvent {
    pub time: Option<i64>,
    pub device_metrics: Option<DeviceMetricsEvent>,
    pub environment_metrics: Option<EnvironmentMetricsEvent>,
    pub air_quality_metrics: Option<AirQualityMetricsEvent>,
    pub power_metrics: Option<PowerMetricsEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceMetricsEvent {
    #[serde(deserialize_with = "de_opt_i64")]
    pub battery_level: Option<i64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub voltage: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub channel_utilization: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub air_util_tx: Option<f64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub uptime_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvironmentMetricsEvent {
    #[serde(deserialize_with = "de_opt_f64")]
    pub temperature: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub relative_humidity: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub barometric_pressure: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub gas_resistance: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub voltage: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub current: Option<f64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub iaq: Option<i64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub distance: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub lux: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub white_lux: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub ir_lux: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub uv_lux: Option<f64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub wind_direction: Option<i64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub wind_speed: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub weight: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub wind_gust: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub wind_lull: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AirQualityMetricsEvent {
    #[serde(deserialize_with = "de_opt_i64")]
    pub pm10_standard: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub pm25_standard: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub pm100_standard: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub pm10_environmental: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub pm25_environmental: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub pm100_environmental: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub particles_03um: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub particles_05um: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub particles_10um: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub particles_25um: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub particles_50um: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub particles_100um: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PowerMetricsEvent {
    #[serde(deserialize_with = "de_opt_f64")]
    pub ch1_voltage: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub ch1_current: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub ch2_voltage: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub ch2_current: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub ch3_voltage: Option<f64>,
    #[serde(deserialize_with = "de_opt_f64")]
    pub ch3_current: Option<f64>,
}

/// Metric value tolerant of the firmware's `"NaN"` strings and IEEE NaN,
/// both of which normalize to null.
fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s == "NaN" => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64().filter(|f| f.is_finite())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a number, got {other}"
        ))),
    }
}

fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s == "NaN" => Ok(None),
        Some(Value::Number(n)) => Ok(n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a number, got {other}"
        ))),
    }
}

// ── Proto → event conversions ─────────────────────────────────────────────────
//
// These mirror proto-JSON presence semantics: default scalars (0, "", false)
// carry no information and normalize to None, enum values map to their
// screaming-snake names, NaN floats map to None.

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn non_zero_u32(v: u32) -> Option<u32> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

fn finite_f64(v: f32) -> Option<f64> {
    let v = f64::from(v);
    if v.is_finite() && v != 0.0 {
        Some(v)
    } else {
        None
    }
}

fn metric_f64(v: Option<f32>) -> Option<f64> {
    v.map(f64::from).filter(|f| f.is_finite())
}

impl From<mesh_proto::MapReport> for MapReportEvent {
    fn from(report: mesh_proto::MapReport) -> Self {
        Self {
            long_name: non_empty(report.long_name),
            short_name: non_empty(report.short_name),
            role: mesh_proto::role_name(report.role).map(String::from),
            hw_model: mesh_proto::hw_model_name(report.hw_model).map(String::from),
            firmware_version: non_empty(report.firmware_version),
            region: mesh_proto::region_name(report.region).map(String::from),
            modem_preset: mesh_proto::modem_preset_name(report.modem_preset).map(String::from),
            has_default_channel: report.has_default_channel.then_some(true),
            latitude_i: (report.latitude_i != 0).then_some(report.latitude_i),
            longitude_i: (report.longitude_i != 0).then_some(report.longitude_i),
            altitude: (report.altitude != 0).then_some(report.altitude),
            position_precision: non_zero_u32(report.position_precision),
            num_online_local_nodes: non_zero_u32(report.num_online_local_nodes),
        }
    }
}

impl From<mesh_proto::User> for NodeInfoEvent {
    fn from(user: mesh_proto::User) -> Self {
        Self {
            id: non_empty(user.id),
            long_name: non_empty(user.long_name),
            short_name: non_empty(user.short_name),
            hw_model: mesh_proto::hw_model_name(user.hw_model).map(String::from),
            is_licensed: user.is_licensed.then_some(true),
            role: mesh_proto::role_name(user.role).map(String::from),
        }
    }
}

impl From<mesh_proto::Position> for PositionEvent {
    fn from(position: mesh_proto::Position) -> Self {
        Self {
            latitude_i: position.latitude_i,
            longitude_i: position.longitude_i,
            altitude: position.altitude,
            precision_bits: non_zero_u32(position.precision_bits),
            sats_in_view: non_zero_u32(position.sats_in_view),
        }
    }
}

impl From<mesh_proto::NeighborInfo> for NeighborInfoEvent {
    fn from(info: mesh_proto::NeighborInfo) -> Self {
        Self {
            node_id: non_zero_u32(info.node_id).map(i64::from),
            last_sent_by_id: non_zero_u32(info.last_sent_by_id).map(i64::from),
            node_broadcast_interval_secs: non_zero_u32(info.node_broadcast_interval_secs)
                .map(|v| v as i32),
            neighbors: info
                .neighbors
                .into_iter()
                .filter(|n| n.node_id != 0)
                .map(|n| NeighborEntry {
                    node_id: i64::from(n.node_id),
                    snr: finite_f64(n.snr),
                })
                .collect(),
        }
    }
}

impl From<mesh_proto::Telemetry> for TelemetryEvent {
    fn from(telemetry: mesh_proto::Telemetry) -> Self {
        let mut event = Self {
            time: (telemetry.time != 0).then_some(i64::from(telemetry.time)),
            ..Self::default()
        };
        use mesh_proto::telemetry::Variant;
        match telemetry.variant {
            Some(Variant::DeviceMetrics(m)) => {
                event.device_metrics = Some(DeviceMetricsEvent {
                    battery_level: m.battery_level.map(i64::from),
                    voltage: metric_f64(m.voltage),
                    channel_utilization: metric_f64(m.channel_utilization),
                    air_util_tx: metric_f64(m.air_util_tx),
                    uptime_seconds: m.uptime_seconds.map(i64::from),
                });
            }
            Some(Variant::EnvironmentMetrics(m)) => {
                event.environment_metrics = Some(EnvironmentMetricsEvent {
                    temperature: metric_f64(m.temperature),
                    relative_humidity: metric_f64(m.relative_humidity),
                    barometric_pressure: metric_f64(m.barometric_pressure),
                    gas_resistance: metric_f64(m.gas_resistance),
                    voltage: metric_f64(m.voltage),
                    current: metric_f64(m.current),
                    iaq: m.iaq.map(i64::from),
                    distance: metric_f64(m.distance),
                    lux: metric_f64(m.lux),
                    white_lux: metric_f64(m.white_lux),
                    ir_lux: metric_f64(m.ir_lux),
                    uv_lux: metric_f64(m.uv_lux),
                    wind_direction: m.wind_direction.map(i64::from),
                    wind_speed: metric_f64(m.wind_speed),
                    weight: metric_f64(m.weight),
                    wind_gust: metric_f64(m.wind_gust),
                    wind_lull: metric_f64(m.wind_lull),
                });
            }
            Some(Variant::AirQualityMetrics(m)) => {
                event.air_quality_metrics = Some(AirQualityMetricsEvent {
                    pm10_standard: m.pm10_standard.map(i64::from),
                    pm25_standard: m.pm25_standard.map(i64::from),
                    pm100_standard: m.pm100_standard.map(i64::from),
                    pm10_environmental: m.pm10_environmental.map(i64::from),
                    pm25_environmental: m.pm25_environmental.map(i64::from),
                    pm100_environmental: m.pm100_environmental.map(i64::from),
                    particles_03um: m.particles_03um.map(i64::from),
                    particles_05um: m.particles_05um.map(i64::from),
                    particles_10um: m.particles_10um.map(i64::from),
                    particles_25um: m.particles_25um.map(i64::from),
                    particles_50um: m.particles_50um.map(i64::from),
                    particles_100um: m.particles_100um.map(i64::from),
                });
            }
            Some(Variant::PowerMetrics(m)) => {
                event.power_metrics = Some(PowerMetricsEvent {
                    ch1_voltage: metric_f64(m.ch1_voltage),
                    ch1_current: metric_f64(m.ch1_current),
                    ch2_voltage: metric_f64(m.ch2_voltage),
                    ch2_current: metric_f64(m.ch2_current),
                    ch3_voltage: metric_f64(m.ch3_voltage),
                    ch3_current: metric_f64(m.ch3_current),
                });
            }
            None => {}
        }
        event
    }
}

// ── JSON topic family ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    #[serde(default)]
    id: u32,
    from: u32,
    #[serde(default)]
    to: u32,
    #[serde(default)]
    channel: u32,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

// ── Codec ─────────────────────────────────────────────────────────────────────

pub struct FrameCodec {
    /// Channel name → base64 AES key.
    channel_keys: HashMap<String, String>,
}

impl FrameCodec {
    pub fn new(channels: &[ChannelKey]) -> Self {
        Self {
            channel_keys: channels
                .iter()
                .map(|c| (c.name.clone(), c.key.clone()))
                .collect(),
        }
    }

    /// Decode one MQTT message. `None` means the message was classified out
    /// or failed to decode; reasons are logged at the appropriate level.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Option<MeshEvent> {
        if topic.contains('#') {
            warn!("ignoring invalid topic with #: {topic}");
            return None;
        }
        if topic.contains("/2/stat/") {
            // Deprecated since firmware 2.4.1.
            return None;
        }
        if topic.contains("/2/json/") {
            return self.decode_json(topic, payload);
        }
        if topic.contains("/2/e/") || topic.contains("/2/map") {
            return self.decode_envelope(topic, payload);
        }
        None
    }

    fn decode_envelope(&self, topic: &str, payload: &[u8]) -> Option<MeshEvent> {
        let envelope = match mesh_proto::ServiceEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!("undecodable service envelope on {topic}: {err}");
                return None;
            }
        };
        let packet = match envelope.packet {
            Some(packet) => packet,
            None => {
                debug!("service envelope without packet on {topic}");
                return None;
            }
        };

        let data = match packet.payload_variant.clone() {
            Some(mesh_proto::mesh_packet::PayloadVariant::Decoded(data)) => Some(data),
            Some(mesh_proto::mesh_packet::PayloadVariant::Encrypted(ciphertext)) => {
                Some(self.decrypt(topic, packet.id, packet.from, &ciphertext)?)
            }
            None => None,
        };

        let payload = match data {
            None => EventPayload::Unknown("unknown(0)".into()),
            Some(data) => self.dispatch_portnum(topic, data)?,
        };

        Some(MeshEvent {
            packet_id: packet.id,
            from: i64::from(packet.from),
            to: i64::from(packet.to),
            channel: packet.channel,
            sender_hex: format!("!{}", mesh::node_id_to_hex(i64::from(packet.from))),
            timestamp: (packet.rx_time != 0)
                .then(|| DateTime::from_timestamp(i64::from(packet.rx_time), 0))
                .flatten(),
            topic: topic.to_string(),
            payload,
        })
    }

    fn dispatch_portnum(&self, topic: &str, data: mesh_proto::Data) -> Option<EventPayload> {
        use mesh_proto::PortNum;
        let bytes = data.payload.as_slice();
        let decoded = match PortNum::try_from(data.portnum) {
            Ok(PortNum::MapReportApp) => mesh_proto::MapReport::decode(bytes)
                .map(|m| EventPayload::MapReport(m.into())),
            Ok(PortNum::NeighborinfoApp) => mesh_proto::NeighborInfo::decode(bytes)
                .map(|m| EventPayload::NeighborInfo(m.into())),
            Ok(PortNum::NodeinfoApp) => {
                mesh_proto::User::decode(bytes).map(|m| EventPayload::NodeInfo(m.into()))
            }
            Ok(PortNum::PositionApp) => {
                mesh_proto::Position::decode(bytes).map(|m| EventPayload::Position(m.into()))
            }
            Ok(PortNum::TelemetryApp) => {
                mesh_proto::Telemetry::decode(bytes).map(|m| EventPayload::Telemetry(m.into()))
            }
            _ => return Some(EventPayload::Unknown(format!("unknown({})", data.portnum))),
        };
        match decoded {
            Ok(payload) => Some(payload),
            Err(err) => {
                error!("undecodable portnum {} payload on {topic}: {err}", data.portnum);
                None
            }
        }
    }

    /// AES-CTR decrypt of a MeshPacket payload. Nonce is the packet id and
    /// sender id, both little-endian u64. All failures drop the packet
    /// silently at debug level.
    fn decrypt(
        &self,
        topic: &str,
        packet_id: u32,
        from: u32,
        ciphertext: &[u8],
    ) -> Option<mesh_proto::Data> {
        let channel = match mesh::channel_from_topic(topic) {
            Some(channel) => channel,
            None => {
                debug!("cannot take channel from topic {topic}");
                return None;
            }
        };
        let key_b64 = match self.channel_keys.get(channel) {
            Some(key) => key.as_str(),
            None => {
                debug!("no key for channel '{channel}', trying the default key");
                DEFAULT_CHANNEL_KEY
            }
        };
        let key = match BASE64.decode(key_b64) {
            Ok(key) => key,
            Err(err) => {
                debug!("bad base64 key for channel '{channel}': {err}");
                return None;
            }
        };

        let mut nonce = [0u8; 16];
        nonce[..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
        nonce[8..].copy_from_slice(&u64::from(from).to_le_bytes());

        let mut buffer = ciphertext.to_vec();
        let applied = match key.len() {
            16 => Aes128Ctr::new_from_slices(&key, &nonce)
                .map(|mut cipher| cipher.apply_keystream(&mut buffer)),
            32 => Aes256Ctr::new_from_slices(&key, &nonce)
                .map(|mut cipher| cipher.apply_keystream(&mut buffer)),
            n => {
                debug!("unsupported key length {n} for channel '{channel}'");
                return None;
            }
        };
        if applied.is_err() {
            debug!("cipher setup failed for channel '{channel}'");
            return None;
        }

        match mesh_proto::Data::decode(buffer.as_slice()) {
            Ok(data) => Some(data),
            Err(err) => {
                debug!("decrypt failed on {topic}: {err}");
                None
            }
        }
    }

    fn decode_json(&self, topic: &str, payload: &[u8]) -> Option<MeshEvent> {
        let envelope: JsonEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!("failed to decode json payload on {topic}: {err}");
                return None;
            }
        };

        let payload = match envelope.kind.as_str() {
            // The firmware's JSON nodeinfo carries free-form names whose
            // charset has corrupted rows before; only id, hardware and role
            // are carried through, normalized to protobuf field names.
            "nodeinfo" => {
                let object = envelope.payload.as_object()?;
                let id = match object.get("id").and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => {
                        error!("json nodeinfo without id on {topic}");
                        return None;
                    }
                };
                EventPayload::NodeInfo(NodeInfoEvent {
                    id: Some(id),
                    long_name: None,
                    short_name: None,
                    hw_model: object
                        .get("hardware")
                        .and_then(Value::as_i64)
                        .and_then(|v| mesh_proto::hw_model_name(v as i32))
                        .map(String::from),
                    is_licensed: None,
                    role: object
                        .get("role")
                        .and_then(Value::as_i64)
                        .and_then(|v| mesh_proto::role_name(v as i32))
                        .map(String::from),
                })
            }
            "position" => match serde_json::from_value(envelope.payload) {
                Ok(position) => EventPayload::Position(position),
                Err(err) => {
                    error!("bad json position payload on {topic}: {err}");
                    return None;
                }
            },
            "telemetry" => match serde_json::from_value(envelope.payload) {
                Ok(telemetry) => EventPayload::Telemetry(telemetry),
                Err(err) => {
                    error!("bad json telemetry payload on {topic}: {err}");
                    return None;
                }
            },
            "neighborinfo" => match serde_json::from_value(envelope.payload) {
                Ok(info) => EventPayload::NeighborInfo(info),
                Err(err) => {
                    error!("bad json neighborinfo payload on {topic}: {err}");
                    return None;
                }
            },
            other => EventPayload::Unknown(other.to_string()),
        };

        Some(MeshEvent {
            packet_id: envelope.id,
            from: i64::from(envelope.from),
            to: i64::from(envelope.to),
            channel: envelope.channel,
            sender_hex: envelope
                .sender
                .unwrap_or_else(|| format!("!{}", mesh::node_id_to_hex(i64::from(envelope.from)))),
            timestamp: envelope
                .timestamp
                .filter(|&t| t != 0)
                .and_then(|t| DateTime::from_timestamp(t, 0)),
            topic: topic.to_string(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> FrameCodec {
        FrameCodec::new(&[])
    }

    fn encrypt(key_b64: &str, packet_id: u32, from: u32, plaintext: &[u8]) -> Vec<u8> {
        let key = BASE64.decode(key_b64).unwrap();
        let mut nonce = [0u8; 16];
        nonce[..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
        nonce[8..].copy_from_slice(&u64::from(from).to_le_bytes());
        let mut buffer = plaintext.to_vec();
        let mut cipher = Aes128Ctr::new_from_slices(&key, &nonce).unwrap();
        cipher.apply_keystream(&mut buffer);
        buffer
    }

    fn envelope_bytes(packet: mesh_proto::MeshPacket) -> Vec<u8> {
        mesh_proto::ServiceEnvelope {
            packet: Some(packet),
            channel_id: "MeshTW".into(),
            gateway_id: "!a1b2c3d4".into(),
        }
        .encode_to_vec()
    }

    #[test]
    fn wildcard_and_stat_topics_are_dropped() {
        let codec = codec();
        assert!(codec.decode("msh/TW/2/e/#", b"x").is_none());
        assert!(codec.decode("msh/TW/2/stat/!a1b2c3d4", b"x").is_none());
        assert!(codec.decode("msh/TW/1/c/other", b"x").is_none());
    }

    #[test]
    fn decodes_plaintext_nodeinfo_packet() {
        let user = mesh_proto::User {
            id: "!000000ff".into(),
            long_name: "Test node".into(),
            short_name: "TN".into(),
            hw_model: 43,
            is_licensed: false,
            role: 2,
        };
        let data = mesh_proto::Data {
            portnum: mesh_proto::PortNum::NodeinfoApp as i32,
            payload: user.encode_to_vec(),
            ..Default::default()
        };
        let packet = mesh_proto::MeshPacket {
            from: 0xff,
            to: 0xffffffff,
            id: 11,
            rx_time: 1_720_000_000,
            payload_variant: Some(mesh_proto::mesh_packet::PayloadVariant::Decoded(data)),
            ..Default::default()
        };
        let event = codec()
            .decode("msh/TW/2/e/MeshTW/!a1b2c3d4", &envelope_bytes(packet))
            .unwrap();
        assert_eq!(event.from, 0xff);
        assert_eq!(event.sender_hex, "!000000ff");
        assert!(event.timestamp.is_some());
        match event.payload {
            EventPayload::NodeInfo(info) => {
                assert_eq!(info.id.as_deref(), Some("!000000ff"));
                assert_eq!(info.long_name.as_deref(), Some("Test node"));
                assert_eq!(info.hw_model.as_deref(), Some("HELTEC_V3"));
                assert_eq!(info.role.as_deref(), Some("ROUTER"));
                assert_eq!(info.is_licensed, None);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn decrypts_with_default_key_when_channel_is_unlisted() {
        let position = mesh_proto::Position {
            latitude_i: Some(250_330_000),
            longitude_i: Some(1_215_654_000),
            time: 1_720_000_000,
            precision_bits: 32,
            ..Default::default()
        };
        let data = mesh_proto::Data {
            portnum: mesh_proto::PortNum::PositionApp as i32,
            payload: position.encode_to_vec(),
            ..Default::default()
        };
        let ciphertext = encrypt(DEFAULT_CHANNEL_KEY, 99, 0xa1b2c3d4, &data.encode_to_vec());
        let packet = mesh_proto::MeshPacket {
            from: 0xa1b2c3d4,
            id: 99,
            payload_variant: Some(mesh_proto::mesh_packet::PayloadVariant::Encrypted(ciphertext)),
            ..Default::default()
        };
        let event = codec()
            .decode("msh/TW/2/e/MeshTW/!a1b2c3d4", &envelope_bytes(packet))
            .unwrap();
        match event.payload {
            EventPayload::Position(p) => {
                assert_eq!(p.latitude_i, Some(250_330_000));
                assert_eq!(p.precision_bits, Some(32));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        // rx_time of zero means no sender timestamp.
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn undecryptable_packet_is_dropped_silently() {
        let packet = mesh_proto::MeshPacket {
            from: 0xa1b2c3d4,
            id: 3,
            payload_variant: Some(mesh_proto::mesh_packet::PayloadVariant::Encrypted(vec![
                0xde, 0xad, 0xbe, 0xef, 0x42, 0x42, 0x42, 0x42, 0x99,
            ])),
            ..Default::default()
        };
        assert!(codec()
            .decode("msh/TW/2/e/ch/!a1b2c3d4", &envelope_bytes(packet))
            .is_none());
    }

    #[test]
    fn unknown_portnum_yields_unknown_event() {
        let data = mesh_proto::Data {
            portnum: 1,
            payload: b"hello".to_vec(),
            ..Default::default()
        };
        let packet = mesh_proto::MeshPacket {
            from: 0x10,
            payload_variant: Some(mesh_proto::mesh_packet::PayloadVariant::Decoded(data)),
            ..Default::default()
        };
        let event = codec()
            .decode("msh/TW/2/e/MeshTW/!00000010", &envelope_bytes(packet))
            .unwrap();
        match event.payload {
            EventPayload::Unknown(kind) => assert_eq!(kind, "unknown(1)"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn json_nodeinfo_keeps_only_normalized_fields() {
        let message = json!({
            "from": 2_987_541_297u32,
            "id": 1234,
            "timestamp": 1_720_000_000,
            "type": "nodeinfo",
            "payload": {
                "id": "!b213b131",
                "longname": "My device",
                "shortname": "devs",
                "hardware": 43,
                "role": 2
            }
        });
        let event = codec()
            .decode("msh/TW/2/json/MeshTW/!b213b131", message.to_string().as_bytes())
            .unwrap();
        match event.payload {
            EventPayload::NodeInfo(info) => {
                assert_eq!(info.id.as_deref(), Some("!b213b131"));
                assert_eq!(info.hw_model.as_deref(), Some("HELTEC_V3"));
                assert_eq!(info.role.as_deref(), Some("ROUTER"));
                // Names are dropped on the JSON path.
                assert_eq!(info.long_name, None);
                assert_eq!(info.short_name, None);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn json_telemetry_coerces_nan_to_null() {
        let message = json!({
            "from": 16u32,
            "timestamp": 1_720_000_000,
            "type": "telemetry",
            "payload": {
                "time": 1_720_000_000,
                "environment_metrics": {
                    "temperature": "NaN",
                    "relative_humidity": 55.5
                }
            }
        });
        let event = codec()
            .decode("msh/TW/2/json/MeshTW/!00000010", message.to_string().as_bytes())
            .unwrap();
        match event.payload {
            EventPayload::Telemetry(t) => {
                let env = t.environment_metrics.unwrap();
                assert_eq!(env.temperature, None);
                assert_eq!(env.relative_humidity, Some(55.5));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn json_unknown_type_still_carries_the_sender() {
        let message = json!({
            "from": 77u32,
            "type": "text",
            "payload": "hi"
        });
        let event = codec()
            .decode("msh/TW/2/json/MeshTW/!0000004d", message.to_string().as_bytes())
            .unwrap();
        assert_eq!(event.from, 77);
        assert!(matches!(event.payload, EventPayload::Unknown(ref k) if k == "text"));
    }
}
