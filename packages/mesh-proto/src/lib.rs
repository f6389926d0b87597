//! # mesh-proto
//!
//! Hand-written prost definitions for the subset of the Meshtastic protobuf
//! schemas the gateway consumes off MQTT:
//!
//! - `ServiceEnvelope` / `MeshPacket` / `Data` — the `/2/e/` and `/2/map`
//!   topic families
//! - `User`, `Position`, `NeighborInfo`, `MapReport`, `Telemetry` — the
//!   application payloads dispatched by portnum
//!
//! Field tags match the published schemas
//! (<https://github.com/meshtastic/protobufs>); fields the gateway does not
//! model are simply skipped by prost during decode. Enum helpers expose the
//! proto screaming-snake names so payloads can be normalized to the same
//! strings the JSON topic family carries.

/// MQTT wrapper around a single mesh packet, published by gateway nodes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceEnvelope {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<MeshPacket>,
    /// Global channel name the packet was heard on (e.g. "LongFast").
    #[prost(string, tag = "3")]
    pub channel_id: String,
    /// `!hex` id of the gateway node that uplinked the packet.
    #[prost(string, tag = "4")]
    pub gateway_id: String,
}

/// One radio packet. Either carries a `decoded` Data message in plaintext or
/// an `encrypted` blob (AES-CTR, keyed per channel).
#[derive(Clone, PartialEq, prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: Option<mesh_packet::PayloadVariant>,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    /// Seconds since epoch when the uplinking node heard the packet.
    /// Zero when the node has no wall clock.
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(int32, tag = "12")]
    pub rx_rssi: i32,
    #[prost(bool, tag = "14")]
    pub via_mqtt: bool,
    #[prost(uint32, tag = "15")]
    pub hop_start: u32,
}

pub mod mesh_packet {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        #[prost(bytes, tag = "5")]
        Encrypted(Vec<u8>),
    }
}

/// Decoded application payload: portnum selects the schema of `payload`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Data {
    #[prost(enumeration = "PortNum", tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
    #[prost(fixed32, tag = "7")]
    pub reply_id: u32,
    #[prost(fixed32, tag = "8")]
    pub emoji: u32,
}

/// NODEINFO_APP payload — node identity broadcast.
#[derive(Clone, PartialEq, prost::Message)]
pub struct User {
    /// `!hex` form of the node id.
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub long_name: String,
    #[prost(string, tag = "3")]
    pub short_name: String,
    #[prost(enumeration = "HardwareModel", tag = "5")]
    pub hw_model: i32,
    #[prost(bool, tag = "6")]
    pub is_licensed: bool,
    #[prost(enumeration = "Role", tag = "7")]
    pub role: i32,
}

/// POSITION_APP payload. Coordinates are degrees * 1e7.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Position {
    #[prost(sfixed32, optional, tag = "1")]
    pub latitude_i: Option<i32>,
    #[prost(sfixed32, optional, tag = "2")]
    pub longitude_i: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub altitude: Option<i32>,
    #[prost(fixed32, tag = "4")]
    pub time: u32,
    #[prost(uint32, tag = "19")]
    pub sats_in_view: u32,
    /// Number of coordinate bits the sender chose to reveal (32 = exact).
    #[prost(uint32, tag = "23")]
    pub precision_bits: u32,
}

/// NEIGHBORINFO_APP payload — one node's view of its direct RF neighbors.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NeighborInfo {
    #[prost(uint32, tag = "1")]
    pub node_id: u32,
    #[prost(uint32, tag = "2")]
    pub last_sent_by_id: u32,
    #[prost(uint32, tag = "3")]
    pub node_broadcast_interval_secs: u32,
    #[prost(message, repeated, tag = "4")]
    pub neighbors: Vec<Neighbor>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Neighbor {
    #[prost(uint32, tag = "1")]
    pub node_id: u32,
    #[prost(float, tag = "2")]
    pub snr: f32,
}

/// MAP_REPORT_APP payload — periodic self-report for public map services.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MapReport {
    #[prost(string, tag = "1")]
    pub long_name: String,
    #[prost(string, tag = "2")]
    pub short_name: String,
    #[prost(enumeration = "Role", tag = "3")]
    pub role: i32,
    #[prost(enumeration = "HardwareModel", tag = "4")]
    pub hw_model: i32,
    #[prost(string, tag = "5")]
    pub firmware_version: String,
    #[prost(enumeration = "RegionCode", tag = "6")]
    pub region: i32,
    #[prost(enumeration = "ModemPreset", tag = "7")]
    pub modem_preset: i32,
    #[prost(bool, tag = "8")]
    pub has_default_channel: bool,
    #[prost(sfixed32, tag = "9")]
    pub latitude_i: i32,
    #[prost(sfixed32, tag = "10")]
    pub longitude_i: i32,
    #[prost(int32, tag = "11")]
    pub altitude: i32,
    #[prost(uint32, tag = "12")]
    pub position_precision: u32,
    #[prost(uint32, tag = "13")]
    pub num_online_local_nodes: u32,
}

/// TELEMETRY_APP payload. Exactly one metric block is set per packet.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Telemetry {
    /// Seconds since epoch, stamped by the sender.
    #[prost(fixed32, tag = "1")]
    pub time: u32,
    #[prost(oneof = "telemetry::Variant", tags = "2, 3, 4, 5")]
    pub variant: Option<telemetry::Variant>,
}

pub mod telemetry {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "2")]
        DeviceMetrics(super::DeviceMetrics),
        #[prost(message, tag = "3")]
        EnvironmentMetrics(super::EnvironmentMetrics),
        #[prost(message, tag = "4")]
        AirQualityMetrics(super::AirQualityMetrics),
        #[prost(message, tag = "5")]
        PowerMetrics(super::PowerMetrics),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceMetrics {
    #[prost(uint32, optional, tag = "1")]
    pub battery_level: Option<u32>,
    #[prost(float, optional, tag = "2")]
    pub voltage: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub channel_utilization: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub air_util_tx: Option<f32>,
    #[prost(uint32, optional, tag = "5")]
    pub uptime_seconds: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnvironmentMetrics {
    #[prost(float, optional, tag = "1")]
    pub temperature: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub relative_humidity: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub barometric_pressure: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub gas_resistance: Option<f32>,
    #[prost(float, optional, tag = "5")]
    pub voltage: Option<f32>,
    #[prost(float, optional, tag = "6")]
    pub current: Option<f32>,
    #[prost(uint32, optional, tag = "7")]
    pub iaq: Option<u32>,
    #[prost(float, optional, tag = "8")]
    pub distance: Option<f32>,
    #[prost(float, optional, tag = "9")]
    pub lux: Option<f32>,
    #[prost(float, optional, tag = "10")]
    pub white_lux: Option<f32>,
    #[prost(float, optional, tag = "11")]
    pub ir_lux: Option<f32>,
    #[prost(float, optional, tag = "12")]
    pub uv_lux: Option<f32>,
    #[prost(uint32, optional, tag = "13")]
    pub wind_direction: Option<u32>,
    #[prost(float, optional, tag = "14")]
    pub wind_speed: Option<f32>,
    #[prost(float, optional, tag = "15")]
    pub weight: Option<f32>,
    #[prost(float, optional, tag = "16")]
    pub wind_gust: Option<f32>,
    #[prost(float, optional, tag = "17")]
    pub wind_lull: Option<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AirQualityMetrics {
    #[prost(uint32, optional, tag = "1")]
    pub pm10_standard: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub pm25_standard: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub pm100_standard: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub pm10_environmental: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub pm25_environmental: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub pm100_environmental: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub particles_03um: Option<u32>,
    #[prost(uint32, optional, tag = "8")]
    pub particles_05um: Option<u32>,
    #[prost(uint32, optional, tag = "9")]
    pub particles_10um: Option<u32>,
    #[prost(uint32, optional, tag = "10")]
    pub particles_25um: Option<u32>,
    #[prost(uint32, optional, tag = "11")]
    pub particles_50um: Option<u32>,
    #[prost(uint32, optional, tag = "12")]
    pub particles_100um: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PowerMetrics {
    #[prost(float, optional, tag = "1")]
    pub ch1_voltage: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub ch1_current: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub ch2_voltage: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub ch2_current: Option<f32>,
    #[prost(float, optional, tag = "5")]
    pub ch3_voltage: Option<f32>,
    #[prost(float, optional, tag = "6")]
    pub ch3_current: Option<f32>,
}

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Application port of a decoded Data message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    UnknownApp = 0,
    TextMessageApp = 1,
    RemoteHardwareApp = 2,
    PositionApp = 3,
    NodeinfoApp = 4,
    RoutingApp = 5,
    AdminApp = 6,
    TextMessageCompressedApp = 7,
    WaypointApp = 8,
    AudioApp = 9,
    DetectionSensorApp = 10,
    AlertApp = 11,
    ReplyApp = 32,
    IpTunnelApp = 33,
    PaxcounterApp = 34,
    SerialApp = 64,
    StoreForwardApp = 65,
    RangeTestApp = 66,
    TelemetryApp = 67,
    ZpsApp = 68,
    SimulatorApp = 69,
    TracerouteApp = 70,
    NeighborinfoApp = 71,
    AtakPlugin = 72,
    MapReportApp = 73,
    PowerstressApp = 74,
    PrivateApp = 256,
    AtakForwarder = 257,
    Max = 511,
}

/// Device role (Config.DeviceConfig.Role).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum Role {
    Client = 0,
    ClientMute = 1,
    Router = 2,
    RouterClient = 3,
    Repeater = 4,
    Tracker = 5,
    Sensor = 6,
    Tak = 7,
    ClientHidden = 8,
    LostAndFound = 9,
    TakTracker = 10,
    RouterLate = 11,
}

impl Role {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::ClientMute => "CLIENT_MUTE",
            Role::Router => "ROUTER",
            Role::RouterClient => "ROUTER_CLIENT",
            Role::Repeater => "REPEATER",
            Role::Tracker => "TRACKER",
            Role::Sensor => "SENSOR",
            Role::Tak => "TAK",
            Role::ClientHidden => "CLIENT_HIDDEN",
            Role::LostAndFound => "LOST_AND_FOUND",
            Role::TakTracker => "TAK_TRACKER",
            Role::RouterLate => "ROUTER_LATE",
        }
    }
}

/// LoRa regulatory region (Config.LoRaConfig.RegionCode).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum RegionCode {
    Unset = 0,
    Us = 1,
    Eu433 = 2,
    Eu868 = 3,
    Cn = 4,
    Jp = 5,
    Anz = 6,
    Kr = 7,
    Tw = 8,
    Ru = 9,
    In = 10,
    Nz865 = 11,
    Th = 12,
    Lora24 = 13,
    Ua433 = 14,
    Ua868 = 15,
    My433 = 16,
    My919 = 17,
    Sg923 = 18,
    Ph433 = 19,
    Ph868 = 20,
    Ph915 = 21,
    Anz433 = 22,
}

impl RegionCode {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            RegionCode::Unset => "UNSET",
            RegionCode::Us => "US",
            RegionCode::Eu433 => "EU_433",
            RegionCode::Eu868 => "EU_868",
            RegionCode::Cn => "CN",
            RegionCode::Jp => "JP",
            RegionCode::Anz => "ANZ",
            RegionCode::Kr => "KR",
            RegionCode::Tw => "TW",
            RegionCode::Ru => "RU",
            RegionCode::In => "IN",
            RegionCode::Nz865 => "NZ_865",
            RegionCode::Th => "TH",
            RegionCode::Lora24 => "LORA_24",
            RegionCode::Ua433 => "UA_433",
            RegionCode::Ua868 => "UA_868",
            RegionCode::My433 => "MY_433",
            RegionCode::My919 => "MY_919",
            RegionCode::Sg923 => "SG_923",
            RegionCode::Ph433 => "PH_433",
            RegionCode::Ph868 => "PH_868",
            RegionCode::Ph915 => "PH_915",
            RegionCode::Anz433 => "ANZ_433",
        }
    }
}

/// LoRa modem preset (Config.LoRaConfig.ModemPreset).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum ModemPreset {
    LongFast = 0,
    LongSlow = 1,
    VeryLongSlow = 2,
    MediumSlow = 3,
    MediumFast = 4,
    ShortSlow = 5,
    ShortFast = 6,
    LongModerate = 7,
    ShortTurbo = 8,
}

impl ModemPreset {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ModemPreset::LongFast => "LONG_FAST",
            ModemPreset::LongSlow => "LONG_SLOW",
            ModemPreset::VeryLongSlow => "VERY_LONG_SLOW",
            ModemPreset::MediumSlow => "MEDIUM_SLOW",
            ModemPreset::MediumFast => "MEDIUM_FAST",
            ModemPreset::ShortSlow => "SHORT_SLOW",
            ModemPreset::ShortFast => "SHORT_FAST",
            ModemPreset::LongModerate => "LONG_MODERATE",
            ModemPreset::ShortTurbo => "SHORT_TURBO",
        }
    }
}

/// Hardware model of a node. The long tail of boards changes every firmware
/// release; unknown values simply normalize to no name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum HardwareModel {
    Unset = 0,
    TloraV2 = 1,
    TloraV1 = 2,
    TloraV211p6 = 3,
    Tbeam = 4,
    HeltecV20 = 5,
    TbeamV0p7 = 6,
    TEcho = 7,
    TloraV11p3 = 8,
    Rak4631 = 9,
    HeltecV21 = 10,
    HeltecV1 = 11,
    LilygoTbeamS3Core = 12,
    Rak11200 = 13,
    NanoG1 = 14,
    TloraV211p8 = 15,
    TloraT3S3 = 16,
    NanoG1Explorer = 17,
    NanoG2Ultra = 18,
    LoraType = 19,
    Wiphone = 20,
    WioWm1110 = 21,
    Rak2560 = 22,
    HeltecHru3601 = 23,
    HeltecWirelessBridge = 24,
    StationG1 = 25,
    Rak11310 = 26,
    SenseloraRp2040 = 27,
    SenseloraS3 = 28,
    Canaryone = 29,
    Rp2040Lora = 30,
    StationG2 = 31,
    LoraRelayV1 = 32,
    Nrf52840dk = 33,
    Ppr = 34,
    Genieblocks = 35,
    Nrf52Unknown = 36,
    Portduino = 37,
    AndroidSim = 38,
    DiyV1 = 39,
    Nrf52840Pca10059 = 40,
    DrDev = 41,
    M5stack = 42,
    HeltecV3 = 43,
    HeltecWslV3 = 44,
    Betafpv2400Tx = 45,
    Betafpv900NanoTx = 46,
    RpiPico = 47,
    HeltecWirelessTracker = 48,
    HeltecWirelessPaper = 49,
    TDeck = 50,
    TWatchS3 = 51,
    PicomputerS3 = 52,
    HeltecHt62 = 53,
    EbyteEsp32S3 = 54,
    Esp32S3Pico = 55,
    Chatter2 = 56,
    HeltecWirelessPaperV10 = 57,
    HeltecWirelessTrackerV10 = 58,
    Unphone = 59,
    TdLorac = 60,
    CdebyteEoraS3 = 61,
    TwcMeshV4 = 62,
    Nrf52PromicroDiy = 63,
    Radiomaster900BanditNano = 64,
    HeltecCapsuleSensorV3 = 65,
    HeltecVisionMasterT190 = 66,
    HeltecVisionMasterE213 = 67,
    HeltecVisionMasterE290 = 68,
    HeltecMeshNodeT114 = 69,
    SensecapIndicator = 70,
    TrackerT1000E = 71,
    Rak3172 = 72,
    WioE5 = 73,
    Radiomaster900Bandit = 74,
    PrivateHw = 255,
}

impl HardwareModel {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            HardwareModel::Unset => "UNSET",
            HardwareModel::TloraV2 => "TLORA_V2",
            HardwareModel::TloraV1 => "TLORA_V1",
            HardwareModel::TloraV211p6 => "TLORA_V2_1_1P6",
            HardwareModel::Tbeam => "TBEAM",
            HardwareModel::HeltecV20 => "HELTEC_V2_0",
            HardwareModel::TbeamV0p7 => "TBEAM_V0P7",
            HardwareModel::TEcho => "T_ECHO",
            HardwareModel::TloraV11p3 => "TLORA_V1_1P3",
            HardwareModel::Rak4631 => "RAK4631",
            HardwareModel::HeltecV21 => "HELTEC_V2_1",
            HardwareModel::HeltecV1 => "HELTEC_V1",
            HardwareModel::LilygoTbeamS3Core => "LILYGO_TBEAM_S3_CORE",
            HardwareModel::Rak11200 => "RAK11200",
            HardwareModel::NanoG1 => "NANO_G1",
            HardwareModel::TloraV211p8 => "TLORA_V2_1_1P8",
            HardwareModel::TloraT3S3 => "TLORA_T3_S3",
            HardwareModel::NanoG1Explorer => "NANO_G1_EXPLORER",
            HardwareModel::NanoG2Ultra => "NANO_G2_ULTRA",
            HardwareModel::LoraType => "LORA_TYPE",
            HardwareModel::Wiphone => "WIPHONE",
            HardwareModel::WioWm1110 => "WIO_WM1110",
            HardwareModel::Rak2560 => "RAK2560",
            HardwareModel::HeltecHru3601 => "HELTEC_HRU_3601",
            HardwareModel::HeltecWirelessBridge => "HELTEC_WIRELESS_BRIDGE",
            HardwareModel::StationG1 => "STATION_G1",
            HardwareModel::Rak11310 => "RAK11310",
            HardwareModel::SenseloraRp2040 => "SENSELORA_RP2040",
            HardwareModel::SenseloraS3 => "SENSELORA_S3",
            HardwareModel::Canaryone => "CANARYONE",
            HardwareModel::Rp2040Lora => "RP2040_LORA",
            HardwareModel::StationG2 => "STATION_G2",
            HardwareModel::LoraRelayV1 => "LORA_RELAY_V1",
            HardwareModel::Nrf52840dk => "NRF52840DK",
            HardwareModel::Ppr => "PPR",
            HardwareModel::Genieblocks => "GENIEBLOCKS",
            HardwareModel::Nrf52Unknown => "NRF52_UNKNOWN",
            HardwareModel::Portduino => "PORTDUINO",
            HardwareModel::AndroidSim => "ANDROID_SIM",
            HardwareModel::DiyV1 => "DIY_V1",
            HardwareModel::Nrf52840Pca10059 => "NRF52840_PCA10059",
            HardwareModel::DrDev => "DR_DEV",
            HardwareModel::M5stack => "M5STACK",
            HardwareModel::HeltecV3 => "HELTEC_V3",
            HardwareModel::HeltecWslV3 => "HELTEC_WSL_V3",
            HardwareModel::Betafpv2400Tx => "BETAFPV_2400_TX",
            HardwareModel::Betafpv900NanoTx => "BETAFPV_900_NANO_TX",
            HardwareModel::RpiPico => "RPI_PICO",
            HardwareModel::HeltecWirelessTracker => "HELTEC_WIRELESS_TRACKER",
            HardwareModel::HeltecWirelessPaper => "HELTEC_WIRELESS_PAPER",
            HardwareModel::TDeck => "T_DECK",
            HardwareModel::TWatchS3 => "T_WATCH_S3",
            HardwareModel::PicomputerS3 => "PICOMPUTER_S3",
            HardwareModel::HeltecHt62 => "HELTEC_HT62",
            HardwareModel::EbyteEsp32S3 => "EBYTE_ESP32_S3",
            HardwareModel::Esp32S3Pico => "ESP32_S3_PICO",
            HardwareModel::Chatter2 => "CHATTER_2",
            HardwareModel::HeltecWirelessPaperV10 => "HELTEC_WIRELESS_PAPER_V1_0",
            HardwareModel::HeltecWirelessTrackerV10 => "HELTEC_WIRELESS_TRACKER_V1_0",
            HardwareModel::Unphone => "UNPHONE",
            HardwareModel::TdLorac => "TD_LORAC",
            HardwareModel::CdebyteEoraS3 => "CDEBYTE_EORA_S3",
            HardwareModel::TwcMeshV4 => "TWC_MESH_V4",
            HardwareModel::Nrf52PromicroDiy => "NRF52_PROMICRO_DIY",
            HardwareModel::Radiomaster900BanditNano => "RADIOMASTER_900_BANDIT_NANO",
            HardwareModel::HeltecCapsuleSensorV3 => "HELTEC_CAPSULE_SENSOR_V3",
            HardwareModel::HeltecVisionMasterT190 => "HELTEC_VISION_MASTER_T190",
            HardwareModel::HeltecVisionMasterE213 => "HELTEC_VISION_MASTER_E213",
            HardwareModel::HeltecVisionMasterE290 => "HELTEC_VISION_MASTER_E290",
            HardwareModel::HeltecMeshNodeT114 => "HELTEC_MESH_NODE_T114",
            HardwareModel::SensecapIndicator => "SENSECAP_INDICATOR",
            HardwareModel::TrackerT1000E => "TRACKER_T1000_E",
            HardwareModel::Rak3172 => "RAK3172",
            HardwareModel::WioE5 => "WIO_E5",
            HardwareModel::Radiomaster900Bandit => "RADIOMASTER_900_BANDIT",
            HardwareModel::PrivateHw => "PRIVATE_HW",
        }
    }
}

/// Proto-JSON style name for a role value: the screaming-snake name for known
/// non-default values, nothing for the default (0) or unknown values.
pub fn role_name(value: i32) -> Option<&'static str> {
    if value == 0 {
        return None;
    }
    Role::try_from(value).ok().map(|r| r.as_str_name())
}

/// Proto-JSON style name for a hardware model (see [`role_name`]).
pub fn hw_model_name(value: i32) -> Option<&'static str> {
    if value == 0 {
        return None;
    }
    HardwareModel::try_from(value).ok().map(|h| h.as_str_name())
}

/// Proto-JSON style name for a region code (see [`role_name`]).
pub fn region_name(value: i32) -> Option<&'static str> {
    if value == 0 {
        return None;
    }
    RegionCode::try_from(value).ok().map(|r| r.as_str_name())
}

/// Proto-JSON style name for a modem preset (see [`role_name`]).
pub fn modem_preset_name(value: i32) -> Option<&'static str> {
    if value == 0 {
        return None;
    }
    ModemPreset::try_from(value).ok().map(|m| m.as_str_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn portnum_round_trip() {
        assert_eq!(PortNum::try_from(73), Ok(PortNum::MapReportApp));
        assert_eq!(PortNum::try_from(71), Ok(PortNum::NeighborinfoApp));
        assert!(PortNum::try_from(500).is_err());
    }

    #[test]
    fn enum_names_follow_proto_json_semantics() {
        // Default (0) values are omitted by proto JSON, so they carry no name.
        assert_eq!(role_name(0), None);
        assert_eq!(modem_preset_name(0), None);
        assert_eq!(role_name(2), Some("ROUTER"));
        assert_eq!(hw_model_name(43), Some("HELTEC_V3"));
        assert_eq!(region_name(8), Some("TW"));
        assert_eq!(modem_preset_name(7), Some("LONG_MODERATE"));
        // Unknown discriminants normalize to no name rather than a number.
        assert_eq!(hw_model_name(9999), None);
    }

    #[test]
    fn mesh_packet_payload_variants_decode() {
        let packet = MeshPacket {
            from: 0xa1b2c3d4,
            to: 0xffffffff,
            id: 7,
            payload_variant: Some(mesh_packet::PayloadVariant::Encrypted(vec![1, 2, 3])),
            ..Default::default()
        };
        let envelope = ServiceEnvelope {
            packet: Some(packet.clone()),
            channel_id: "MeshTW".into(),
            gateway_id: "!a1b2c3d4".into(),
        };
        let bytes = envelope.encode_to_vec();
        let decoded = ServiceEnvelope::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.packet, Some(packet));
    }

    #[test]
    fn optional_metrics_default_to_none() {
        let metrics = DeviceMetrics::default();
        assert!(metrics.battery_level.is_none());
        assert!(metrics.voltage.is_none());
        let decoded = Telemetry::decode(&[][..]).unwrap();
        assert!(decoded.variant.is_none());
    }
}
