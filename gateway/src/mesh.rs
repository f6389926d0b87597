//! Mesh domain helpers: node id formatting, topic parsing, and the geometry
//! used by position fuzzing and the map distance gates.

use rand::Rng;

/// Earth radius in meters, as used by the great-circle distance gate.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Lowercase 8-hex form of a node id, without the `!` prefix.
pub fn node_id_to_hex(id: i64) -> String {
    hex::encode((id as u32).to_be_bytes())
}

/// Parse a node id from its hex form, with or without the `!` prefix.
pub fn node_hex_to_id(hex: &str) -> Option<i64> {
    let trimmed = hex.strip_prefix('!').unwrap_or(hex);
    u32::from_str_radix(trimmed, 16).ok().map(i64::from)
}

/// Channel name: the second-to-last topic segment.
pub fn channel_from_topic(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 2 {
        return None;
    }
    Some(parts[parts.len() - 2])
}

/// Root topic: the first two segments (e.g. `msh/TW`).
pub fn root_topic(topic: &str) -> Option<String> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => Some(format!("{a}/{b}")),
        _ => None,
    }
}

/// Reporter hex id: the last topic segment when non-empty.
pub fn reporter_from_topic(topic: &str) -> Option<&str> {
    topic.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Great-circle distance in meters (haversine).
pub fn distance_in_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Meter-equivalent blur radius of a coordinate truncated to `bits`
/// significant bits. 32 bits means the full sfixed32 coordinate, i.e. exact.
pub fn precision_to_meters(bits: u32) -> f64 {
    if bits >= 32 {
        return 0.0;
    }
    // Half the quantization step of a degrees*1e7 coordinate keeping `bits`
    // high bits, expressed in meters of latitude.
    (1u64 << (31 - bits)) as f64 * 1e-7 * METERS_PER_DEGREE
}

/// Displace a coordinate by a random offset of at most `radius_m` meters,
/// clamped to the valid lat/lon ranges.
pub fn blur_position(latitude: f64, longitude: f64, radius_m: f64) -> (f64, f64) {
    if radius_m <= 0.0 {
        return (latitude, longitude);
    }
    let mut rng = rand::thread_rng();
    let bearing: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    let distance: f64 = rng.gen_range(0.0..radius_m);
    let dlat = distance * bearing.cos() / METERS_PER_DEGREE;
    let cos_lat = latitude.to_radians().cos().abs().max(1e-6);
    let dlon = distance * bearing.sin() / (METERS_PER_DEGREE * cos_lat);
    (
        (latitude + dlat).clamp(-90.0, 90.0),
        (longitude + dlon).clamp(-180.0, 180.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        assert_eq!(node_id_to_hex(0xa1b2c3d4), "a1b2c3d4");
        assert_eq!(node_hex_to_id("!a1b2c3d4"), Some(0xa1b2c3d4));
        assert_eq!(node_hex_to_id("a1b2c3d4"), Some(0xa1b2c3d4));
        assert_eq!(node_hex_to_id("!zzzz"), None);
        // Small ids pad to eight digits.
        assert_eq!(node_id_to_hex(0x1f), "0000001f");
    }

    #[test]
    fn topic_segments() {
        let topic = "msh/TW/2/e/MeshTW/!a1b2c3d4";
        assert_eq!(channel_from_topic(topic), Some("MeshTW"));
        assert_eq!(root_topic(topic).as_deref(), Some("msh/TW"));
        assert_eq!(reporter_from_topic(topic), Some("!a1b2c3d4"));
        // Uplinks without a gateway id end with an empty segment.
        assert_eq!(reporter_from_topic("msh/TW/2/map/"), None);
    }

    #[test]
    fn haversine_scale() {
        // 0.001 degrees of longitude at the equator is ~111 m.
        let close = distance_in_meters(0.0, 0.0, 0.0, 0.001);
        assert!((close - 111.19).abs() < 1.0, "got {close}");
        // A full degree is ~111 km.
        let far = distance_in_meters(0.0, 0.0, 0.0, 1.0);
        assert!(far > 100_000.0 && far < 120_000.0, "got {far}");
    }

    #[test]
    fn precision_table_matches_firmware() {
        // Spot checks against the published precision table.
        assert!((precision_to_meters(13) - 2918.0).abs() < 10.0);
        assert!((precision_to_meters(15) - 729.0).abs() < 5.0);
        assert_eq!(precision_to_meters(32), 0.0);
    }

    #[test]
    fn blur_stays_within_radius() {
        let radius = precision_to_meters(13);
        for _ in 0..200 {
            let (lat, lon) = blur_position(25.0330, 121.5654, radius);
            let moved = distance_in_meters(25.0330, 121.5654, lat, lon);
            assert!(moved <= radius * 1.05, "moved {moved} > {radius}");
            assert!((-90.0..=90.0).contains(&lat));
            assert!((-180.0..=180.0).contains(&lon));
        }
    }
}
