//! PostgreSQL repository: node registry, conflict-resolving upserts, the
//! read queries behind the map/node/analysis services, and retention.
//!
//! Every upsert runs in its own transaction: the natural-key row is locked,
//! the monotonic merge is resolved in [`crate::model`], and the result lands
//! with `ON CONFLICT … DO UPDATE`. Errors roll the transaction back and
//! propagate once to the caller; the ingest pipeline logs and drops.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::mesh;
use crate::model::{
    AnalysisActiveHourly, DistributionItem, MonotonicMerge, NodeInfo, NodeNeighborEdge,
    NodeNeighborInfo, NodePosition, NodeTelemetryAirQuality, NodeTelemetryDevice,
    NodeTelemetryEnvironment, NodeTelemetryPower,
};

pub struct Repository {
    pool: PgPool,
    config: Arc<GatewayConfig>,
}

impl Repository {
    pub fn new(pool: PgPool, config: Arc<GatewayConfig>) -> Self {
        Self { pool, config }
    }

    fn position_horizon(&self) -> DateTime<Utc> {
        Utc::now() - TimeDelta::hours(self.config.meshtastic.position.max_query_period)
    }

    fn neighbor_horizon(&self) -> DateTime<Utc> {
        Utc::now() - TimeDelta::hours(self.config.meshtastic.neighborinfo.max_query_period)
    }

    // ── Node registry ─────────────────────────────────────────────────────────

    /// Create the node row if missing; otherwise keep the later of the
    /// stored and given `last_heard_at`.
    pub async fn ensure_node(
        &self,
        id: i64,
        heard_at: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO node (id, id_hex, last_heard_at) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE \
             SET last_heard_at = GREATEST(node.last_heard_at, EXCLUDED.last_heard_at)",
        )
        .bind(id)
        .bind(mesh::node_id_to_hex(id))
        .bind(heard_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark the node as heard right now.
    pub async fn touch_node(&self, id: i64) -> Result<(), GatewayError> {
        sqlx::query("UPDATE node SET last_heard_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Upserts ───────────────────────────────────────────────────────────────

    pub async fn upsert_node_info(&self, incoming: NodeInfo) -> Result<NodeInfo, GatewayError> {
        self.ensure_node(incoming.node_id, Some(incoming.update_at)).await?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, NodeInfo>(
            "SELECT * FROM node_info WHERE node_id = $1 FOR UPDATE",
        )
        .bind(incoming.node_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(stored) = &existing {
            if incoming.update_at < stored.update_at {
                return Ok(stored.clone());
            }
        }
        let merged = NodeInfo::apply(existing.as_ref(), incoming);

        sqlx::query(
            "INSERT INTO node_info (node_id, long_name, short_name, hw_model, is_licensed, \
             role, firmware_version, lora_region, lora_modem_preset, has_default_channel, \
             num_online_local_nodes, update_at, topic) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (node_id) DO UPDATE SET \
             long_name = EXCLUDED.long_name, short_name = EXCLUDED.short_name, \
             hw_model = EXCLUDED.hw_model, is_licensed = EXCLUDED.is_licensed, \
             role = EXCLUDED.role, firmware_version = EXCLUDED.firmware_version, \
             lora_region = EXCLUDED.lora_region, lora_modem_preset = EXCLUDED.lora_modem_preset, \
             has_default_channel = EXCLUDED.has_default_channel, \
             num_online_local_nodes = EXCLUDED.num_online_local_nodes, \
             update_at = EXCLUDED.update_at, topic = EXCLUDED.topic",
        )
        .bind(merged.node_id)
        .bind(&merged.long_name)
        .bind(&merged.short_name)
        .bind(&merged.hw_model)
        .bind(merged.is_licensed)
        .bind(&merged.role)
        .bind(&merged.firmware_version)
        .bind(&merged.lora_region)
        .bind(&merged.lora_modem_preset)
        .bind(merged.has_default_channel)
        .bind(merged.num_online_local_nodes)
        .bind(merged.update_at)
        .bind(&merged.topic)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    /// Positions are fuzzed to the configured precision cap before they are
    /// compared or stored.
    pub async fn upsert_node_position(
        &self,
        mut incoming: NodePosition,
    ) -> Result<NodePosition, GatewayError> {
        incoming.fuzz_to_max_precision(self.config.meshtastic.position.max_precision_bits);
        self.ensure_node(incoming.node_id, Some(incoming.update_at)).await?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, NodePosition>(
            "SELECT * FROM node_position \
             WHERE node_id = $1 AND create_at = $2 AND topic = $3 FOR UPDATE",
        )
        .bind(incoming.node_id)
        .bind(incoming.create_at)
        .bind(&incoming.topic)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(stored) = &existing {
            if incoming.update_at < stored.update_at {
                return Ok(stored.clone());
            }
        }
        let merged = NodePosition::apply(existing.as_ref(), incoming);

        sqlx::query(
            "INSERT INTO node_position (node_id, latitude, longitude, altitude, precision_bits, \
             sats_in_view, create_at, update_at, topic) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (node_id, create_at, topic) DO UPDATE SET \
             latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude, \
             altitude = EXCLUDED.altitude, precision_bits = EXCLUDED.precision_bits, \
             sats_in_view = EXCLUDED.sats_in_view, update_at = EXCLUDED.update_at",
        )
        .bind(merged.node_id)
        .bind(merged.latitude)
        .bind(merged.longitude)
        .bind(merged.altitude)
        .bind(merged.precision_bits)
        .bind(merged.sats_in_view)
        .bind(merged.create_at)
        .bind(merged.update_at)
        .bind(&merged.topic)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    pub async fn upsert_node_neighbor_info(
        &self,
        incoming: NodeNeighborInfo,
    ) -> Result<NodeNeighborInfo, GatewayError> {
        self.ensure_node(incoming.node_id, Some(incoming.update_at)).await?;
        if let Some(sender) = incoming.last_sent_by_id {
            self.ensure_node(sender, Some(incoming.update_at)).await?;
        }

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, NodeNeighborInfo>(
            "SELECT * FROM node_neighbor_info WHERE node_id = $1 FOR UPDATE",
        )
        .bind(incoming.node_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(stored) = &existing {
            if incoming.update_at < stored.update_at {
                return Ok(stored.clone());
            }
        }
        let merged = NodeNeighborInfo::apply(existing.as_ref(), incoming);

        sqlx::query(
            "INSERT INTO node_neighbor_info (node_id, last_sent_by_id, \
             node_broadcast_interval_secs, update_at, topic) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (node_id) DO UPDATE SET \
             last_sent_by_id = EXCLUDED.last_sent_by_id, \
             node_broadcast_interval_secs = EXCLUDED.node_broadcast_interval_secs, \
             update_at = EXCLUDED.update_at, topic = EXCLUDED.topic",
        )
        .bind(merged.node_id)
        .bind(merged.last_sent_by_id)
        .bind(merged.node_broadcast_interval_secs)
        .bind(merged.update_at)
        .bind(&merged.topic)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    /// Replace the node's neighbor edge set wholesale. Called only with a
    /// non-empty set: an empty neighbor report leaves existing edges intact.
    pub async fn replace_neighbor_edges(
        &self,
        node_id: i64,
        edges: &[NodeNeighborEdge],
    ) -> Result<(), GatewayError> {
        for edge in edges {
            self.ensure_node(edge.edge_node_id, None).await?;
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM node_neighbor_edge WHERE node_id = $1")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
        for edge in edges {
            sqlx::query(
                "INSERT INTO node_neighbor_edge (node_id, edge_node_id, snr) VALUES ($1, $2, $3)",
            )
            .bind(node_id)
            .bind(edge.edge_node_id)
            .bind(edge.snr)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_telemetry_device(
        &self,
        incoming: NodeTelemetryDevice,
    ) -> Result<NodeTelemetryDevice, GatewayError> {
        self.ensure_node(incoming.node_id, Some(incoming.update_at)).await?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, NodeTelemetryDevice>(
            "SELECT * FROM node_telemetry_device \
             WHERE node_id = $1 AND create_at = $2 FOR UPDATE",
        )
        .bind(incoming.node_id)
        .bind(incoming.create_at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(stored) = &existing {
            if incoming.update_at < stored.update_at {
                return Ok(stored.clone());
            }
        }
        let merged = NodeTelemetryDevice::apply(existing.as_ref(), incoming);

        sqlx::query(
            "INSERT INTO node_telemetry_device (node_id, battery_level, voltage, \
             channel_utilization, air_util_tx, uptime_seconds, create_at, update_at, topic) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (node_id, create_at) DO UPDATE SET \
             battery_level = EXCLUDED.battery_level, voltage = EXCLUDED.voltage, \
             channel_utilization = EXCLUDED.channel_utilization, \
             air_util_tx = EXCLUDED.air_util_tx, uptime_seconds = EXCLUDED.uptime_seconds, \
             update_at = EXCLUDED.update_at, topic = EXCLUDED.topic",
        )
        .bind(merged.node_id)
        .bind(merged.battery_level)
        .bind(merged.voltage)
        .bind(merged.channel_utilization)
        .bind(merged.air_util_tx)
        .bind(merged.uptime_seconds)
        .bind(merged.create_at)
        .bind(merged.update_at)
        .bind(&merged.topic)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    pub async fn upsert_telemetry_environment(
        &self,
        incoming: NodeTelemetryEnvironment,
    ) -> Result<NodeTelemetryEnvironment, GatewayError> {
        self.ensure_node(incoming.node_id, Some(incoming.update_at)).await?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, NodeTelemetryEnvironment>(
            "SELECT * FROM node_telemetry_environment \
             WHERE node_id = $1 AND create_at = $2 FOR UPDATE",
        )
        .bind(incoming.node_id)
        .bind(incoming.create_at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(stored) = &existing {
            if incoming.update_at < stored.update_at {
                return Ok(stored.clone());
            }
        }
        let merged = NodeTelemetryEnvironment::apply(existing.as_ref(), incoming);

        sqlx::query(
            "INSERT INTO node_telemetry_environment (node_id, temperature, relative_humidity, \
             barometric_pressure, gas_resistance, voltage, current, iaq, distance, lux, \
             white_lux, ir_lux, uv_lux, wind_direction, wind_speed, weight, wind_gust, \
             wind_lull, create_at, update_at, topic) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21) \
             ON CONFLICT (node_id, create_at) DO UPDATE SET \
             temperature = EXCLUDED.temperature, relative_humidity = EXCLUDED.relative_humidity, \
             barometric_pressure = EXCLUDED.barometric_pressure, \
             gas_resistance = EXCLUDED.gas_resistance, voltage = EXCLUDED.voltage, \
             current = EXCLUDED.current, iaq = EXCLUDED.iaq, distance = EXCLUDED.distance, \
             lux = EXCLUDED.lux, white_lux = EXCLUDED.white_lux, ir_lux = EXCLUDED.ir_lux, \
             uv_lux = EXCLUDED.uv_lux, wind_direction = EXCLUDED.wind_direction, \
             wind_speed = EXCLUDED.wind_speed, weight = EXCLUDED.weight, \
             wind_gust = EXCLUDED.wind_gust, wind_lull = EXCLUDED.wind_lull, \
             update_at = EXCLUDED.update_at, topic = EXCLUDED.topic",
        )
        .bind(merged.node_id)
        .bind(merged.temperature)
        .bind(merged.relative_humidity)
        .bind(merged.barometric_pressure)
        .bind(merged.gas_resistance)
        .bind(merged.voltage)
        .bind(merged.current)
        .bind(merged.iaq)
        .bind(merged.distance)
        .bind(merged.lux)
        .bind(merged.white_lux)
        .bind(merged.ir_lux)
        .bind(merged.uv_lux)
        .bind(merged.wind_direction)
        .bind(merged.wind_speed)
        .bind(merged.weight)
        .bind(merged.wind_gust)
        .bind(merged.wind_lull)
        .bind(merged.create_at)
        .bind(merged.update_at)
        .bind(&merged.topic)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    pub async fn upsert_telemetry_air_quality(
        &self,
        incoming: NodeTelemetryAirQuality,
    ) -> Result<NodeTelemetryAirQuality, GatewayError> {
        self.ensure_node(incoming.node_id, Some(incoming.update_at)).await?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, NodeTelemetryAirQuality>(
            "SELECT * FROM node_telemetry_air_quality \
             WHERE node_id = $1 AND create_at = $2 FOR UPDATE",
        )
        .bind(incoming.node_id)
        .bind(incoming.create_at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(stored) = &existing {
            if incoming.update_at < stored.update_at {
                return Ok(stored.clone());
            }
        }
        let merged = NodeTelemetryAirQuality::apply(existing.as_ref(), incoming);

        sqlx::query(
            "INSERT INTO node_telemetry_air_quality (node_id, pm10_standard, pm25_standard, \
             pm100_standard, pm10_environmental, pm25_environmental, pm100_environmental, \
             particles_03um, particles_05um, particles_10um, particles_25um, particles_50um, \
             particles_100um, create_at, update_at, topic) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (node_id, create_at) DO UPDATE SET \
             pm10_standard = EXCLUDED.pm10_standard, pm25_standard = EXCLUDED.pm25_standard, \
             pm100_standard = EXCLUDED.pm100_standard, \
             pm10_environmental = EXCLUDED.pm10_environmental, \
             pm25_environmental = EXCLUDED.pm25_environmental, \
             pm100_environmental = EXCLUDED.pm100_environmental, \
             particles_03um = EXCLUDED.particles_03um, particles_05um = EXCLUDED.particles_05um, \
             particles_10um = EXCLUDED.particles_10um, particles_25um = EXCLUDED.particles_25um, \
             particles_50um = EXCLUDED.particles_50um, \
             particles_100um = EXCLUDED.particles_100um, \
             update_at = EXCLUDED.update_at, topic = EXCLUDED.topic",
        )
        .bind(merged.node_id)
        .bind(merged.pm10_standard)
        .bind(merged.pm25_standard)
        .bind(merged.pm100_standard)
        .bind(merged.pm10_environmental)
        .bind(merged.pm25_environmental)
        .bind(merged.pm100_environmental)
        .bind(merged.particles_03um)
        .bind(merged.particles_05um)
        .bind(merged.particles_10um)
        .bind(merged.particles_25um)
        .bind(merged.particles_50um)
        .bind(merged.particles_100um)
        .bind(merged.create_at)
        .bind(merged.update_at)
        .bind(&merged.topic)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    pub async fn upsert_telemetry_power(
        &self,
        incoming: NodeTelemetryPower,
    ) -> Result<NodeTelemetryPower, GatewayError> {
        self.ensure_node(incoming.node_id, Some(incoming.update_at)).await?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, NodeTelemetryPower>(
            "SELECT * FROM node_telemetry_power \
             WHERE node_id = $1 AND create_at = $2 FOR UPDATE",
        )
        .bind(incoming.node_id)
        .bind(incoming.create_at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(stored) = &existing {
            if incoming.update_at < stored.update_at {
                return Ok(stored.clone());
            }
        }
        let merged = NodeTelemetryPower::apply(existing.as_ref(), incoming);

        sqlx::query(
            "INSERT INTO node_telemetry_power (node_id, ch1_voltage, ch1_current, ch2_voltage, \
             ch2_current, ch3_voltage, ch3_current, create_at, update_at, topic) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (node_id, create_at) DO UPDATE SET \
             ch1_voltage = EXCLUDED.ch1_voltage, ch1_current = EXCLUDED.ch1_current, \
             ch2_voltage = EXCLUDED.ch2_voltage, ch2_current = EXCLUDED.ch2_current, \
             ch3_voltage = EXCLUDED.ch3_voltage, ch3_current = EXCLUDED.ch3_current, \
             update_at = EXCLUDED.update_at, topic = EXCLUDED.topic",
        )
        .bind(merged.node_id)
        .bind(merged.ch1_voltage)
        .bind(merged.ch1_current)
        .bind(merged.ch2_voltage)
        .bind(merged.ch2_current)
        .bind(merged.ch3_voltage)
        .bind(merged.ch3_current)
        .bind(merged.create_at)
        .bind(merged.update_at)
        .bind(&merged.topic)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    // ── Read queries ──────────────────────────────────────────────────────────

    pub async fn fetch_node_info(&self, node_id: i64) -> Result<Option<NodeInfo>, GatewayError> {
        Ok(
            sqlx::query_as::<_, NodeInfo>("SELECT * FROM node_info WHERE node_id = $1")
                .bind(node_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Distinct node ids whose positions were updated inside `[start, end]`,
    /// bounded by the configured position query horizon.
    pub async fn fetch_position_node_ids(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<i64>, GatewayError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT node_id FROM node_position \
             WHERE update_at >= $1 AND update_at >= $2 AND update_at <= $3",
        )
        .bind(self.position_horizon())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Most recent positions for one node: one per reporter path (topic),
    /// newest first, at most `limit`.
    pub async fn fetch_positions(
        &self,
        node_id: i64,
        limit: i64,
    ) -> Result<Vec<NodePosition>, GatewayError> {
        Ok(sqlx::query_as::<_, NodePosition>(
            "SELECT * FROM ( \
               SELECT DISTINCT ON (topic) * FROM node_position \
               WHERE node_id = $1 AND update_at >= $2 \
               ORDER BY topic, update_at DESC \
             ) latest ORDER BY update_at DESC LIMIT $3",
        )
        .bind(node_id)
        .bind(self.position_horizon())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Ids of the nodes whose topics carried this node's position in the
    /// last `hours` hours, from the last topic segment. Unparseable topics
    /// are skipped.
    pub async fn fetch_position_reporters(
        &self,
        node_id: i64,
        hours: i64,
    ) -> Result<Vec<i64>, GatewayError> {
        let topics = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT topic FROM node_position \
             WHERE node_id = $1 AND update_at >= $2 AND update_at >= $3",
        )
        .bind(node_id)
        .bind(self.position_horizon())
        .bind(Utc::now() - TimeDelta::hours(hours))
        .fetch_all(&self.pool)
        .await?;

        let mut reporters = Vec::new();
        for topic in topics {
            let Some(segment) = mesh::reporter_from_topic(&topic) else {
                continue;
            };
            match mesh::node_hex_to_id(segment) {
                Some(id) => {
                    if !reporters.contains(&id) {
                        reporters.push(id);
                    }
                }
                None => debug!("unparseable reporter segment in topic {topic}"),
            }
        }
        Ok(reporters)
    }

    /// Neighbor edges whose parent report was updated inside `[start, end]`,
    /// bounded by the neighbor query horizon.
    pub async fn fetch_neighbor_edges_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<NodeNeighborEdge>, GatewayError> {
        Ok(sqlx::query_as::<_, NodeNeighborEdge>(
            "SELECT e.node_id, e.edge_node_id, e.snr \
             FROM node_neighbor_info i \
             JOIN node_neighbor_edge e ON e.node_id = i.node_id \
             WHERE i.update_at >= $1 AND i.update_at >= $2 AND i.update_at <= $3",
        )
        .bind(self.neighbor_horizon())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn fetch_telemetry_device_range(
        &self,
        node_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<NodeTelemetryDevice>, GatewayError> {
        Ok(sqlx::query_as::<_, NodeTelemetryDevice>(
            "SELECT * FROM node_telemetry_device \
             WHERE node_id = $1 AND update_at >= $2 AND update_at <= $3 \
             ORDER BY update_at",
        )
        .bind(node_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn fetch_active_hourly(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalysisActiveHourly>, GatewayError> {
        Ok(sqlx::query_as::<_, AnalysisActiveHourly>(
            "SELECT * FROM analysis_active_hourly \
             WHERE hourly >= $1 AND hourly <= $2 ORDER BY hourly",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn distribution(
        &self,
        column: &str,
    ) -> Result<Vec<DistributionItem>, GatewayError> {
        // `column` comes from a fixed whitelist in the analysis service,
        // never from user input.
        let sql = format!(
            "SELECT COALESCE({column}, 'Unknown') AS name, COUNT(*) AS count \
             FROM node_info WHERE update_at >= $1 \
             GROUP BY 1 ORDER BY count DESC",
        );
        Ok(sqlx::query_as::<_, DistributionItem>(&sql)
            .bind(Utc::now() - TimeDelta::days(1))
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn distribution_hardware(&self) -> Result<Vec<DistributionItem>, GatewayError> {
        self.distribution("hw_model").await
    }

    pub async fn distribution_firmware(&self) -> Result<Vec<DistributionItem>, GatewayError> {
        self.distribution("firmware_version").await
    }

    pub async fn distribution_role(&self) -> Result<Vec<DistributionItem>, GatewayError> {
        self.distribution("role").await
    }

    // ── Retention ─────────────────────────────────────────────────────────────

    /// Roll one hour of activity into `analysis_active_hourly`. A node is
    /// active when any of its rows was updated inside the hour; it counts as
    /// known when it has a node_info row.
    pub async fn rollup_active_hour(
        &self,
        hour_start: DateTime<Utc>,
        hour_end: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "WITH seen AS ( \
               SELECT node_id FROM node_info WHERE update_at >= $1 AND update_at < $2 \
               UNION SELECT node_id FROM node_position WHERE update_at >= $1 AND update_at < $2 \
               UNION SELECT node_id FROM node_neighbor_info \
                 WHERE update_at >= $1 AND update_at < $2 \
               UNION SELECT node_id FROM node_telemetry_device \
                 WHERE update_at >= $1 AND update_at < $2 \
               UNION SELECT node_id FROM node_telemetry_environment \
                 WHERE update_at >= $1 AND update_at < $2 \
               UNION SELECT node_id FROM node_telemetry_air_quality \
                 WHERE update_at >= $1 AND update_at < $2 \
               UNION SELECT node_id FROM node_telemetry_power \
                 WHERE update_at >= $1 AND update_at < $2 \
             ) \
             INSERT INTO analysis_active_hourly (hourly, known_count, unknown_count) \
             SELECT $1, \
               COUNT(*) FILTER (WHERE ni.node_id IS NOT NULL)::int, \
               COUNT(*) FILTER (WHERE ni.node_id IS NULL)::int \
             FROM seen LEFT JOIN node_info ni ON ni.node_id = seen.node_id \
             ON CONFLICT (hourly) DO UPDATE SET \
             known_count = EXCLUDED.known_count, unknown_count = EXCLUDED.unknown_count",
        )
        .bind(hour_start)
        .bind(hour_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn prune_positions(&self, cutoff: DateTime<Utc>) -> Result<u64, GatewayError> {
        let result = sqlx::query("DELETE FROM node_position WHERE update_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete stale neighbor reports and their edges together.
    pub async fn prune_neighbor_info(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<(u64, u64), GatewayError> {
        let mut tx = self.pool.begin().await?;
        let edges = sqlx::query(
            "DELETE FROM node_neighbor_edge e USING node_neighbor_info i \
             WHERE e.node_id = i.node_id AND i.update_at < $1",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let infos = sqlx::query("DELETE FROM node_neighbor_info WHERE update_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok((infos, edges))
    }
}
