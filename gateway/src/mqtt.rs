//! MQTT subscription supervisor.
//!
//! One tokio task per (client config, host) pair. Each task owns a single
//! connection and consumes its event loop sequentially, so per-connection
//! arrival order is preserved. Any failure — connect, subscribe, protocol —
//! tears the connection down, waits the client's retry interval and rebuilds
//! it from scratch, resubscribing the full topic list. Workers never exit on
//! their own; shutdown is external cancellation.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::codec::FrameCodec;
use crate::config::{GatewayConfig, MqttClientConfig};
use crate::ingest::IngestPipeline;

pub fn spawn_listeners(
    config: &GatewayConfig,
    codec: Arc<FrameCodec>,
    pipeline: Arc<IngestPipeline>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for client in &config.mqtt.client {
        for host in &client.hosts {
            handles.push(tokio::spawn(subscribe_to_host(
                client.clone(),
                host.clone(),
                codec.clone(),
                pipeline.clone(),
            )));
        }
    }
    handles
}

async fn subscribe_to_host(
    client_config: MqttClientConfig,
    host: String,
    codec: Arc<FrameCodec>,
    pipeline: Arc<IngestPipeline>,
) {
    loop {
        let mut options =
            MqttOptions::new(&client_config.identifier, &host, client_config.port);
        options.set_credentials(&client_config.username, &client_config.password);
        options.set_keep_alive(Duration::from_secs(60));
        let (client, mut event_loop) = AsyncClient::new(options, 256);

        let mut subscribe_failed = false;
        for topic in &client_config.topics {
            if let Err(err) = client.subscribe(topic, QoS::AtMostOnce).await {
                if client_config.show_error_log {
                    error!("{host}: subscribe to {topic} failed: {err}");
                }
                subscribe_failed = true;
                break;
            }
        }

        if !subscribe_failed {
            info!("subscribed on {host} to {:?}", client_config.topics);
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if let Some(event) = codec.decode(&publish.topic, &publish.payload) {
                            pipeline.handle(event).await;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if client_config.show_error_log {
                            error!("{host}: connection error: {err}, retrying");
                        }
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(client_config.retry_time)).await;
    }
}
