//! mqtt-quic telemetry demo
//!
//! Publishes simulated sensor readings every interval, one QUIC stream per
//! sensor, and prints whatever arrives on the device's command topics.
//!
//! Environment variables:
//! - MQTT_HOST: Broker host (default mqtt.tesaiot.com)
//! - MQTT_QUIC_PORT: QUIC port (default 14567)
//! - MQTT_TCP_PORT: TCP+TLS port (default 8884)
//! - MQTT_DEVICE_ID: Client id and username (required)
//! - MQTT_PASSWORD: Password (optional)
//! - MQTT_CA_CERT: PEM CA file; certificate checks are off when unset
//! - MQTT_KEEPALIVE: Keep-alive in seconds (default 60)
//! - MQTT_TICKET_DIR: Directory for session tickets (optional). The quinn
//!   backend resumes from its in-memory cache only, so nothing is written
//!   there and 0-RTT does not survive a restart of the demo.
//! - MQTT_INTERVAL: Seconds between telemetry rounds (default 10)
//! - RUST_LOG: Log filter (default info)

use std::str::FromStr;
use std::time::Duration;

use mqtt_quic::prelude::*;
use rand::Rng;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Sensors reported each round.
const SENSORS: &[&str] = &["temperature", "humidity", "pressure"];

#[derive(Debug, Error)]
enum DemoError {
    #[error("{0} must be set")]
    MissingVar(&'static str),

    #[error("{name} has an invalid value: {value}")]
    InvalidVar { name: &'static str, value: String },

    #[error(transparent)]
    Client(#[from] ClientError),
}

fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T, DemoError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| DemoError::InvalidVar { name, value }),
        Err(_) => Ok(default),
    }
}

fn config_from_env() -> Result<(ClientConfig, Duration), DemoError> {
    let device_id =
        std::env::var("MQTT_DEVICE_ID").map_err(|_| DemoError::MissingVar("MQTT_DEVICE_ID"))?;
    let defaults = ClientConfig::default();

    let mut builder = ClientConfig::builder()
        .host(std::env::var("MQTT_HOST").unwrap_or(defaults.host))
        .quic_port(env_parse("MQTT_QUIC_PORT", defaults.quic_port)?)
        .tcp_port(env_parse("MQTT_TCP_PORT", defaults.tcp_port)?)
        .client_id(device_id.clone())
        .keep_alive(Duration::from_secs(env_parse("MQTT_KEEPALIVE", 60)?));

    if let Ok(password) = std::env::var("MQTT_PASSWORD") {
        builder = builder.credentials(device_id, password);
    }
    if let Ok(ca) = std::env::var("MQTT_CA_CERT") {
        builder = builder.ca_file(ca);
    }
    if let Ok(dir) = std::env::var("MQTT_TICKET_DIR") {
        builder = builder.ticket_dir(dir);
    }

    let interval = Duration::from_secs(env_parse("MQTT_INTERVAL", 10)?);
    Ok((builder.build(), interval))
}

fn reading(sensor: &str) -> String {
    let mut rng = rand::thread_rng();
    let value: f64 = match sensor {
        "temperature" => rng.gen_range(20.0..30.0),
        "humidity" => rng.gen_range(40.0..70.0),
        _ => rng.gen_range(990.0..1030.0),
    };
    format!("{value:.2}")
}

async fn publish_round(client: &MqttClient, device_id: &str) {
    let requests: Vec<PublishRequest> = SENSORS
        .iter()
        .map(|sensor| {
            PublishRequest::new(
                format!("device/{device_id}/telemetry/{sensor}"),
                reading(sensor),
                QoS::AtLeastOnce,
            )
        })
        .collect();

    for (topic, result) in client.publish_parallel(&requests).await {
        match result {
            Ok(()) => tracing::info!(%topic, "published"),
            Err(e) => tracing::warn!(%topic, error = %e, "publish failed"),
        }
    }
}

async fn run() -> Result<(), DemoError> {
    let (config, interval) = config_from_env()?;
    let device_id = config.client_id.clone();
    let (client, mut events) = MqttClient::new(config)?;
    let policy = ReconnectPolicy::default();

    let transport = connect_with_backoff(&client, &policy).await?;
    tracing::info!(%transport, "connected");
    client
        .subscribe(&format!("device/{device_id}/commands/#"), QoS::AtLeastOnce)
        .await?;

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => publish_round(&client, &device_id).await,
            Some(event) = events.recv() => match event {
                ClientEvent::Message(message) => {
                    tracing::info!(
                        topic = %message.topic,
                        payload = message.payload_str().unwrap_or("<binary>"),
                        "command received"
                    );
                }
                ClientEvent::ConnectionLost { reason } => {
                    tracing::warn!(%reason, "connection lost, reconnecting");
                    connect_with_backoff(&client, &policy).await?;
                    client
                        .subscribe(&format!("device/{device_id}/commands/#"), QoS::AtLeastOnce)
                        .await?;
                }
                other => tracing::debug!(?other, "event"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await;
    let stats = client.stats();
    tracing::info!(
        sent = stats.messages_sent,
        received = stats.messages_received,
        reconnects = stats.reconnect_count,
        zero_rtt = stats.zero_rtt_used,
        avg_ack = ?stats.ack_latency.average(),
        "session summary"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "telemetry demo failed");
        std::process::exit(1);
    }
}
