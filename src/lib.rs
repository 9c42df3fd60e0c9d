//! # mqtt-quic
//!
//! MQTT 3.1.1 client that frames its control packets directly on QUIC
//! streams, with a TCP+TLS fallback for networks that block UDP.
//!
//! - **Multi-stream publishing**: one QUIC stream per topic, so a lost
//!   packet on one topic does not stall the others
//! - **QoS 1 tracking**: every PUBLISH and SUBSCRIBE is correlated with its
//!   acknowledgment under a per-operation timeout
//! - **Fast reconnects**: TLS session resumption and 0-RTT on QUIC, with
//!   tickets persisted per broker and client identity
//! - **Fallback**: the same API over a single TCP+TLS stream
//!
//! ## Feature Flags
//!
//! - `quic` (default): QUIC backend (quinn)
//! - `tls` (default): TCP+TLS backend (tokio-rustls)
//!
//! ## Modules
//!
//! - [`core`]: Constants, codec errors and transport seam traits
//! - [`codec`]: MQTT packet encoding and decoding
//! - [`stream`]: Topic to stream routing and receive buffering
//! - [`session`]: Acknowledgments, keep-alive, statistics and session tickets
//! - [`transport`]: QUIC and TCP+TLS backends
//! - [`client`]: Transport selection and the client API
//!
//! ## Example Usage
//!
//! ```no_run
//! use mqtt_quic::prelude::*;
//!
//! # async fn run() -> Result<(), ClientError> {
//! let config = ClientConfig::builder()
//!     .host("broker.example.com")
//!     .client_id("sensor-7")
//!     .credentials("sensor-7", "secret")
//!     .build();
//! let (client, mut events) = MqttClient::new(config)?;
//!
//! connect_with_backoff(&client, &ReconnectPolicy::default()).await?;
//! client.subscribe("device/sensor-7/commands/#", QoS::AtLeastOnce).await?;
//!
//! let results = client
//!     .publish_parallel(&[
//!         PublishRequest::new("device/sensor-7/telemetry/temp", "21.5", QoS::AtLeastOnce),
//!         PublishRequest::new("device/sensor-7/telemetry/humidity", "40", QoS::AtLeastOnce),
//!     ])
//!     .await;
//! for (topic, result) in &results {
//!     println!("{topic}: {result:?}");
//! }
//!
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Message(message) = event {
//!         println!("{} -> {:?}", message.topic, message.payload_str());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod codec;
pub mod core;
pub mod session;
pub mod stream;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{
        ClientConfig, ClientError, ClientEvent, ClientState, IncomingMessage, MqttClient,
        PublishRequest, ReconnectPolicy, TransportPreference, Transports, connect_with_backoff,
    };
    pub use crate::codec::{Packet, QoS};
    pub use crate::session::{ConnectionStats, FileSessionStore, SessionStore};
    pub use crate::transport::{CertVerification, TransportKind};
}

// Re-export commonly used items at crate root
pub use client::{ClientConfig, ClientError, ClientEvent, MqttClient, PublishRequest};
pub use codec::QoS;
pub use transport::TransportKind;
