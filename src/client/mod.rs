//! Transport selector and client API.
//!
//! [`MqttClient`] owns at most one live connection, chooses its transport and
//! reports what happens on it through [`ClientEvent`]s.

#[allow(clippy::module_inception)]
mod client;
mod config;
mod connection;
mod error;
mod event;
mod reconnect;

pub use client::{ClientState, MqttClient, PublishRequest, Transports};
pub use config::{ClientConfig, ClientConfigBuilder, Credentials, TransportPreference, generate_client_id};
pub use error::ClientError;
pub use event::{ClientEvent, EventReceiver, IncomingMessage};
pub use reconnect::{ReconnectPolicy, connect_with_backoff};
