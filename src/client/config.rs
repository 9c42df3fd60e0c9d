//! Client configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use zeroize::Zeroizing;

use crate::core::ServerTarget;
use crate::core::constants::{
    ACK_TIMEOUT, DEFAULT_HOST, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_PACKET_SIZE, DEFAULT_QUIC_PORT,
    DEFAULT_TCP_PORT, QUIC_CONNECT_TIMEOUT, TCP_CONNECT_TIMEOUT,
};
use crate::transport::CertVerification;

/// Prefix of generated client identifiers.
const CLIENT_ID_PREFIX: &str = "mqtt-quic-";

/// Which transports `connect` may use, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportPreference {
    /// QUIC first, TCP+TLS when QUIC fails.
    #[default]
    QuicThenTcp,
    /// QUIC only.
    QuicOnly,
    /// TCP+TLS only.
    TcpOnly,
}

impl TransportPreference {
    /// Whether the QUIC path is attempted.
    pub fn tries_quic(self) -> bool {
        !matches!(self, TransportPreference::TcpOnly)
    }

    /// Whether the TCP+TLS path is attempted.
    pub fn tries_tcp(self) -> bool {
        !matches!(self, TransportPreference::QuicOnly)
    }
}

/// Username and password sent in CONNECT.
///
/// The password is wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct Credentials {
    /// Username, typically the device id.
    pub username: String,
    password: Zeroizing<Vec<u8>>,
}

impl Credentials {
    /// Pair a username with a password (opaque bytes).
    pub fn new(username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Password bytes.
    pub fn password(&self) -> &[u8] {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker host name or address.
    pub host: String,

    /// Name checked against the broker certificate; defaults to `host`.
    pub server_name: Option<String>,

    /// UDP port for MQTT over QUIC.
    pub quic_port: u16,

    /// TCP port for MQTT over TLS.
    pub tcp_port: u16,

    /// MQTT client identifier.
    pub client_id: String,

    /// Credentials, if the broker requires them.
    pub credentials: Option<Credentials>,

    /// Keep-alive interval; zero disables keep-alive.
    pub keep_alive: Duration,

    /// Ask the broker to discard previous session state.
    pub clean_session: bool,

    /// Transport order.
    pub transport: TransportPreference,

    /// Budget for the QUIC path, handshake through CONNACK.
    pub quic_timeout: Duration,

    /// Budget for the TCP+TLS path, handshake through CONNACK.
    pub tcp_timeout: Duration,

    /// Budget for each PUBACK or SUBACK.
    pub ack_timeout: Duration,

    /// Broker certificate check.
    pub cert_verification: CertVerification,

    /// Attempt 0-RTT on QUIC reconnects.
    pub zero_rtt: bool,

    /// Largest incoming packet body accepted.
    pub max_packet_size: usize,

    /// Directory for persisted session tickets; in-memory when unset.
    ///
    /// Only backends that report issued tickets fill it. The bundled quinn
    /// backend keeps resumption state in its in-memory TLS session cache, so
    /// with it 0-RTT works across reconnects of one process and this
    /// directory stays empty.
    pub ticket_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            server_name: None,
            quic_port: DEFAULT_QUIC_PORT,
            tcp_port: DEFAULT_TCP_PORT,
            client_id: generate_client_id(),
            credentials: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            transport: TransportPreference::default(),
            quic_timeout: QUIC_CONNECT_TIMEOUT,
            tcp_timeout: TCP_CONNECT_TIMEOUT,
            ack_timeout: ACK_TIMEOUT,
            cert_verification: CertVerification::default(),
            zero_rtt: true,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            ticket_dir: None,
        }
    }
}

impl ClientConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Keep-alive in whole seconds as carried in CONNECT.
    pub fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }

    fn target(&self, port: u16) -> ServerTarget {
        ServerTarget {
            host: self.host.clone(),
            port,
            server_name: self.server_name.clone().unwrap_or_else(|| self.host.clone()),
        }
    }

    /// Where the QUIC path connects.
    pub fn quic_target(&self) -> ServerTarget {
        self.target(self.quic_port)
    }

    /// Where the TCP+TLS path connects.
    pub fn tcp_target(&self) -> ServerTarget {
        self.target(self.tcp_port)
    }
}

/// Generate `mqtt-quic-` followed by eight random hex digits.
pub fn generate_client_id() -> String {
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("{CLIENT_ID_PREFIX}{suffix:08x}")
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broker host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the certificate name when it differs from the host.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = Some(name.into());
        self
    }

    /// Set the QUIC port.
    pub fn quic_port(mut self, port: u16) -> Self {
        self.config.quic_port = port;
        self
    }

    /// Set the TCP+TLS port.
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.config.tcp_port = port;
        self
    }

    /// Set the client identifier.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = id.into();
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.config.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Set the keep-alive interval.
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.config.keep_alive = interval;
        self
    }

    /// Set the clean-session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.config.clean_session = clean;
        self
    }

    /// Set the transport order.
    pub fn transport(mut self, preference: TransportPreference) -> Self {
        self.config.transport = preference;
        self
    }

    /// Set the QUIC path budget.
    pub fn quic_timeout(mut self, timeout: Duration) -> Self {
        self.config.quic_timeout = timeout;
        self
    }

    /// Set the TCP+TLS path budget.
    pub fn tcp_timeout(mut self, timeout: Duration) -> Self {
        self.config.tcp_timeout = timeout;
        self
    }

    /// Set the ack budget.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Verify the broker against a PEM CA file.
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cert_verification = CertVerification::CaFile(path.into());
        self
    }

    /// Set the certificate check.
    pub fn cert_verification(mut self, verification: CertVerification) -> Self {
        self.config.cert_verification = verification;
        self
    }

    /// Enable or disable 0-RTT.
    pub fn zero_rtt(mut self, enabled: bool) -> Self {
        self.config.zero_rtt = enabled;
        self
    }

    /// Set the largest incoming packet body.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// Persist session tickets under `dir`.
    ///
    /// Has no effect with the bundled quinn backend, which never exports its
    /// tickets; see [`ClientConfig::ticket_dir`].
    pub fn ticket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.ticket_dir = Some(dir.into());
        self
    }

    /// Finish the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
