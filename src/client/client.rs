//! Transport selector.
//!
//! [`MqttClient`] tries MQTT over QUIC first and falls back to MQTT over
//! TCP+TLS. Once connected, `publish`, `subscribe` and `disconnect` behave the
//! same on either transport; only [`MqttClient::publish_parallel`] changes
//! strategy, using one QUIC stream per topic when it can.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::config::ClientConfig;
use super::connection::{Connection, ConnectionSettings, send_connect};
use super::error::ClientError;
use super::event::{ClientEvent, EventReceiver, EventSender};
use crate::codec::{QoS, encode_connect};
use crate::core::{HandshakeInfo, QuicConnector, QuicSession, TcpTlsConnector};
use crate::session::{ConnectionStats, MemorySessionStore, SessionStore, SessionTicket};
use crate::transport::{TransportError, TransportKind};

/// Reported for a path that was not attempted.
const SKIPPED: &str = "skipped";

/// Connection state as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection.
    Disconnected,
    /// Handshake in progress on the given transport.
    Connecting(TransportKind),
    /// MQTT session accepted on the given transport.
    Connected(TransportKind),
}

/// Transport backends and ticket storage used by a client.
///
/// A missing connector is treated as an unavailable path and skipped.
#[derive(Clone, Default)]
pub struct Transports {
    /// QUIC backend.
    pub quic: Option<Arc<dyn QuicConnector>>,
    /// TCP+TLS backend.
    pub tcp_tls: Option<Arc<dyn TcpTlsConnector>>,
    /// Ticket storage; in-memory when unset.
    pub session_store: Option<Arc<dyn SessionStore>>,
}

impl Transports {
    /// Backends for the enabled cargo features, configured from `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        #[cfg(feature = "quic")]
        let quic: Option<Arc<dyn QuicConnector>> = Some(Arc::new(
            crate::transport::QuinnConnector::new(&config.cert_verification, config.zero_rtt)?,
        ));
        #[cfg(not(feature = "quic"))]
        let quic: Option<Arc<dyn QuicConnector>> = None;

        #[cfg(feature = "tls")]
        let tcp_tls: Option<Arc<dyn TcpTlsConnector>> = Some(Arc::new(
            crate::transport::RustlsConnector::new(&config.cert_verification)?,
        ));
        #[cfg(not(feature = "tls"))]
        let tcp_tls: Option<Arc<dyn TcpTlsConnector>> = None;

        let session_store: Arc<dyn SessionStore> = match &config.ticket_dir {
            Some(dir) => Arc::new(crate::session::FileSessionStore::for_identity(
                dir,
                &config.host,
                &config.client_id,
            )),
            None => Arc::new(MemorySessionStore::new()),
        };

        Ok(Self {
            quic,
            tcp_tls,
            session_store: Some(session_store),
        })
    }
}

/// One message of a [`MqttClient::publish_parallel`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Topic name.
    pub topic: String,
    /// Payload bytes.
    pub payload: Bytes,
    /// Delivery guarantee.
    pub qos: QoS,
}

impl PublishRequest {
    /// Create a request.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        }
    }
}

/// A connection that passed CONNACK, with its handshake flags.
struct Established {
    connection: Connection,
    zero_rtt: bool,
    resumed: bool,
}

/// MQTT client with QUIC-first transport selection.
///
/// # Example
///
/// ```no_run
/// use mqtt_quic::prelude::*;
///
/// # async fn run() -> Result<(), ClientError> {
/// let config = ClientConfig::builder()
///     .client_id("device-01")
///     .credentials("device-01", "secret")
///     .build();
/// let (client, mut events) = MqttClient::new(config)?;
///
/// let transport = client.connect().await?;
/// println!("connected over {transport}");
/// client.publish("device/device-01/telemetry/temp", "21.5", QoS::AtLeastOnce).await?;
/// client.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct MqttClient {
    config: ClientConfig,
    quic: Option<Arc<dyn QuicConnector>>,
    tcp_tls: Option<Arc<dyn TcpTlsConnector>>,
    store: Arc<dyn SessionStore>,
    events: EventSender,
    stats: Arc<Mutex<ConnectionStats>>,
    state: Mutex<ClientState>,
    connection: Mutex<Option<Arc<Connection>>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl MqttClient {
    /// Create a client with the backends of the enabled cargo features.
    pub fn new(config: ClientConfig) -> Result<(Self, EventReceiver), ClientError> {
        let transports = Transports::from_config(&config)?;
        Ok(Self::with_transports(config, transports))
    }

    /// Create a client over caller-provided backends.
    pub fn with_transports(config: ClientConfig, transports: Transports) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let store = transports
            .session_store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));

        let client = Self {
            config,
            quic: transports.quic,
            tcp_tls: transports.tcp_tls,
            store,
            events,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
            state: Mutex::new(ClientState::Disconnected),
            connection: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        };
        (client, receiver)
    }

    /// Establish an MQTT session, QUIC first.
    ///
    /// Returns at once if already connected. An authentication rejection is
    /// returned without trying the other transport.
    pub async fn connect(&self) -> Result<TransportKind, ClientError> {
        let _guard = self.connect_lock.lock().await;
        if let Some(connection) = self.current() {
            return Ok(connection.kind());
        }
        // Drop a lost connection before replacing it
        self.connection.lock().take();

        let credentials = self.config.credentials.as_ref();
        let connect = encode_connect(
            &self.config.client_id,
            credentials.map(|c| c.username.as_str()),
            credentials.map(|c| c.password()),
            self.config.keep_alive_secs(),
            self.config.clean_session,
        )?;

        let mut quic_error = SKIPPED.to_owned();
        let mut tls_error = SKIPPED.to_owned();

        if self.config.transport.tries_quic() {
            self.set_state(ClientState::Connecting(TransportKind::Quic));
            match self.connect_quic(connect.clone()).await {
                Ok(established) => return Ok(self.install(established)),
                Err(e) if e.is_fatal() => {
                    self.set_state(ClientState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(transport = %TransportKind::Quic, error = %e, "transport attempt failed");
                    quic_error = e.to_string();
                }
            }
        }

        if self.config.transport.tries_tcp() {
            if self.config.transport.tries_quic() {
                tracing::info!("falling back to TCP+TLS");
            }
            self.set_state(ClientState::Connecting(TransportKind::TcpTls));
            match self.connect_tcp(connect).await {
                Ok(established) => return Ok(self.install(established)),
                Err(e) if e.is_fatal() => {
                    self.set_state(ClientState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(transport = %TransportKind::TcpTls, error = %e, "transport attempt failed");
                    tls_error = e.to_string();
                }
            }
        }

        self.set_state(ClientState::Disconnected);
        Err(ClientError::ConnectionFailed {
            quic: quic_error,
            tls: tls_error,
        })
    }

    async fn connect_quic(&self, connect: Bytes) -> Result<Established, ClientError> {
        let connector = self
            .quic
            .clone()
            .ok_or(TransportError::Unavailable("QUIC"))?;
        let budget = self.config.quic_timeout;
        tokio::time::timeout(budget, self.quic_attempt(connector.as_ref(), connect))
            .await
            .map_err(|_| TransportError::Timeout(budget))?
    }

    async fn quic_attempt(
        &self,
        connector: &dyn QuicConnector,
        connect: Bytes,
    ) -> Result<Established, ClientError> {
        let target = self.config.quic_target();
        let ticket = if self.config.zero_rtt {
            self.load_ticket()
        } else {
            None
        };
        tracing::debug!(host = %target.host, port = target.port, resumption = ticket.is_some(), "connecting over QUIC");

        let session: Arc<dyn QuicSession> =
            Arc::from(connector.connect(&target, ticket.as_ref()).await?);

        match self.start_quic_session(&session, connect).await {
            Ok((connection, handshake)) => Ok(Established {
                connection,
                zero_rtt: handshake.zero_rtt_accepted,
                resumed: handshake.session_resumed,
            }),
            Err(e) => {
                session.close("connect failed");
                Err(e)
            }
        }
    }

    /// Run CONNECT/CONNACK on a fresh QUIC session.
    ///
    /// With early data CONNECT is written before the handshake completes. If
    /// the server rejects it, CONNECT goes out again on a new primary stream.
    async fn start_quic_session(
        &self,
        session: &Arc<dyn QuicSession>,
        connect: Bytes,
    ) -> Result<(Connection, HandshakeInfo), ClientError> {
        let mut primary = session.open_stream().await?;
        let early = session.early_data();
        let sent_early = early
            && match send_connect(&mut primary, &connect).await {
                Ok(()) => {
                    tracing::debug!(stream_id = primary.id, "CONNECT sent as early data");
                    true
                }
                Err(e) => {
                    tracing::debug!(error = %e, "early data not sent");
                    false
                }
            };

        let handshake = session.handshake().await;
        self.update_ticket(&handshake);
        tracing::debug!(
            zero_rtt = handshake.zero_rtt_accepted,
            resumed = handshake.session_resumed,
            "QUIC handshake complete"
        );

        let pending = if sent_early && handshake.zero_rtt_accepted {
            None
        } else {
            if early && !handshake.zero_rtt_accepted {
                tracing::debug!("early data rejected, resending CONNECT");
                primary = session.open_stream().await?;
            }
            Some(connect)
        };

        let connection = Connection::establish(
            TransportKind::Quic,
            primary,
            Some(Arc::clone(session)),
            pending,
            self.settings(),
            Arc::clone(&self.stats),
            self.events.clone(),
        )
        .await?;
        Ok((connection, handshake))
    }

    async fn connect_tcp(&self, connect: Bytes) -> Result<Established, ClientError> {
        let connector = self
            .tcp_tls
            .clone()
            .ok_or(TransportError::Unavailable("TCP+TLS"))?;
        let budget = self.config.tcp_timeout;
        let target = self.config.tcp_target();
        tracing::debug!(host = %target.host, port = target.port, "connecting over TCP+TLS");

        let attempt = async {
            let stream = connector.connect(&target).await?;
            Connection::establish(
                TransportKind::TcpTls,
                stream,
                None,
                Some(connect),
                self.settings(),
                Arc::clone(&self.stats),
                self.events.clone(),
            )
            .await
        };
        let connection = tokio::time::timeout(budget, attempt)
            .await
            .map_err(|_| TransportError::Timeout(budget))??;

        Ok(Established {
            connection,
            zero_rtt: false,
            resumed: false,
        })
    }

    fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            // The interval the broker was told in CONNECT
            keep_alive: Duration::from_secs(self.config.keep_alive_secs().into()),
            ack_timeout: self.config.ack_timeout,
            max_packet_size: self.config.max_packet_size,
        }
    }

    fn load_ticket(&self) -> Option<SessionTicket> {
        match self.store.load() {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable session ticket");
                None
            }
        }
    }

    fn update_ticket(&self, handshake: &HandshakeInfo) {
        if handshake.ticket_invalid {
            if let Err(e) = self.store.invalidate() {
                tracing::warn!(error = %e, "failed to invalidate session ticket");
            }
        }
        if let Some(ticket) = &handshake.issued_ticket {
            if let Err(e) = self.store.save(ticket) {
                tracing::warn!(error = %e, "failed to save session ticket");
            }
        }
    }

    fn install(&self, established: Established) -> TransportKind {
        let Established {
            connection,
            zero_rtt,
            resumed,
        } = established;
        let kind = connection.kind();
        let session_present = connection.session_present();

        self.stats
            .lock()
            .on_connected(kind, zero_rtt, resumed, Instant::now());
        *self.connection.lock() = Some(Arc::new(connection));
        self.set_state(ClientState::Connected(kind));

        tracing::info!(transport = %kind, zero_rtt, resumed, session_present, "connected");
        let _ = self.events.send(ClientEvent::Connected {
            transport: kind,
            session_present,
        });
        kind
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }

    /// The live connection, if any.
    fn current(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .as_ref()
            .filter(|connection| connection.is_alive())
            .cloned()
    }

    /// Publish on the primary stream. QoS 1 waits for the PUBACK.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl AsRef<[u8]>,
        qos: QoS,
    ) -> Result<(), ClientError> {
        let connection = self.current().ok_or(ClientError::NotConnected)?;
        connection.publish(topic, payload.as_ref(), qos, false).await
    }

    /// Publish on the stream dedicated to `topic`, opening it on first use.
    ///
    /// Over TCP+TLS this is the same as [`publish`](Self::publish).
    pub async fn publish_dedicated(
        &self,
        topic: &str,
        payload: impl AsRef<[u8]>,
        qos: QoS,
    ) -> Result<(), ClientError> {
        let connection = self.current().ok_or(ClientError::NotConnected)?;
        connection.publish(topic, payload.as_ref(), qos, true).await
    }

    /// Publish a batch and report each topic's outcome.
    ///
    /// Over QUIC every message goes out concurrently on its topic's dedicated
    /// stream. Over TCP+TLS the messages are sent one after another. Either
    /// way one failure does not affect the others. When a topic appears more
    /// than once, the last outcome is kept.
    pub async fn publish_parallel(
        &self,
        requests: &[PublishRequest],
    ) -> HashMap<String, Result<(), ClientError>> {
        let Some(connection) = self.current() else {
            return requests
                .iter()
                .map(|request| (request.topic.clone(), Err(ClientError::NotConnected)))
                .collect();
        };

        if connection.kind().is_multistream() {
            let connection = &connection;
            let outcomes = join_all(requests.iter().map(|request| async move {
                let outcome = connection
                    .publish(&request.topic, &request.payload, request.qos, true)
                    .await;
                (request.topic.clone(), outcome)
            }))
            .await;
            outcomes.into_iter().collect()
        } else {
            let mut outcomes = HashMap::with_capacity(requests.len());
            for request in requests {
                let outcome = connection
                    .publish(&request.topic, &request.payload, request.qos, false)
                    .await;
                outcomes.insert(request.topic.clone(), outcome);
            }
            outcomes
        }
    }

    /// Subscribe to `filter` and return the QoS granted by the broker.
    pub async fn subscribe(&self, filter: &str, qos: QoS) -> Result<QoS, ClientError> {
        let connection = self.current().ok_or(ClientError::NotConnected)?;
        connection.subscribe(filter, qos).await
    }

    /// Send DISCONNECT and close the transport.
    ///
    /// Pending publishes and subscribes fail with [`ClientError::Cancelled`].
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        let connection = self.connection.lock().take();
        self.set_state(ClientState::Disconnected);

        if let Some(connection) = connection {
            let was_alive = connection.is_alive();
            connection.close().await;
            if was_alive {
                tracing::info!(transport = %connection.kind(), "disconnected");
                let _ = self.events.send(ClientEvent::Disconnected);
            }
        }
    }

    /// Whether an MQTT session is currently established.
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Current state. A connection lost since the last call reads as
    /// `Disconnected`.
    pub fn state(&self) -> ClientState {
        let state = *self.state.lock();
        match state {
            ClientState::Connected(_) if !self.is_connected() => ClientState::Disconnected,
            state => state,
        }
    }

    /// Transport of the live connection.
    pub fn transport(&self) -> Option<TransportKind> {
        self.current().map(|connection| connection.kind())
    }

    /// Snapshot of the connection statistics.
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
