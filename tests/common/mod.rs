//! In-memory MQTT broker and mock transports for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use mqtt_quic::client::{ClientConfig, EventReceiver, MqttClient, Transports};
use mqtt_quic::codec::{
    ConnAck, ConnectReturnCode, Packet, Publish, QoS, SubAck, SubscribeReturnCode,
};
use mqtt_quic::core::{
    ByteStream, HandshakeInfo, QuicConnector, QuicSession, ServerTarget, StreamId,
    TcpTlsConnector,
};
use mqtt_quic::session::{SessionStore, SessionTicket};
use mqtt_quic::stream::PacketBuffer;
use mqtt_quic::transport::{TransportError, TransportResult};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// How the broker answers QoS 1 publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// PUBACK right away.
    Immediate,
    /// Never acknowledge.
    Never,
    /// Hold acks until `n` publishes arrived on a stream, then ack them in
    /// reverse order.
    Reversed(usize),
    /// Acknowledge after a delay.
    Delayed(Duration),
    /// Answer with bytes that are no MQTT packet.
    Malformed,
}

/// Broker behavior, read on every packet so tests can change it mid-run.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub connack: ConnectReturnCode,
    pub session_present: bool,
    pub puback: AckMode,
    /// Granted QoS for subscriptions; `None` rejects them.
    pub grant: Option<QoS>,
    pub answer_pings: bool,
    /// Sent to the client right after a SUBACK.
    pub deliver_on_subscribe: Option<Publish>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            connack: ConnectReturnCode::Accepted,
            session_present: false,
            puback: AckMode::Immediate,
            grant: Some(QoS::AtLeastOnce),
            answer_pings: true,
            deliver_on_subscribe: None,
        }
    }
}

#[derive(Default)]
struct BrokerInner {
    behavior: Mutex<Behavior>,
    received: Mutex<Vec<(StreamId, Packet)>>,
    streams: AtomicUsize,
}

/// Broker speaking MQTT over in-memory pipes.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(behavior: Behavior) -> Self {
        let broker = Self::default();
        *broker.inner.behavior.lock() = behavior;
        broker
    }

    pub fn set_behavior(&self, update: impl FnOnce(&mut Behavior)) {
        update(&mut self.inner.behavior.lock());
    }

    /// Client end of a new stream served by this broker.
    pub fn accept(&self, id: StreamId) -> ByteStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.inner.streams.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(Arc::clone(&self.inner), id, server));
        let (reader, writer) = tokio::io::split(client);
        ByteStream::new(id, reader, writer)
    }

    pub fn streams_accepted(&self) -> usize {
        self.inner.streams.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<(StreamId, Packet)> {
        self.inner.received.lock().clone()
    }

    pub fn publishes(&self) -> Vec<(StreamId, Publish)> {
        self.received()
            .into_iter()
            .filter_map(|(id, packet)| match packet {
                Packet::Publish(publish) => Some((id, publish)),
                _ => None,
            })
            .collect()
    }

    pub fn pubacks(&self) -> Vec<(StreamId, u16)> {
        self.received()
            .into_iter()
            .filter_map(|(id, packet)| match packet {
                Packet::PubAck(packet_id) => Some((id, packet_id)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.received()
            .iter()
            .filter(|(_, packet)| packet.name() == name)
            .count()
    }
}

fn queue(tx: &mpsc::UnboundedSender<Bytes>, packet: Packet) {
    if let Ok(bytes) = packet.encode() {
        let _ = tx.send(bytes);
    }
}

async fn serve(inner: Arc<BrokerInner>, id: StreamId, io: DuplexStream) {
    let (mut reader, mut writer) = tokio::io::split(io);
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut buffer = PacketBuffer::default();
    let mut held = Vec::new();
    loop {
        while let Ok(Some(packet)) = buffer.next_packet() {
            inner.received.lock().push((id, packet.clone()));
            let behavior = inner.behavior.lock().clone();

            match packet {
                Packet::Connect(_) => queue(
                    &tx,
                    Packet::ConnAck(ConnAck {
                        session_present: behavior.session_present,
                        return_code: behavior.connack,
                    }),
                ),
                Packet::Publish(publish) => {
                    let Some(packet_id) = publish.packet_id else {
                        continue;
                    };
                    match behavior.puback {
                        AckMode::Immediate => queue(&tx, Packet::PubAck(packet_id)),
                        AckMode::Never => {}
                        AckMode::Reversed(batch) => {
                            held.push(packet_id);
                            if held.len() >= batch {
                                for packet_id in held.drain(..).rev() {
                                    queue(&tx, Packet::PubAck(packet_id));
                                }
                            }
                        }
                        AckMode::Malformed => {
                            let _ = tx.send(Bytes::from_static(&[0x00, 0x00]));
                        }
                        AckMode::Delayed(delay) => {
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                queue(&tx, Packet::PubAck(packet_id));
                            });
                        }
                    }
                }
                Packet::Subscribe(subscribe) => {
                    let code = behavior
                        .grant
                        .map_or(SubscribeReturnCode::Failure, SubscribeReturnCode::Granted);
                    queue(
                        &tx,
                        Packet::SubAck(SubAck {
                            packet_id: subscribe.packet_id,
                            return_codes: vec![code; subscribe.filters.len()],
                        }),
                    );
                    if let Some(message) = behavior.deliver_on_subscribe {
                        queue(&tx, Packet::Publish(message));
                    }
                }
                Packet::PingReq if behavior.answer_pings => queue(&tx, Packet::PingResp),
                Packet::Disconnect => return,
                _ => {}
            }
        }

        buffer.bytes_mut().reserve(4096);
        match reader.read_buf(buffer.bytes_mut()).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// What the mock QUIC connector does on `connect`.
#[derive(Clone)]
pub enum QuicMode {
    /// Handshake fails (UDP blocked).
    Fail,
    /// Handshake never completes.
    Hang,
    /// Handshake succeeds and streams go to the broker.
    Accept(Broker),
}

/// Mock QUIC backend.
///
/// Offering a ticket starts the session in 0-RTT. Streams opened before the
/// handshake completes count as early; when the handshake reports 0-RTT as
/// rejected, whatever was written on them never reaches the broker.
pub struct MockQuic {
    mode: QuicMode,
    handshake: Mutex<HandshakeInfo>,
    offered: Mutex<Vec<Option<Vec<u8>>>>,
    closed: Arc<Mutex<Vec<String>>>,
    early_streams: Arc<AtomicUsize>,
}

impl MockQuic {
    pub fn new(mode: QuicMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            handshake: Mutex::new(HandshakeInfo::default()),
            offered: Mutex::new(Vec::new()),
            closed: Arc::new(Mutex::new(Vec::new())),
            early_streams: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Streams opened before a handshake completed.
    pub fn early_streams(&self) -> usize {
        self.early_streams.load(Ordering::SeqCst)
    }

    /// Handshake result reported by the next connections.
    pub fn set_handshake(&self, info: HandshakeInfo) {
        *self.handshake.lock() = info;
    }

    /// Tickets offered on each attempt.
    pub fn offered(&self) -> Vec<Option<Vec<u8>>> {
        self.offered.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.offered.lock().len()
    }

    /// Reasons passed to `close`.
    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().clone()
    }
}

impl QuicConnector for MockQuic {
    fn connect<'a>(
        &'a self,
        _target: &'a ServerTarget,
        ticket: Option<&'a SessionTicket>,
    ) -> BoxFuture<'a, TransportResult<Box<dyn QuicSession>>> {
        Box::pin(async move {
            self.offered
                .lock()
                .push(ticket.map(|t| t.as_bytes().to_vec()));

            match &self.mode {
                QuicMode::Fail => Err(TransportError::QuicConnect("udp blocked".to_owned())),
                QuicMode::Hang => std::future::pending().await,
                QuicMode::Accept(broker) => Ok(Box::new(MockQuicSession {
                    broker: broker.clone(),
                    handshake: self.handshake.lock().clone(),
                    early: ticket.is_some(),
                    completed: AtomicBool::new(false),
                    next_id: AtomicU64::new(0),
                    closed: Arc::clone(&self.closed),
                    early_streams: Arc::clone(&self.early_streams),
                }) as Box<dyn QuicSession>),
            }
        })
    }
}

struct MockQuicSession {
    broker: Broker,
    handshake: HandshakeInfo,
    early: bool,
    completed: AtomicBool,
    next_id: AtomicU64,
    closed: Arc<Mutex<Vec<String>>>,
    early_streams: Arc<AtomicUsize>,
}

impl QuicSession for MockQuicSession {
    fn early_data(&self) -> bool {
        self.early
    }

    fn handshake(&self) -> BoxFuture<'_, HandshakeInfo> {
        self.completed.store(true, Ordering::SeqCst);
        let info = self.handshake.clone();
        Box::pin(async move { info })
    }

    fn open_stream(&self) -> BoxFuture<'_, TransportResult<ByteStream>> {
        // Client-initiated bidirectional stream ids: 0, 4, 8, ...
        let id = self.next_id.fetch_add(4, Ordering::SeqCst);
        let in_early_data = self.early && !self.completed.load(Ordering::SeqCst);
        if in_early_data {
            self.early_streams.fetch_add(1, Ordering::SeqCst);
        }

        let stream = if in_early_data && !self.handshake.zero_rtt_accepted {
            ByteStream::new(id, tokio::io::empty(), tokio::io::sink())
        } else {
            self.broker.accept(id)
        };
        Box::pin(async move { Ok(stream) })
    }

    fn close(&self, reason: &str) {
        self.closed.lock().push(reason.to_owned());
    }
}

/// Mock TCP+TLS backend; `None` refuses every connection.
pub struct MockTls {
    broker: Option<Broker>,
    attempts: AtomicUsize,
}

impl MockTls {
    pub fn new(broker: Option<Broker>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl TcpTlsConnector for MockTls {
    fn connect<'a>(
        &'a self,
        _target: &'a ServerTarget,
    ) -> BoxFuture<'a, TransportResult<ByteStream>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = match &self.broker {
            Some(broker) => Ok(broker.accept(0)),
            None => Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            ))),
        };
        Box::pin(async move { result })
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::builder()
        .client_id("dev-1")
        .credentials("dev-1", "pw")
        .build()
}

pub fn new_client(
    config: ClientConfig,
    quic: Option<Arc<MockQuic>>,
    tls: Option<Arc<MockTls>>,
    store: Option<Arc<dyn SessionStore>>,
) -> (MqttClient, EventReceiver) {
    let transports = Transports {
        quic: quic.map(|q| q as Arc<dyn QuicConnector>),
        tcp_tls: tls.map(|t| t as Arc<dyn TcpTlsConnector>),
        session_store: store,
    };
    MqttClient::with_transports(config, transports)
}
