//! Connection driver
//!
//! One [`Connection`] per accepted MQTT session. It owns:
//!
//! - one reader task per stream, decoding packets from a [`PacketBuffer`]
//! - one writer task per stream, draining a queue of whole encoded packets
//! - a keep-alive task pinging on the primary stream
//! - the [`AckTracker`] and [`StreamMultiplexer`] for this session
//!
//! Callers never write to a stream themselves. A packet handed to the writer
//! task is written in full even if the caller stops waiting for it.
//!
//! Any decode error, I/O error or missed PINGRESP tears the whole connection
//! down: a garbled stream cannot be resynchronised.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::ClientError;
use super::event::{ClientEvent, EventSender, IncomingMessage};
use crate::codec::{
    ConnAck, ConnectReturnCode, Packet, QoS, SubscribeReturnCode, encode_disconnect,
    encode_pingreq, encode_puback, encode_publish, encode_subscribe,
};
use crate::core::{BoxedReader, BoxedWriter, ByteStream, QuicSession, StreamId};
use crate::session::{
    Ack, AckError, AckKind, AckTracker, ConnectionStats, KeepAlive, KeepAliveAction,
};
use crate::stream::{PacketBuffer, StreamMultiplexer};
use crate::transport::{TransportError, TransportKind};

/// Bytes reserved before each read.
const READ_CHUNK: usize = 4096;

/// One encoded packet queued for a stream's writer task.
struct Outgoing {
    bytes: Bytes,
    /// Fired once the whole packet was flushed.
    written: Option<oneshot::Sender<()>>,
}

type Outbox = mpsc::UnboundedSender<Outgoing>;

/// Per-connection settings taken from the client configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    pub keep_alive: Duration,
    pub ack_timeout: Duration,
    pub max_packet_size: usize,
}

/// State shared between the connection handle and its tasks.
struct Shared {
    kind: TransportKind,
    acks: AckTracker,
    keepalive: Mutex<KeepAlive>,
    stats: Arc<Mutex<ConnectionStats>>,
    events: EventSender,
    outboxes: Mutex<HashMap<StreamId, Outbox>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    quic: Option<Arc<dyn QuicSession>>,
    alive: AtomicBool,
    lost_reason: Mutex<Option<String>>,
    max_packet_size: usize,
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Error for an operation on a connection that is gone.
    fn closed_error(&self) -> ClientError {
        match self.lost_reason.lock().clone() {
            Some(reason) => ClientError::ConnectionLost(reason),
            None => ClientError::NotConnected,
        }
    }

    /// Error for an ack wait that was resolved by teardown.
    fn cancelled_error(&self) -> ClientError {
        match self.lost_reason.lock().clone() {
            Some(reason) => ClientError::ConnectionLost(reason),
            None => ClientError::Cancelled,
        }
    }

    /// Queue one encoded packet on `stream` and wait until it is written.
    async fn write(&self, stream: StreamId, bytes: Bytes) -> Result<(), ClientError> {
        if !self.is_alive() {
            return Err(self.closed_error());
        }
        self.send(stream, bytes).await
    }

    /// Like [`write`](Self::write), without checking that the connection is
    /// still alive.
    async fn send(&self, stream: StreamId, bytes: Bytes) -> Result<(), ClientError> {
        let (written, done) = oneshot::channel();
        self.enqueue(stream, bytes, Some(written))?;
        done.await.map_err(|_| self.closed_error())
    }

    /// Queue a packet without waiting for it.
    fn enqueue(
        &self,
        stream: StreamId,
        bytes: Bytes,
        written: Option<oneshot::Sender<()>>,
    ) -> Result<(), ClientError> {
        let outbox = self
            .outboxes
            .lock()
            .get(&stream)
            .cloned()
            .ok_or(ClientError::Transport(TransportError::StreamClosed))?;
        outbox
            .send(Outgoing { bytes, written })
            .map_err(|_| ClientError::Transport(TransportError::StreamClosed))
    }

    /// Register a stream and start its reader and writer tasks.
    fn attach(self: &Arc<Self>, stream: ByteStream, buffer: PacketBuffer) {
        let ByteStream { id, reader, writer } = stream;
        let (outbox, queue) = mpsc::unbounded_channel();
        self.outboxes.lock().insert(id, outbox);

        let reading = tokio::spawn(read_loop(Arc::clone(self), id, reader, buffer));
        let writing = tokio::spawn(write_loop(Arc::clone(self), id, writer, queue));
        self.tasks.lock().extend([reading, writing]);

        // Lost the race with a teardown
        if !self.is_alive() {
            self.outboxes.lock().clear();
            self.abort_tasks();
        }
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Drop the connection after a failure and report it.
    fn fail(&self, reason: String) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(transport = %self.kind, %reason, "connection lost");
        *self.lost_reason.lock() = Some(reason.clone());
        self.teardown(&reason);
        let _ = self.events.send(ClientEvent::ConnectionLost { reason });
    }

    /// Release everything the connection holds. Callers flip `alive` first.
    fn teardown(&self, reason: &str) {
        let cancelled = self.acks.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending acknowledgments");
        }
        self.stats.lock().on_disconnected();
        if let Some(quic) = &self.quic {
            quic.close(reason);
        }
        self.outboxes.lock().clear();
        self.abort_tasks();
    }

    fn handle_packet(&self, stream: StreamId, packet: Packet) -> Result<(), String> {
        let now = Instant::now();
        match packet {
            Packet::Publish(publish) => {
                self.stats
                    .lock()
                    .on_message_received(publish.payload.len(), now);
                tracing::trace!(stream_id = stream, topic = %publish.topic, qos = publish.qos.as_u8(), "message received");

                let packet_id = publish.packet_id;
                let _ = self.events.send(ClientEvent::Message(IncomingMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos: publish.qos,
                    retain: publish.retain,
                    stream_id: stream,
                }));

                // Acknowledge on the stream the message arrived on
                if let Some(id) = packet_id {
                    self.enqueue(stream, encode_puback(id), None)
                        .map_err(|e| e.to_string())?;
                }
            }
            Packet::PubAck(id) => {
                if let Some(latency) = self.acks.on_puback(id) {
                    self.stats.lock().ack_latency.record(latency);
                }
            }
            Packet::SubAck(suback) => {
                if let Some(latency) = self.acks.on_suback(suback.packet_id, suback.return_codes) {
                    self.stats.lock().ack_latency.record(latency);
                }
            }
            Packet::PingResp => {
                self.keepalive.lock().on_pingresp();
                self.stats.lock().touch(now);
            }
            other => return Err(format!("unexpected {} from broker", other.name())),
        }
        Ok(())
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    stream: StreamId,
    mut reader: BoxedReader,
    mut buffer: PacketBuffer,
) {
    loop {
        loop {
            match buffer.next_packet() {
                Ok(Some(packet)) => {
                    if let Err(reason) = shared.handle_packet(stream, packet) {
                        shared.fail(reason);
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(stream_id = stream, error = %e, "malformed packet from broker");
                    shared.fail(format!("decode error on stream {stream}: {e}"));
                    return;
                }
            }
        }

        buffer.bytes_mut().reserve(READ_CHUNK);
        match reader.read_buf(buffer.bytes_mut()).await {
            Ok(0) => {
                shared.fail(format!("stream {stream} closed by broker"));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                shared.fail(format!("read on stream {stream} failed: {e}"));
                return;
            }
        }
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    stream: StreamId,
    mut writer: BoxedWriter,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(Outgoing { bytes, written }) = queue.recv().await {
        let result = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            shared.fail(format!("write on stream {stream} failed: {e}"));
            return;
        }
        shared.keepalive.lock().on_packet_sent(Instant::now());
        if let Some(written) = written {
            let _ = written.send(());
        }
    }
}

async fn keepalive_loop(shared: Arc<Shared>, primary: StreamId) {
    loop {
        let action = shared.keepalive.lock().poll(Instant::now());
        match action {
            KeepAliveAction::WaitUntil(deadline) => tokio::time::sleep_until(deadline).await,
            KeepAliveAction::SendPing => {
                tracing::trace!("sending PINGREQ");
                // Recorded first so a fast PINGRESP is not missed
                shared.keepalive.lock().on_ping_sent(Instant::now());
                if shared.write(primary, encode_pingreq()).await.is_err() {
                    return;
                }
            }
            KeepAliveAction::Dead => {
                shared.fail("no PINGRESP within the keep-alive grace period".to_owned());
                return;
            }
            KeepAliveAction::Disabled => return,
        }
    }
}

/// Write CONNECT straight to a stream that has no writer task yet.
pub(crate) async fn send_connect(
    stream: &mut ByteStream,
    connect: &[u8],
) -> Result<(), ClientError> {
    stream
        .writer
        .write_all(connect)
        .await
        .map_err(TransportError::from)?;
    stream.writer.flush().await.map_err(TransportError::from)?;
    Ok(())
}

/// Read packets until the first one arrives.
async fn read_first_packet(
    reader: &mut BoxedReader,
    buffer: &mut PacketBuffer,
) -> Result<Packet, ClientError> {
    loop {
        if let Some(packet) = buffer.next_packet()? {
            return Ok(packet);
        }
        buffer.bytes_mut().reserve(READ_CHUNK);
        if reader
            .read_buf(buffer.bytes_mut())
            .await
            .map_err(TransportError::from)?
            == 0
        {
            return Err(TransportError::StreamClosed.into());
        }
    }
}

/// An accepted MQTT session over one transport.
pub(crate) struct Connection {
    shared: Arc<Shared>,
    streams: tokio::sync::Mutex<StreamMultiplexer>,
    primary: StreamId,
    session_present: bool,
    ack_timeout: Duration,
}

impl Connection {
    /// Send CONNECT on `primary`, wait for CONNACK and start the tasks.
    ///
    /// `connect` is `None` when CONNECT already went out as early data.
    pub(crate) async fn establish(
        kind: TransportKind,
        mut primary: ByteStream,
        quic: Option<Arc<dyn QuicSession>>,
        connect: Option<Bytes>,
        settings: ConnectionSettings,
        stats: Arc<Mutex<ConnectionStats>>,
        events: EventSender,
    ) -> Result<Self, ClientError> {
        if let Some(connect) = connect {
            send_connect(&mut primary, &connect).await?;
        }
        let ByteStream {
            id: primary_id,
            mut reader,
            writer,
        } = primary;

        let mut buffer = PacketBuffer::new(settings.max_packet_size);
        let connack = match read_first_packet(&mut reader, &mut buffer).await? {
            Packet::ConnAck(connack) => connack,
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected CONNACK, got {}",
                    other.name()
                )));
            }
        };
        check_connack(&connack)?;
        tracing::debug!(transport = %kind, session_present = connack.session_present, "CONNACK accepted");

        let shared = Arc::new(Shared {
            kind,
            acks: AckTracker::new(),
            keepalive: Mutex::new(KeepAlive::new(settings.keep_alive, Instant::now())),
            stats,
            events,
            outboxes: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            quic,
            alive: AtomicBool::new(true),
            lost_reason: Mutex::new(None),
            max_packet_size: settings.max_packet_size,
        });

        shared.attach(ByteStream::new(primary_id, reader, writer), buffer);
        let keepalive = tokio::spawn(keepalive_loop(Arc::clone(&shared), primary_id));
        shared.tasks.lock().push(keepalive);

        Ok(Self {
            shared,
            streams: tokio::sync::Mutex::new(StreamMultiplexer::new(primary_id)),
            primary: primary_id,
            session_present: connack.session_present,
            ack_timeout: settings.ack_timeout,
        })
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.shared.kind
    }

    pub(crate) fn session_present(&self) -> bool {
        self.session_present
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Stream for a publish on `topic`; dedicated streams only exist on QUIC.
    async fn stream_for(&self, topic: &str, dedicated: bool) -> Result<StreamId, ClientError> {
        let Some(quic) = self.shared.quic.clone() else {
            return Ok(self.primary);
        };
        let shared = &self.shared;

        let mut streams = self.streams.lock().await;
        streams
            .stream_for_topic(topic, dedicated, || async move {
                let stream = quic.open_stream().await?;
                let id = stream.id;
                shared.attach(stream, PacketBuffer::new(shared.max_packet_size));
                tracing::debug!(stream_id = id, topic, "opened dedicated stream");
                Ok::<_, ClientError>(id)
            })
            .await
    }

    /// Publish and, for QoS 1, wait for the PUBACK.
    pub(crate) async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        dedicated: bool,
    ) -> Result<(), ClientError> {
        if !self.is_alive() {
            return Err(self.shared.closed_error());
        }
        let stream = self.stream_for(topic, dedicated).await?;

        if qos == QoS::AtMostOnce {
            self.shared
                .write(stream, encode_publish(topic, payload, qos, None)?)
                .await?;
            self.record_sent(payload.len());
            return Ok(());
        }

        let acks = &self.shared.acks;
        let handle = acks
            .allocate_and_register(AckKind::PubAck)
            .ok_or(ClientError::PacketIdsExhausted)?;
        let packet_id = handle.packet_id();

        // Dropping `handle` on any early return releases the packet id
        let bytes = encode_publish(topic, payload, qos, Some(packet_id))?;
        self.shared.write(stream, bytes).await?;
        self.record_sent(payload.len());
        tracing::trace!(packet_id, stream_id = stream, topic, "publish sent, awaiting PUBACK");

        match acks.await_with_timeout(handle, self.ack_timeout).await {
            Ok(_) => Ok(()),
            Err(AckError::Timeout { packet_id }) => Err(ClientError::PublishTimeout { packet_id }),
            Err(AckError::Cancelled) => Err(self.shared.cancelled_error()),
        }
    }

    /// Subscribe on the primary stream and return the granted QoS.
    pub(crate) async fn subscribe(&self, filter: &str, qos: QoS) -> Result<QoS, ClientError> {
        if !self.is_alive() {
            return Err(self.shared.closed_error());
        }

        let acks = &self.shared.acks;
        let handle = acks
            .allocate_and_register(AckKind::SubAck)
            .ok_or(ClientError::PacketIdsExhausted)?;
        let packet_id = handle.packet_id();

        let bytes = encode_subscribe(filter, qos, packet_id)?;
        self.shared.write(self.primary, bytes).await?;

        let codes = match acks.await_with_timeout(handle, self.ack_timeout).await {
            Ok(Ack::SubAck(codes)) => codes,
            Ok(Ack::PubAck) => {
                return Err(ClientError::Protocol("PUBACK resolved a subscribe".to_owned()));
            }
            Err(AckError::Timeout { packet_id }) => {
                return Err(ClientError::SubscribeTimeout { packet_id });
            }
            Err(AckError::Cancelled) => return Err(self.shared.cancelled_error()),
        };

        match codes.first() {
            Some(SubscribeReturnCode::Granted(granted)) => {
                tracing::debug!(filter, granted = granted.as_u8(), "subscribed");
                Ok(*granted)
            }
            _ => Err(ClientError::SubscribeRejected {
                filter: filter.to_owned(),
            }),
        }
    }

    /// Send DISCONNECT and release the connection. Pending acks resolve as
    /// cancelled.
    pub(crate) async fn close(&self) {
        // Flipped first so the broker closing the stream is not a failure
        if !self.shared.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.shared.send(self.primary, encode_disconnect()).await {
            tracing::debug!(error = %e, "DISCONNECT not delivered");
        }
        self.shared.teardown("client disconnect");
    }

    fn record_sent(&self, payload_len: usize) {
        self.shared
            .stats
            .lock()
            .on_message_sent(payload_len, Instant::now());
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.shared.alive.swap(false, Ordering::AcqRel) {
            self.shared.teardown("connection dropped");
        }
    }
}

/// Map a CONNACK return code to the connect outcome.
fn check_connack(connack: &ConnAck) -> Result<(), ClientError> {
    match connack.return_code {
        ConnectReturnCode::Accepted => Ok(()),
        code if code.is_auth_failure() => {
            tracing::warn!(%code, "broker rejected credentials");
            Err(ClientError::AuthenticationRejected(code))
        }
        code => {
            tracing::warn!(%code, "broker refused connection");
            Err(ClientError::ConnectionRefused(code))
        }
    }
}
