//! Transport seams consumed by the connection layer.
//!
//! The client never talks to quinn or tokio-rustls directly. It drives the
//! traits below, which the `transport` module implements for real networks
//! and which tests implement over in-memory pipes.

use std::fmt;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::SessionTicket;
use crate::transport::TransportResult;

/// Identifier of a byte stream within one connection.
///
/// For QUIC this is the stream id assigned by the QUIC layer; TCP+TLS has a
/// single stream, [`TCP_STREAM_ID`](super::constants::TCP_STREAM_ID).
pub type StreamId = u64;

/// Read half of a byte stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a byte stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An ordered byte channel: one QUIC bidirectional stream or one TLS session.
pub struct ByteStream {
    /// Stream identifier.
    pub id: StreamId,
    /// Incoming bytes.
    pub reader: BoxedReader,
    /// Outgoing bytes.
    pub writer: BoxedWriter,
}

impl ByteStream {
    /// Bundle the two halves of a stream.
    pub fn new<R, W>(id: StreamId, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").field("id", &self.id).finish()
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    /// Host name or IP literal used for address resolution.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Name presented in SNI and checked against the certificate.
    pub server_name: String,
}

impl ServerTarget {
    /// Target whose server name equals the host.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            server_name: host.clone(),
            host,
            port,
        }
    }
}

/// Outcome of a QUIC handshake, known once it completes.
#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    /// The server resumed a previous TLS session.
    pub session_resumed: bool,
    /// Early data was sent and accepted.
    pub zero_rtt_accepted: bool,
    /// Ticket issued during this handshake, to be persisted for the next one.
    pub issued_ticket: Option<SessionTicket>,
    /// The server declared the offered ticket permanently unusable.
    pub ticket_invalid: bool,
}

/// Establishes QUIC connections.
pub trait QuicConnector: Send + Sync {
    /// Start the QUIC handshake, offering `ticket` for 0-RTT resumption.
    ///
    /// When 0-RTT is attempted the session is returned before the handshake
    /// completes and [`QuicSession::early_data`] is true; otherwise the
    /// handshake has completed. A rejected resumption MUST fall back to a
    /// full handshake inside the connector; only a failed handshake is an
    /// error.
    fn connect<'a>(
        &'a self,
        target: &'a ServerTarget,
        ticket: Option<&'a SessionTicket>,
    ) -> BoxFuture<'a, TransportResult<Box<dyn QuicSession>>>;
}

/// A QUIC connection, possibly still in its 0-RTT phase.
pub trait QuicSession: Send + Sync {
    /// Whether bytes written before [`handshake`](Self::handshake) resolves
    /// travel as 0-RTT early data.
    ///
    /// Early data the server rejects is discarded together with the streams
    /// it was written on.
    fn early_data(&self) -> bool;

    /// Resolve once the handshake has completed.
    fn handshake(&self) -> BoxFuture<'_, HandshakeInfo>;

    /// Open a new bidirectional stream.
    fn open_stream(&self) -> BoxFuture<'_, TransportResult<ByteStream>>;

    /// Close the connection immediately.
    fn close(&self, reason: &str);
}

/// Establishes TCP+TLS connections.
pub trait TcpTlsConnector: Send + Sync {
    /// Connect and complete the TLS handshake.
    fn connect<'a>(&'a self, target: &'a ServerTarget) -> BoxFuture<'a, TransportResult<ByteStream>>;
}
