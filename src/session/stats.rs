//! Connection statistics.

use std::time::Duration;

use tokio::time::Instant;

use crate::transport::TransportKind;

/// Ack round-trip samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    /// Number of samples.
    pub samples: u64,
    /// Fastest ack.
    pub min: Option<Duration>,
    /// Slowest ack.
    pub max: Option<Duration>,
    total: Duration,
}

impl LatencyStats {
    /// Add one sample.
    pub fn record(&mut self, sample: Duration) {
        self.samples += 1;
        self.total += sample;
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        self.max = Some(self.max.map_or(sample, |m| m.max(sample)));
    }

    /// Mean over all samples.
    pub fn average(&self) -> Option<Duration> {
        if self.samples == 0 {
            return None;
        }
        let nanos = self.total.as_nanos() / u128::from(self.samples);
        Some(Duration::from_nanos(nanos as u64))
    }
}

/// Snapshot of a client's connection statistics.
///
/// Counters accumulate across reconnects; `connected`, `transport` and the
/// handshake flags describe the current connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Transport of the current or last connection.
    pub transport: Option<TransportKind>,
    /// A connection is established.
    pub connected: bool,
    /// Successful connects after the first.
    pub reconnect_count: u32,
    /// PUBLISH packets sent.
    pub messages_sent: u64,
    /// PUBLISH packets received.
    pub messages_received: u64,
    /// Payload bytes sent.
    pub bytes_sent: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// The current QUIC connection used accepted 0-RTT.
    pub zero_rtt_used: bool,
    /// The current QUIC connection resumed a TLS session.
    pub session_resumed: bool,
    /// Connections established over QUIC.
    pub quic_connections: u32,
    /// Connections established over TCP+TLS.
    pub tcp_connections: u32,
    /// When the current connection was established.
    pub connected_since: Option<Instant>,
    /// Last packet sent or received.
    pub last_activity: Option<Instant>,
    /// PUBACK/SUBACK round trips.
    pub ack_latency: LatencyStats,
}

impl ConnectionStats {
    /// Record an established connection.
    pub fn on_connected(
        &mut self,
        transport: TransportKind,
        zero_rtt_used: bool,
        session_resumed: bool,
        now: Instant,
    ) {
        if self.quic_connections + self.tcp_connections > 0 {
            self.reconnect_count += 1;
        }
        match transport {
            TransportKind::Quic => self.quic_connections += 1,
            TransportKind::TcpTls => self.tcp_connections += 1,
        }
        self.transport = Some(transport);
        self.connected = true;
        self.zero_rtt_used = zero_rtt_used;
        self.session_resumed = session_resumed;
        self.connected_since = Some(now);
        self.last_activity = Some(now);
    }

    /// Record the end of the current connection.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.connected_since = None;
    }

    /// Record an outgoing PUBLISH.
    pub fn on_message_sent(&mut self, payload_len: usize, now: Instant) {
        self.messages_sent += 1;
        self.bytes_sent += payload_len as u64;
        self.last_activity = Some(now);
    }

    /// Record an incoming PUBLISH.
    pub fn on_message_received(&mut self, payload_len: usize, now: Instant) {
        self.messages_received += 1;
        self.bytes_received += payload_len as u64;
        self.last_activity = Some(now);
    }

    /// Record any other packet activity.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Time since the current connection was established.
    pub fn uptime(&self, now: Instant) -> Option<Duration> {
        self.connected_since.map(|since| now.saturating_duration_since(since))
    }
}
