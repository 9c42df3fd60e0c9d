//! Protocol constants for MQTT 3.1.1 framed over QUIC and TCP+TLS.
//!
//! Wire values are fixed by MQTT 3.1.1 and MUST NOT be changed. Timing
//! values are client defaults and can be overridden through
//! [`ClientConfig`](crate::client::ClientConfig).

use std::time::Duration;

// =============================================================================
// FIXED HEADER (MQTT 3.1.1 section 2.2)
// =============================================================================

/// CONNECT fixed header byte.
pub const CONNECT: u8 = 0x10;

/// CONNACK packet type (high nibble).
pub const CONNACK: u8 = 0x20;

/// PUBLISH packet type (high nibble; low bits carry DUP/QoS/RETAIN).
pub const PUBLISH: u8 = 0x30;

/// PUBACK packet type (high nibble).
pub const PUBACK: u8 = 0x40;

/// SUBSCRIBE fixed header byte (reserved flags `0b0010`).
pub const SUBSCRIBE: u8 = 0x82;

/// SUBACK packet type (high nibble).
pub const SUBACK: u8 = 0x90;

/// PINGREQ packet type (high nibble).
pub const PINGREQ: u8 = 0xC0;

/// PINGRESP packet type (high nibble).
pub const PINGRESP: u8 = 0xD0;

/// DISCONNECT packet type (high nibble).
pub const DISCONNECT: u8 = 0xE0;

/// Mask selecting the packet type from the first header byte.
pub const PACKET_TYPE_MASK: u8 = 0xF0;

/// Minimum packet size: one header byte plus one remaining-length byte.
pub const MIN_PACKET_SIZE: usize = 2;

// =============================================================================
// VARIABLE HEADER (MQTT 3.1.1 section 3.1.2)
// =============================================================================

/// Protocol name carried in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// CONNECT flag: username present.
pub const CONNECT_FLAG_USERNAME: u8 = 0x80;

/// CONNECT flag: password present.
pub const CONNECT_FLAG_PASSWORD: u8 = 0x40;

/// CONNECT flag: clean session.
pub const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;

/// SUBACK return code signalling a rejected subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

// =============================================================================
// LIMITS
// =============================================================================

/// Largest length a UTF-8 or binary field can carry (16-bit prefix).
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Largest value representable by the four-byte remaining-length encoding.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Maximum number of bytes in a remaining-length field.
pub const MAX_REMAINING_LENGTH_BYTES: usize = 4;

/// Default cap on the size of a single incoming packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

// =============================================================================
// TRANSPORT
// =============================================================================

/// ALPN protocol identifier negotiated for MQTT over QUIC.
pub const ALPN_MQTT: &[u8] = b"mqtt";

/// Default broker host.
pub const DEFAULT_HOST: &str = "mqtt.tesaiot.com";

/// Default QUIC (UDP) broker port.
pub const DEFAULT_QUIC_PORT: u16 = 14567;

/// Default TCP+TLS broker port.
pub const DEFAULT_TCP_PORT: u16 = 8884;

/// Stream identifier used for the single TCP+TLS byte stream.
pub const TCP_STREAM_ID: u64 = 0;

// =============================================================================
// TIMING
// =============================================================================

/// Default keep-alive interval negotiated in CONNECT.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Time allowed for the QUIC path (handshake + CONNECT/CONNACK).
pub const QUIC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the TCP+TLS fallback path.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for a PUBACK or SUBACK to arrive.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// RECONNECTION
// =============================================================================

/// First reconnect delay.
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single reconnect delay (before jitter).
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Reconnect attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
