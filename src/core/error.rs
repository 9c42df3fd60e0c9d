//! Error types for the packet codec.
//!
//! "Need more bytes" is not an error: decoders report it as `Ok(None)`.

use thiserror::Error;

/// Errors that can occur when encoding a packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A length-prefixed field does not fit its 16-bit length prefix.
    #[error("{field} is {len} bytes, exceeds the 65535 byte limit")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual length in bytes.
        len: usize,
    },

    /// The remaining length does not fit the four-byte encoding.
    #[error("packet body of {0} bytes exceeds the maximum remaining length")]
    PacketTooLarge(usize),

    /// QoS level that this client does not speak.
    #[error("unsupported QoS level {0}")]
    UnsupportedQos(u8),
}

/// Errors that can occur when decoding a packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Remaining length uses more than four bytes.
    #[error("malformed remaining length")]
    MalformedRemainingLength,

    /// Unknown or reserved packet type.
    #[error("invalid packet type 0x{0:02x}")]
    InvalidPacketType(u8),

    /// Fixed-header flags not permitted for the packet type.
    #[error("invalid fixed header flags 0x{0:02x}")]
    InvalidHeaderFlags(u8),

    /// Body ended before a field was complete.
    #[error("unexpected end of packet")]
    UnexpectedEof,

    /// Body carries bytes after the last field.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// QoS bits carry an unsupported or reserved value.
    #[error("invalid QoS level {0}")]
    InvalidQos(u8),

    /// CONNACK return code outside 0..=5.
    #[error("invalid CONNACK return code {0}")]
    InvalidReturnCode(u8),

    /// CONNECT carries a protocol name or level other than MQTT 3.1.1.
    #[error("unsupported protocol {name} level {level}")]
    UnsupportedProtocol {
        /// Protocol name.
        name: String,
        /// Protocol level.
        level: u8,
    },

    /// CONNECT flags use the reserved bit or request a will message.
    #[error("unsupported CONNECT flags 0x{0:02x}")]
    InvalidConnectFlags(u8),

    /// Packet identifier zero where a non-zero id is required.
    #[error("packet identifier 0 is reserved")]
    ZeroPacketId,

    /// Packet announces a body larger than the receiver accepts.
    #[error("packet of {len} bytes exceeds the {max} byte limit")]
    PacketTooLarge {
        /// Announced packet size.
        len: usize,
        /// Configured limit.
        max: usize,
    },
}
