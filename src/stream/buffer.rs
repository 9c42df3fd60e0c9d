//! Per-stream receive buffer.

use bytes::{Buf, BytesMut};

use crate::codec::{Packet, decode_packet, try_decode_packet_with_limit};
use crate::core::DecodeError;
use crate::core::constants::DEFAULT_MAX_PACKET_SIZE;

/// Accumulates bytes read from one stream and yields complete packets.
///
/// Any decode error leaves the buffer in an unknown position; the stream
/// cannot be resynchronised and the owner must drop the connection.
#[derive(Debug)]
pub struct PacketBuffer {
    buf: BytesMut,
    max_packet_size: usize,
}

impl PacketBuffer {
    /// Create a buffer that rejects packet bodies above `max_packet_size`.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_packet_size,
        }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mutable access for reading directly into the buffer.
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Decode the next complete packet, or `Ok(None)` if more bytes are needed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        let (packet, consumed) = match try_decode_packet_with_limit(&self.buf, self.max_packet_size)? {
            Some(raw) => (decode_packet(&raw)?, raw.consumed),
            None => return Ok(None),
        };
        self.buf.advance(consumed);
        Ok(Some(packet))
    }

    /// Bytes held but not yet decoded.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// No buffered bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}
