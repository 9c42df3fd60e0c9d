//! Streaming packet decoder.
//!
//! [`try_decode_packet`] frames one packet out of a receive buffer without
//! mutating it; [`decode_packet`] turns the framed bytes into a [`Packet`].

use bytes::Bytes;

use super::packet::{
    ConnAck, Connect, ConnectReturnCode, Packet, Publish, QoS, SubAck, Subscribe,
    SubscribeFilter, SubscribeReturnCode,
};
use super::remaining_length::decode_remaining_length;
use crate::core::DecodeError;
use crate::core::constants::{
    CONNACK, CONNECT, CONNECT_FLAG_CLEAN_SESSION, CONNECT_FLAG_PASSWORD, CONNECT_FLAG_USERNAME,
    DISCONNECT, MAX_REMAINING_LENGTH, MIN_PACKET_SIZE, PACKET_TYPE_MASK, PINGREQ, PINGRESP,
    PROTOCOL_LEVEL, PROTOCOL_NAME, PUBACK, PUBLISH, SUBACK, SUBACK_FAILURE, SUBSCRIBE,
};

/// One complete packet framed out of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPacket<'a> {
    /// First header byte: packet type and flags.
    pub header: u8,
    /// Bytes after the remaining-length field.
    pub body: &'a [u8],
    /// Total bytes the packet occupies, header included.
    pub consumed: usize,
}

impl RawPacket<'_> {
    /// Packet type (high nibble of the header byte).
    pub fn packet_type(&self) -> u8 {
        self.header & PACKET_TYPE_MASK
    }

    /// Fixed-header flags (low nibble).
    pub fn flags(&self) -> u8 {
        self.header & 0x0F
    }
}

/// Frame one packet from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds less than a complete packet. The input
/// is never modified; callers drop `consumed` bytes once they are done.
pub fn try_decode_packet(buf: &[u8]) -> Result<Option<RawPacket<'_>>, DecodeError> {
    try_decode_packet_with_limit(buf, MAX_REMAINING_LENGTH)
}

/// Like [`try_decode_packet`] but rejects packets whose body exceeds `max_body`.
///
/// The limit is checked as soon as the remaining length is known, before the
/// body arrives.
pub fn try_decode_packet_with_limit(
    buf: &[u8],
    max_body: usize,
) -> Result<Option<RawPacket<'_>>, DecodeError> {
    if buf.len() < MIN_PACKET_SIZE {
        return Ok(None);
    }

    let Some((remaining, len_bytes)) = decode_remaining_length(buf, 1)? else {
        return Ok(None);
    };
    if remaining > max_body {
        return Err(DecodeError::PacketTooLarge {
            len: remaining,
            max: max_body,
        });
    }

    let start = 1 + len_bytes;
    let end = start + remaining;
    if buf.len() < end {
        return Ok(None);
    }

    Ok(Some(RawPacket {
        header: buf[0],
        body: &buf[start..end],
        consumed: end,
    }))
}

/// Parse a framed packet.
pub fn decode_packet(raw: &RawPacket<'_>) -> Result<Packet, DecodeError> {
    let mut r = Reader::new(raw.body);
    let flags = raw.flags();

    let packet = match raw.packet_type() {
        CONNECT => {
            expect_flags(raw.header, flags, 0)?;
            Packet::Connect(decode_connect(&mut r)?)
        }
        CONNACK => {
            expect_flags(raw.header, flags, 0)?;
            let ack_flags = r.u8()?;
            let return_code = ConnectReturnCode::from_u8(r.u8()?)?;
            Packet::ConnAck(ConnAck {
                session_present: ack_flags & 0x01 != 0,
                return_code,
            })
        }
        PUBLISH => Packet::Publish(decode_publish(flags, &mut r)?),
        PUBACK => {
            expect_flags(raw.header, flags, 0)?;
            Packet::PubAck(r.packet_id()?)
        }
        t if t == SUBSCRIBE & PACKET_TYPE_MASK => {
            expect_flags(raw.header, flags, SUBSCRIBE & 0x0F)?;
            Packet::Subscribe(decode_subscribe(&mut r)?)
        }
        SUBACK => {
            expect_flags(raw.header, flags, 0)?;
            Packet::SubAck(decode_suback(&mut r)?)
        }
        PINGREQ => {
            expect_flags(raw.header, flags, 0)?;
            Packet::PingReq
        }
        PINGRESP => {
            expect_flags(raw.header, flags, 0)?;
            Packet::PingResp
        }
        DISCONNECT => {
            expect_flags(raw.header, flags, 0)?;
            Packet::Disconnect
        }
        _ => return Err(DecodeError::InvalidPacketType(raw.header)),
    };

    r.finish()?;
    Ok(packet)
}

impl Packet {
    /// Decode the packet at the front of `buf`.
    ///
    /// Returns the packet and the number of bytes it occupied, or `Ok(None)`
    /// when more bytes are needed.
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        match try_decode_packet(buf)? {
            Some(raw) => Ok(Some((decode_packet(&raw)?, raw.consumed))),
            None => Ok(None),
        }
    }
}

fn expect_flags(header: u8, flags: u8, expected: u8) -> Result<(), DecodeError> {
    if flags == expected {
        Ok(())
    } else {
        Err(DecodeError::InvalidHeaderFlags(header))
    }
}

fn decode_connect(r: &mut Reader<'_>) -> Result<Connect, DecodeError> {
    let name = r.string("protocol name")?;
    let level = r.u8()?;
    if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
        return Err(DecodeError::UnsupportedProtocol { name, level });
    }

    let flags = r.u8()?;
    let known = CONNECT_FLAG_USERNAME | CONNECT_FLAG_PASSWORD | CONNECT_FLAG_CLEAN_SESSION;
    // Will messages are never sent; a password requires a username in 3.1.1
    if flags & !known != 0
        || (flags & CONNECT_FLAG_PASSWORD != 0 && flags & CONNECT_FLAG_USERNAME == 0)
    {
        return Err(DecodeError::InvalidConnectFlags(flags));
    }

    let keep_alive = r.u16()?;
    let client_id = r.string("client id")?;
    let username = if flags & CONNECT_FLAG_USERNAME != 0 {
        Some(r.string("username")?)
    } else {
        None
    };
    let password = if flags & CONNECT_FLAG_PASSWORD != 0 {
        Some(Bytes::copy_from_slice(r.field()?))
    } else {
        None
    };

    Ok(Connect {
        client_id,
        username,
        password,
        keep_alive,
        clean_session: flags & CONNECT_FLAG_CLEAN_SESSION != 0,
    })
}

fn decode_publish(flags: u8, r: &mut Reader<'_>) -> Result<Publish, DecodeError> {
    let qos = QoS::from_u8((flags >> 1) & 0x03)?;
    let topic = r.string("topic")?;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce => Some(r.packet_id()?),
    };

    Ok(Publish {
        topic,
        payload: Bytes::copy_from_slice(r.rest()),
        qos,
        packet_id,
        retain: flags & 0x01 != 0,
        dup: flags & 0x08 != 0,
    })
}

fn decode_subscribe(r: &mut Reader<'_>) -> Result<Subscribe, DecodeError> {
    let packet_id = r.packet_id()?;
    let mut filters = Vec::new();
    while !r.is_empty() {
        let filter = r.string("topic filter")?;
        let qos = QoS::from_u8(r.u8()?)?;
        filters.push(SubscribeFilter { filter, qos });
    }
    if filters.is_empty() {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(Subscribe { packet_id, filters })
}

fn decode_suback(r: &mut Reader<'_>) -> Result<SubAck, DecodeError> {
    let packet_id = r.packet_id()?;
    let mut return_codes = Vec::new();
    while !r.is_empty() {
        let code = match r.u8()? {
            SUBACK_FAILURE => SubscribeReturnCode::Failure,
            granted @ (0 | 1) => SubscribeReturnCode::Granted(QoS::from_u8(granted)?),
            other => return Err(DecodeError::InvalidReturnCode(other)),
        };
        return_codes.push(code);
    }
    if return_codes.is_empty() {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(SubAck {
        packet_id,
        return_codes,
    })
}

/// Bounds-checked cursor over a packet body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::UnexpectedEof)?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn packet_id(&mut self) -> Result<u16, DecodeError> {
        match self.u16()? {
            0 => Err(DecodeError::ZeroPacketId),
            id => Ok(id),
        }
    }

    fn field(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn string(&mut self, what: &'static str) -> Result<String, DecodeError> {
        let bytes = self.field()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8(what))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
