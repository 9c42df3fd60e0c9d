//! Packet encoding.
//!
//! Every encoder produces one complete packet: fixed header, remaining
//! length, variable header and payload.

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::{
    ConnAck, Connect, Packet, Publish, QoS, SubAck, Subscribe, SubscribeFilter,
    SubscribeReturnCode,
};
use super::remaining_length::{encode_remaining_length, remaining_length_size};
use crate::core::EncodeError;
use crate::core::constants::{
    CONNACK, CONNECT, CONNECT_FLAG_CLEAN_SESSION, CONNECT_FLAG_PASSWORD, CONNECT_FLAG_USERNAME,
    DISCONNECT, MAX_FIELD_LEN, PINGREQ, PINGRESP, PROTOCOL_LEVEL, PROTOCOL_NAME, PUBACK, PUBLISH,
    SUBACK, SUBACK_FAILURE, SUBSCRIBE,
};

/// Size of a length-prefixed field.
fn field_size(field: &'static str, bytes: &[u8]) -> Result<usize, EncodeError> {
    if bytes.len() > MAX_FIELD_LEN {
        return Err(EncodeError::FieldTooLong {
            field,
            len: bytes.len(),
        });
    }
    Ok(2 + bytes.len())
}

/// Write a field with its 16-bit big-endian length prefix.
///
/// Callers size-check with [`field_size`] first.
fn put_field(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

/// Allocate a buffer and write the fixed header.
fn start_packet(header: u8, remaining: usize) -> Result<BytesMut, EncodeError> {
    let mut buf = BytesMut::with_capacity(1 + remaining_length_size(remaining) + remaining);
    buf.put_u8(header);
    encode_remaining_length(remaining, &mut buf)?;
    Ok(buf)
}

/// Encode a CONNECT packet.
///
/// Fails with [`EncodeError::FieldTooLong`] when any field exceeds 65535 bytes.
pub fn encode_connect(
    client_id: &str,
    username: Option<&str>,
    password: Option<&[u8]>,
    keep_alive: u16,
    clean_session: bool,
) -> Result<Bytes, EncodeError> {
    let mut flags = 0u8;
    if username.is_some() {
        flags |= CONNECT_FLAG_USERNAME;
    }
    if password.is_some() {
        flags |= CONNECT_FLAG_PASSWORD;
    }
    if clean_session {
        flags |= CONNECT_FLAG_CLEAN_SESSION;
    }

    // protocol name + level + flags + keep-alive
    let mut remaining = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
    remaining += field_size("client id", client_id.as_bytes())?;
    if let Some(username) = username {
        remaining += field_size("username", username.as_bytes())?;
    }
    if let Some(password) = password {
        remaining += field_size("password", password)?;
    }

    let mut buf = start_packet(CONNECT, remaining)?;
    put_field(&mut buf, PROTOCOL_NAME.as_bytes());
    buf.put_u8(PROTOCOL_LEVEL);
    buf.put_u8(flags);
    buf.put_u16(keep_alive);
    put_field(&mut buf, client_id.as_bytes());
    if let Some(username) = username {
        put_field(&mut buf, username.as_bytes());
    }
    if let Some(password) = password {
        put_field(&mut buf, password);
    }
    Ok(buf.freeze())
}

/// Encode a PUBLISH packet with DUP and RETAIN cleared.
///
/// # Panics
///
/// If `packet_id` is absent for QoS 1 or present for QoS 0. This is a
/// caller bug, not a wire condition.
pub fn encode_publish(
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: Option<u16>,
) -> Result<Bytes, EncodeError> {
    encode_publish_flags(topic, payload, qos, packet_id, false, false)
}

fn encode_publish_flags(
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: Option<u16>,
    retain: bool,
    dup: bool,
) -> Result<Bytes, EncodeError> {
    assert_eq!(
        qos != QoS::AtMostOnce,
        packet_id.is_some(),
        "packet identifier must be present exactly when QoS > 0"
    );
    debug_assert_ne!(packet_id, Some(0), "packet identifier 0 is reserved");

    let mut remaining = field_size("topic", topic.as_bytes())? + payload.len();
    if packet_id.is_some() {
        remaining += 2;
    }

    let mut header = PUBLISH | (qos.as_u8() << 1);
    if retain {
        header |= 0x01;
    }
    if dup {
        header |= 0x08;
    }

    let mut buf = start_packet(header, remaining)?;
    put_field(&mut buf, topic.as_bytes());
    if let Some(id) = packet_id {
        buf.put_u16(id);
    }
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode a single-filter SUBSCRIBE packet.
pub fn encode_subscribe(topic: &str, qos: QoS, packet_id: u16) -> Result<Bytes, EncodeError> {
    let filter = SubscribeFilter {
        filter: topic.to_owned(),
        qos,
    };
    encode_subscribe_filters(packet_id, std::slice::from_ref(&filter))
}

fn encode_subscribe_filters(
    packet_id: u16,
    filters: &[SubscribeFilter],
) -> Result<Bytes, EncodeError> {
    let mut remaining = 2;
    for f in filters {
        remaining += field_size("topic filter", f.filter.as_bytes())? + 1;
    }

    let mut buf = start_packet(SUBSCRIBE, remaining)?;
    buf.put_u16(packet_id);
    for f in filters {
        put_field(&mut buf, f.filter.as_bytes());
        buf.put_u8(f.qos.as_u8());
    }
    Ok(buf.freeze())
}

/// Encode a PUBACK packet.
pub fn encode_puback(packet_id: u16) -> Bytes {
    let [hi, lo] = packet_id.to_be_bytes();
    Bytes::copy_from_slice(&[PUBACK, 0x02, hi, lo])
}

/// Encode a PINGREQ packet.
pub fn encode_pingreq() -> Bytes {
    Bytes::from_static(&[PINGREQ, 0x00])
}

/// Encode a DISCONNECT packet.
pub fn encode_disconnect() -> Bytes {
    Bytes::from_static(&[DISCONNECT, 0x00])
}

fn encode_connack(connack: &ConnAck) -> Bytes {
    Bytes::copy_from_slice(&[
        CONNACK,
        0x02,
        u8::from(connack.session_present),
        connack.return_code.as_u8(),
    ])
}

fn encode_suback(suback: &SubAck) -> Result<Bytes, EncodeError> {
    let mut buf = start_packet(SUBACK, 2 + suback.return_codes.len())?;
    buf.put_u16(suback.packet_id);
    for code in &suback.return_codes {
        buf.put_u8(match code {
            SubscribeReturnCode::Granted(qos) => qos.as_u8(),
            SubscribeReturnCode::Failure => SUBACK_FAILURE,
        });
    }
    Ok(buf.freeze())
}

impl Connect {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        encode_connect(
            &self.client_id,
            self.username.as_deref(),
            self.password.as_deref(),
            self.keep_alive,
            self.clean_session,
        )
    }
}

impl Publish {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        encode_publish_flags(
            &self.topic,
            &self.payload,
            self.qos,
            self.packet_id,
            self.retain,
            self.dup,
        )
    }
}

impl Subscribe {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        encode_subscribe_filters(self.packet_id, &self.filters)
    }
}

impl Packet {
    /// Encode any packet to wire bytes.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        match self {
            Packet::Connect(connect) => connect.encode(),
            Packet::ConnAck(connack) => Ok(encode_connack(connack)),
            Packet::Publish(publish) => publish.encode(),
            Packet::PubAck(id) => Ok(encode_puback(*id)),
            Packet::Subscribe(subscribe) => subscribe.encode(),
            Packet::SubAck(suback) => encode_suback(suback),
            Packet::PingReq => Ok(encode_pingreq()),
            Packet::PingResp => Ok(Bytes::from_static(&[PINGRESP, 0x00])),
            Packet::Disconnect => Ok(encode_disconnect()),
        }
    }
}
