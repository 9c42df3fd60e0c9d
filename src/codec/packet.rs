//! MQTT 3.1.1 control packet types.

use std::fmt;

use bytes::Bytes;

use crate::core::constants::{
    CONNACK, CONNECT, DISCONNECT, PACKET_TYPE_MASK, PINGREQ, PINGRESP, PUBACK, PUBLISH, SUBACK,
    SUBSCRIBE,
};
use crate::core::{DecodeError, EncodeError};

/// Delivery guarantee of a PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce = 0,
    /// Acknowledged with PUBACK, may be redelivered.
    #[default]
    AtLeastOnce = 1,
}

impl QoS {
    /// Parse a QoS level from its two-bit wire value.
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            other => Err(DecodeError::InvalidQos(other)),
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = EncodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        QoS::from_u8(value).map_err(|_| EncodeError::UnsupportedQos(value))
    }
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    Accepted = 0,
    /// Unacceptable protocol version.
    ProtocolError = 1,
    /// Client identifier rejected.
    IdentifierRejected = 2,
    /// Server unavailable.
    ServerUnavailable = 3,
    /// Bad username or password.
    BadCredentials = 4,
    /// Not authorized.
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Parse a return code byte.
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::ProtocolError),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadCredentials),
            5 => Ok(Self::NotAuthorized),
            other => Err(DecodeError::InvalidReturnCode(other)),
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the broker rejected the client's credentials.
    ///
    /// Retrying with the same credentials cannot succeed.
    pub fn is_auth_failure(self) -> bool {
        matches!(self, Self::BadCredentials | Self::NotAuthorized)
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Accepted => "accepted",
            Self::ProtocolError => "protocol error",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadCredentials => "bad credentials",
            Self::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// CONNECT packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Connect {
    /// Client identifier.
    pub client_id: String,
    /// Username, if any.
    pub username: Option<String>,
    /// Password bytes, if any.
    pub password: Option<Bytes>,
    /// Keep-alive interval in seconds.
    pub keep_alive: u16,
    /// Discard any previous session state.
    pub clean_session: bool,
}

impl fmt::Debug for Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connect")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .finish()
    }
}

/// CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    /// Broker holds state from a previous session.
    pub session_present: bool,
    /// Accept or reject reason.
    pub return_code: ConnectReturnCode,
}

/// PUBLISH packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Topic name.
    pub topic: String,
    /// Application payload, carried raw.
    pub payload: Bytes,
    /// Delivery guarantee.
    pub qos: QoS,
    /// Packet identifier; present exactly when `qos` is above zero.
    pub packet_id: Option<u16>,
    /// Retain flag.
    pub retain: bool,
    /// Duplicate delivery flag.
    pub dup: bool,
}

impl Publish {
    /// QoS 0 publish.
    pub fn at_most_once(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            packet_id: None,
            retain: false,
            dup: false,
        }
    }

    /// QoS 1 publish with the given packet identifier.
    pub fn at_least_once(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        packet_id: u16,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            packet_id: Some(packet_id),
            retain: false,
            dup: false,
        }
    }

    /// View the payload as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str, DecodeError> {
        std::str::from_utf8(&self.payload).map_err(|_| DecodeError::InvalidUtf8("payload"))
    }
}

/// One topic filter of a SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFilter {
    /// Topic filter; `+` and `#` wildcards pass through untouched.
    pub filter: String,
    /// Requested maximum QoS.
    pub qos: QoS,
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    /// Packet identifier.
    pub packet_id: u16,
    /// Requested filters, at least one.
    pub filters: Vec<SubscribeFilter>,
}

impl Subscribe {
    /// Single-filter subscription.
    pub fn single(packet_id: u16, filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            packet_id,
            filters: vec![SubscribeFilter {
                filter: filter.into(),
                qos,
            }],
        }
    }
}

/// Per-filter result carried in a SUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    /// Subscription accepted with the granted maximum QoS.
    Granted(QoS),
    /// Subscription refused.
    Failure,
}

/// SUBACK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// Identifier of the SUBSCRIBE being acknowledged.
    pub packet_id: u16,
    /// One code per requested filter, in request order.
    pub return_codes: Vec<SubscribeReturnCode>,
}

/// Every control packet this client sends or receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// CONNECT.
    Connect(Connect),
    /// CONNACK.
    ConnAck(ConnAck),
    /// PUBLISH.
    Publish(Publish),
    /// PUBACK carrying the acknowledged packet identifier.
    PubAck(u16),
    /// SUBSCRIBE.
    Subscribe(Subscribe),
    /// SUBACK.
    SubAck(SubAck),
    /// PINGREQ.
    PingReq,
    /// PINGRESP.
    PingResp,
    /// DISCONNECT.
    Disconnect,
}

impl Packet {
    /// Packet type as the high nibble of the first header byte.
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Connect(_) => CONNECT,
            Packet::ConnAck(_) => CONNACK,
            Packet::Publish(_) => PUBLISH,
            Packet::PubAck(_) => PUBACK,
            Packet::Subscribe(_) => SUBSCRIBE & PACKET_TYPE_MASK,
            Packet::SubAck(_) => SUBACK,
            Packet::PingReq => PINGREQ,
            Packet::PingResp => PINGRESP,
            Packet::Disconnect => DISCONNECT,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::SubAck(_) => "SUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}
