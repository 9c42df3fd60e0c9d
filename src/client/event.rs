//! Events delivered to the application.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::codec::QoS;
use crate::core::StreamId;
use crate::transport::TransportKind;

/// A PUBLISH received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Topic name.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
    /// QoS it was delivered with.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Stream it arrived on.
    pub stream_id: StreamId,
}

impl IncomingMessage {
    /// Payload as UTF-8 text, if it is valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Connection and message events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// CONNACK accepted.
    Connected {
        /// Transport in use.
        transport: TransportKind,
        /// Broker resumed a stored session.
        session_present: bool,
    },
    /// Message received on a subscribed topic.
    Message(IncomingMessage),
    /// The connection failed; call `connect` to re-establish it.
    ConnectionLost {
        /// What went wrong.
        reason: String,
    },
    /// `disconnect` completed.
    Disconnected,
}

/// Receiving end of the event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

pub(crate) type EventSender = mpsc::UnboundedSender<ClientEvent>;
