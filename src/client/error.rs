//! Client error types.

use thiserror::Error;

use crate::codec::ConnectReturnCode;
use crate::core::{DecodeError, EncodeError};
use crate::session::StoreError;
use crate::transport::TransportError;

/// Errors that can occur in the MQTT client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A packet could not be encoded.
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// The broker sent a malformed packet. The connection is dropped.
    #[error("decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session ticket storage failure.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// Neither transport produced an accepted MQTT session.
    #[error("connection failed (QUIC: {quic}; TCP+TLS: {tls})")]
    ConnectionFailed {
        /// Last error of the QUIC path.
        quic: String,
        /// Last error of the TCP+TLS path.
        tls: String,
    },

    /// CONNACK code 4 or 5. Retrying with the same credentials cannot succeed.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(ConnectReturnCode),

    /// CONNACK code 1, 2 or 3.
    #[error("connection refused: {0}")]
    ConnectionRefused(ConnectReturnCode),

    /// The broker sent a packet that is not valid at this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// No PUBACK within the ack budget. The message may still be delivered.
    #[error("publish {packet_id} not acknowledged in time")]
    PublishTimeout {
        /// Identifier of the unacknowledged publish.
        packet_id: u16,
    },

    /// No SUBACK within the ack budget.
    #[error("subscribe {packet_id} not acknowledged in time")]
    SubscribeTimeout {
        /// Identifier of the unacknowledged subscribe.
        packet_id: u16,
    },

    /// The broker refused a subscription.
    #[error("subscription to {filter} rejected")]
    SubscribeRejected {
        /// Refused topic filter.
        filter: String,
    },

    /// All 65535 packet identifiers are waiting for acks.
    #[error("no free packet identifier")]
    PacketIdsExhausted,

    /// The operation was aborted by `disconnect`.
    #[error("operation cancelled")]
    Cancelled,

    /// The connection dropped while the operation was pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No connection is established.
    #[error("not connected")]
    NotConnected,
}

impl ClientError {
    /// Check if retrying cannot succeed without outside intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::AuthenticationRejected(_))
    }

    /// Check if the same operation may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::ConnectionFailed { .. }
            | ClientError::ConnectionRefused(_)
            | ClientError::ConnectionLost(_)
            | ClientError::PublishTimeout { .. }
            | ClientError::SubscribeTimeout { .. }
            | ClientError::PacketIdsExhausted
            | ClientError::NotConnected
            | ClientError::Decode(_)
            | ClientError::Protocol(_) => true,
            ClientError::Transport(e) => !e.is_configuration(),
            ClientError::Encode(_)
            | ClientError::Store(_)
            | ClientError::AuthenticationRejected(_)
            | ClientError::SubscribeRejected { .. }
            | ClientError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_rejection_is_fatal() {
        let err = ClientError::AuthenticationRejected(ConnectReturnCode::BadCredentials);
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "authentication rejected: bad credentials");
    }

    #[test]
    fn test_transient_errors_retry() {
        assert!(ClientError::ConnectionRefused(ConnectReturnCode::ServerUnavailable).is_retryable());
        assert!(ClientError::PublishTimeout { packet_id: 3 }.is_retryable());
        assert!(
            ClientError::ConnectionFailed {
                quic: "timed out".into(),
                tls: "refused".into()
            }
            .is_retryable()
        );
        assert!(ClientError::Transport(TransportError::StreamClosed).is_retryable());
        assert!(!ClientError::Transport(TransportError::Unavailable("QUIC")).is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
    }
}
