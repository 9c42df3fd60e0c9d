//! Transport layer error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error on a socket or stream.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// TLS configuration could not be built.
    #[error("tls configuration: {0}")]
    TlsConfig(String),

    /// CA certificate file missing, unreadable or empty.
    #[error("certificate: {0}")]
    Certificate(String),

    /// Server name is not a valid DNS name or IP address.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// Host resolved to no usable address.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// QUIC handshake failed.
    #[error("quic connect failed: {0}")]
    QuicConnect(String),

    /// Established QUIC connection failed, including stream opening.
    #[error("quic connection error: {0}")]
    QuicConnection(String),

    /// Operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Peer closed the stream.
    #[error("stream closed")]
    StreamClosed,

    /// Backend not compiled into this build.
    #[error("{0} transport unavailable")]
    Unavailable(&'static str),
}

impl TransportError {
    /// Check if this error ends an established connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::QuicConnection(_)
                | TransportError::StreamClosed
                | TransportError::Timeout(_)
        )
    }

    /// Check if this error comes from local configuration rather than the
    /// network. Retrying without changing the configuration cannot help.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TransportError::TlsConfig(_)
                | TransportError::Certificate(_)
                | TransportError::InvalidServerName(_)
                | TransportError::Unavailable(_)
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(TransportError::StreamClosed.is_fatal());
        assert!(TransportError::Timeout(Duration::from_secs(5)).is_fatal());
        assert!(TransportError::QuicConnection("reset".into()).is_fatal());
        assert!(TransportError::Io(io::Error::other("test")).is_fatal());

        assert!(!TransportError::Unavailable("QUIC").is_fatal());
        assert!(!TransportError::Resolve("nowhere".into()).is_fatal());
    }

    #[test]
    fn test_configuration_errors() {
        assert!(TransportError::Certificate("empty".into()).is_configuration());
        assert!(TransportError::Unavailable("TCP+TLS").is_configuration());
        assert!(!TransportError::QuicConnect("refused".into()).is_configuration());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TransportError::Unavailable("QUIC").to_string(),
            "QUIC transport unavailable"
        );
    }
}
