//! Transport layer
//!
//! Concrete implementations of the connector traits in [`crate::core`]:
//!
//! - **QUIC**: [`QuinnConnector`] (feature `quic`), one bidirectional stream
//!   per MQTT channel, ALPN `"mqtt"`, optional 0-RTT
//! - **TCP+TLS**: [`RustlsConnector`] (feature `tls`), a single byte stream
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Client (selector + driver)       │
//! ├─────────────────────────────────────────┤
//! │   QuicConnector   │   TcpTlsConnector   │  ← core traits
//! ├───────────────────┼─────────────────────┤
//! │   quinn (UDP)     │ tokio-rustls (TCP)  │  ← This module
//! └───────────────────┴─────────────────────┘
//! ```

use std::fmt;

mod error;
#[cfg(feature = "quic")]
mod quic;
mod settings;
#[cfg(feature = "tls")]
mod tls;

pub use error::*;
#[cfg(feature = "quic")]
pub use quic::QuinnConnector;
pub use settings::CertVerification;
#[cfg(feature = "tls")]
pub use tls::RustlsConnector;

/// Which transport carries the MQTT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// MQTT over QUIC streams.
    Quic,
    /// MQTT over a TLS-wrapped TCP connection.
    TcpTls,
}

impl TransportKind {
    /// Whether several independent streams are available.
    pub fn is_multistream(self) -> bool {
        matches!(self, TransportKind::Quic)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Quic => "QUIC",
            TransportKind::TcpTls => "TCP+TLS",
        })
    }
}
