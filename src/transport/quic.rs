//! QUIC backend on quinn.
//!
//! Resumption state lives in the rustls session cache of the connector, so
//! one connector must be reused across reconnects for 0-RTT to kick in. The
//! cache is in memory only: this backend never reports an issued ticket, so
//! a [`SessionStore`](crate::session::SessionStore) stays empty with it.
//!
//! With 0-RTT the session is handed out as soon as quinn allows early data,
//! letting CONNECT ride in the first flight.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{Connection, Endpoint, VarInt, ZeroRttAccepted};

use super::settings::{CertVerification, client_tls_config, resolve};
use super::{TransportError, TransportResult};
use crate::core::constants::ALPN_MQTT;
use crate::core::{ByteStream, HandshakeInfo, QuicConnector, QuicSession, ServerTarget};
use crate::session::SessionTicket;

/// Application close code for a normal disconnect.
const CLOSE_NORMAL: u32 = 0;

/// [`QuicConnector`] over quinn.
#[derive(Debug, Clone)]
pub struct QuinnConnector {
    client_config: quinn::ClientConfig,
    zero_rtt: bool,
}

impl QuinnConnector {
    /// Build a connector negotiating ALPN `"mqtt"` over TLS 1.3.
    pub fn new(verification: &CertVerification, zero_rtt: bool) -> TransportResult<Self> {
        let mut tls = client_tls_config(verification, true)?;
        tls.alpn_protocols = vec![ALPN_MQTT.to_vec()];
        tls.enable_early_data = zero_rtt;

        let crypto = QuicClientConfig::try_from(tls)
            .map_err(|e| TransportError::TlsConfig(e.to_string()))?;

        Ok(Self {
            client_config: quinn::ClientConfig::new(Arc::new(crypto)),
            zero_rtt,
        })
    }

    async fn connect_inner(
        &self,
        target: &ServerTarget,
        offered_ticket: bool,
    ) -> TransportResult<Box<dyn QuicSession>> {
        let addr = resolve(&target.host, target.port).await?;
        let bind_ip = match addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let mut endpoint = Endpoint::client(SocketAddr::new(bind_ip, 0))?;
        endpoint.set_default_client_config(self.client_config.clone());

        tracing::debug!(%addr, server_name = %target.server_name, offered_ticket, "starting QUIC handshake");
        let connecting = endpoint
            .connect(addr, &target.server_name)
            .map_err(|e| TransportError::QuicConnect(e.to_string()))?;

        let (connection, verdict) = if self.zero_rtt {
            match connecting.into_0rtt() {
                Ok((connection, accepted)) => {
                    tracing::debug!(%addr, "0-RTT available, sending early data");
                    (connection, Some(accepted))
                }
                Err(connecting) => (
                    connecting
                        .await
                        .map_err(|e| TransportError::QuicConnect(e.to_string()))?,
                    None,
                ),
            }
        } else {
            (
                connecting
                    .await
                    .map_err(|e| TransportError::QuicConnect(e.to_string()))?,
                None,
            )
        };

        if verdict.is_none() {
            tracing::info!(%addr, "QUIC handshake complete");
        }

        Ok(Box::new(QuinnSession {
            _endpoint: endpoint,
            connection,
            addr,
            early: verdict.is_some(),
            verdict: Mutex::new(verdict),
            handshake: Mutex::new(HandshakeInfo::default()),
        }))
    }
}

impl QuicConnector for QuinnConnector {
    fn connect<'a>(
        &'a self,
        target: &'a ServerTarget,
        ticket: Option<&'a SessionTicket>,
    ) -> BoxFuture<'a, TransportResult<Box<dyn QuicSession>>> {
        Box::pin(self.connect_inner(target, ticket.is_some()))
    }
}

/// One quinn connection. Holds its endpoint so the UDP socket outlives it.
struct QuinnSession {
    _endpoint: Endpoint,
    connection: Connection,
    addr: SocketAddr,
    early: bool,
    /// Pending 0-RTT verdict, taken by the first `handshake` call.
    verdict: Mutex<Option<ZeroRttAccepted>>,
    handshake: Mutex<HandshakeInfo>,
}

impl QuicSession for QuinnSession {
    fn early_data(&self) -> bool {
        self.early
    }

    fn handshake(&self) -> BoxFuture<'_, HandshakeInfo> {
        Box::pin(async move {
            let verdict = self.verdict.lock().take();
            if let Some(verdict) = verdict {
                // Resolves when the handshake completes
                let accepted = verdict.await;
                let mut info = self.handshake.lock();
                info.zero_rtt_accepted = accepted;
                info.session_resumed = accepted;
                tracing::info!(addr = %self.addr, zero_rtt = accepted, "QUIC handshake complete");
            }
            self.handshake.lock().clone()
        })
    }

    fn open_stream(&self) -> BoxFuture<'_, TransportResult<ByteStream>> {
        Box::pin(async move {
            let (send, recv) = self
                .connection
                .open_bi()
                .await
                .map_err(|e| TransportError::QuicConnection(e.to_string()))?;
            let id = VarInt::from(send.id()).into_inner();
            tracing::trace!(stream_id = id, "opened QUIC stream");
            Ok(ByteStream::new(id, recv, send))
        })
    }

    fn close(&self, reason: &str) {
        self.connection
            .close(VarInt::from_u32(CLOSE_NORMAL), reason.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_builds() {
        assert!(QuinnConnector::new(&CertVerification::Disabled, true).is_ok());
        assert!(QuinnConnector::new(&CertVerification::Disabled, false).is_ok());
    }
}
