//! TCP+TLS backend on tokio-rustls.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::TransportResult;
use super::settings::{CertVerification, client_tls_config, resolve, server_name};
use crate::core::constants::TCP_STREAM_ID;
use crate::core::{ByteStream, ServerTarget, TcpTlsConnector};

/// [`TcpTlsConnector`] over tokio-rustls, TLS 1.2 or newer.
#[derive(Clone)]
pub struct RustlsConnector {
    connector: TlsConnector,
}

impl RustlsConnector {
    /// Build a connector with the given certificate check.
    pub fn new(verification: &CertVerification) -> TransportResult<Self> {
        let config = client_tls_config(verification, false)?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn connect_inner(&self, target: &ServerTarget) -> TransportResult<ByteStream> {
        let addr = resolve(&target.host, target.port).await?;
        let name = server_name(&target.server_name)?;

        tracing::debug!(%addr, server_name = %target.server_name, "starting TCP+TLS handshake");
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        let tls = self.connector.connect(name, tcp).await?;

        tracing::info!(%addr, "TCP+TLS handshake complete");
        let (reader, writer) = tokio::io::split(tls);
        Ok(ByteStream::new(TCP_STREAM_ID, reader, writer))
    }
}

impl std::fmt::Debug for RustlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsConnector").finish_non_exhaustive()
    }
}

impl TcpTlsConnector for RustlsConnector {
    fn connect<'a>(&'a self, target: &'a ServerTarget) -> BoxFuture<'a, TransportResult<ByteStream>> {
        Box::pin(self.connect_inner(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_connector_builds() {
        assert!(RustlsConnector::new(&CertVerification::Disabled).is_ok());
    }

    #[tokio::test]
    async fn test_refused_port_is_io_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = RustlsConnector::new(&CertVerification::Disabled).unwrap();
        let result = connector.connect(&ServerTarget::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
