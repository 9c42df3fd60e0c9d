//! TLS settings shared by the QUIC and TCP+TLS backends.

use std::path::PathBuf;

/// How the broker certificate is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CertVerification {
    /// Verify against the PEM certificates in this file.
    CaFile(PathBuf),
    /// Accept any certificate. Only for brokers with self-signed certificates
    /// on trusted networks.
    #[default]
    Disabled,
}

#[cfg(any(feature = "quic", feature = "tls"))]
pub(crate) use self::rustls_config::{client_tls_config, resolve, server_name};

#[cfg(any(feature = "quic", feature = "tls"))]
mod rustls_config {
    use std::fs::File;
    use std::io::BufReader;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

    use super::CertVerification;
    use crate::transport::{TransportError, TransportResult};

    static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

    /// Build a rustls client config.
    ///
    /// QUIC requires TLS 1.3; TCP+TLS also accepts TLS 1.2.
    pub(crate) fn client_tls_config(
        verification: &CertVerification,
        tls13_only: bool,
    ) -> TransportResult<ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions: &[&'static rustls::SupportedProtocolVersion] = if tls13_only {
            TLS13_ONLY
        } else {
            rustls::ALL_VERSIONS
        };

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions)
            .map_err(|e| TransportError::TlsConfig(e.to_string()))?;

        let config = match verification {
            CertVerification::CaFile(path) => builder
                .with_root_certificates(load_roots(path)?)
                .with_no_client_auth(),
            CertVerification::Disabled => {
                tracing::warn!("broker certificate verification is disabled");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
                    .with_no_client_auth()
            }
        };
        Ok(config)
    }

    fn load_roots(path: &Path) -> TransportResult<RootCertStore> {
        let file = File::open(path)
            .map_err(|e| TransportError::Certificate(format!("{}: {e}", path.display())))?;
        let mut reader = BufReader::new(file);

        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert
                .map_err(|e| TransportError::Certificate(format!("{}: {e}", path.display())))?;
            roots
                .add(cert)
                .map_err(|e| TransportError::Certificate(e.to_string()))?;
        }

        if roots.is_empty() {
            return Err(TransportError::Certificate(format!(
                "no certificates in {}",
                path.display()
            )));
        }
        Ok(roots)
    }

    /// Parse the SNI / verification name.
    pub(crate) fn server_name(name: &str) -> TransportResult<ServerName<'static>> {
        ServerName::try_from(name.to_owned())
            .map_err(|_| TransportError::InvalidServerName(name.to_owned()))
    }

    /// First address `host` resolves to.
    pub(crate) async fn resolve(host: &str, port: u16) -> TransportResult<SocketAddr> {
        tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Resolve(format!("{host}:{port}")))
    }

    /// Accepts any certificate but still checks handshake signatures.
    #[derive(Debug)]
    struct SkipServerVerification(Arc<CryptoProvider>);

    impl ServerCertVerifier for SkipServerVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

}
