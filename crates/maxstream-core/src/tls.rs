//! Transport security for both ends of the `Max` call.
//!
//! The server loads a PEM certificate chain and private key into a
//! [`ServerTlsConfig`]. The client either trusts a PEM CA bundle through
//! [`ClientTlsConfig`], or, for self-signed test deployments, dials with server
//! certificate verification disabled ([`Transport::TlsInsecure`]).
//!
//! All PEM material is parsed up front so that a bad file fails at startup
//! with [`Error::Credentials`] instead of surfacing later as an opaque
//! handshake error.

use crate::{Error, Result};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime, pem::PemObject},
};
use std::{io, path::Path, sync::Arc};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{
    Certificate, Channel, ClientTlsConfig, Endpoint, Identity, ServerTlsConfig, Uri,
};

/// How the client reaches the server.
#[derive(Debug, Clone)]
pub enum Transport {
    /// Plaintext HTTP/2.
    Plain,
    /// TLS, verifying the server against the configured trust anchors.
    Tls(ClientTlsConfig),
    /// TLS without verifying the server certificate. Handshake signatures are
    /// still checked.
    TlsInsecure { server_name: String },
}

/// Loads the server identity from a PEM certificate chain and private key.
///
/// # Errors
///
/// Returns [`Error::Credentials`] if either file cannot be read, the
/// certificate file holds no PEM certificate, or the key file holds no PEM
/// private key.
pub fn server_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerTlsConfig> {
    let cert_pem = read_pem(cert_path)?;
    let key_pem = read_pem(key_path)?;

    parse_certificates(cert_path, &cert_pem)?;
    PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| Error::Credentials {
        path: key_path.to_path_buf(),
        reason: format!("no usable private key: {e}"),
    })?;

    Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert_pem, key_pem)))
}

/// Builds a client TLS configuration that trusts the CA certificates in
/// `ca_path` and expects the server to present a certificate for `domain`.
///
/// # Errors
///
/// Returns [`Error::Credentials`] if the file cannot be read, holds no PEM
/// certificate, or a certificate is rejected as a trust anchor.
pub fn client_tls(ca_path: &Path, domain: &str) -> Result<ClientTlsConfig> {
    let ca_pem = read_pem(ca_path)?;

    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(ca_path, &ca_pem)? {
        roots.add(cert).map_err(|e| Error::Credentials {
            path: ca_path.to_path_buf(),
            reason: format!("failed to add server CA's certificate: {e}"),
        })?;
    }

    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca_pem))
        .domain_name(domain))
}

/// Returns the host part of a `host:port` target, without IPv6 brackets.
///
/// Used as the default TLS server name.
pub fn server_name_of(target: &str) -> &str {
    let host = match target.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => target,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Dials `target` (a `host:port` pair) over the requested transport.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the target is not a valid URI or the
/// connection cannot be established, and [`Error::InvalidRequest`] if an
/// insecure server name is not a valid DNS name or IP address.
pub async fn connect(target: &str, transport: Transport) -> Result<Channel> {
    let channel = match transport {
        Transport::Plain => {
            Endpoint::from_shared(format!("http://{target}"))?
                .connect()
                .await?
        }
        Transport::Tls(config) => {
            Endpoint::from_shared(format!("https://{target}"))?
                .tls_config(config)?
                .connect()
                .await?
        }
        Transport::TlsInsecure { server_name } => {
            let connector = insecure_connector()?;
            let server_name =
                ServerName::try_from(server_name.clone()).map_err(|e| Error::InvalidRequest {
                    reason: format!("invalid TLS server name {server_name:?}: {e}"),
                })?;

            // TLS is terminated by the connector, so tonic sees plain HTTP/2.
            Endpoint::from_shared(format!("http://{target}"))?
                .connect_with_connector(tower::service_fn(move |uri: Uri| {
                    let connector = connector.clone();
                    let server_name = server_name.clone();
                    async move {
                        let authority = uri
                            .authority()
                            .ok_or_else(|| {
                                io::Error::new(io::ErrorKind::InvalidInput, "missing authority")
                            })?
                            .as_str()
                            .to_owned();
                        let tcp = TcpStream::connect(authority).await?;
                        let tls = connector.connect(server_name, tcp).await?;
                        Ok::<_, io::Error>(hyper_util::rt::TokioIo::new(tls))
                    }
                }))
                .await?
        }
    };

    Ok(channel)
}

fn insecure_connector() -> Result<TlsConnector> {
    let provider = Arc::new(ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::InvalidRequest {
            reason: format!("unsupported TLS protocol versions: {e}"),
        })?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts any server certificate but still validates handshake signatures.
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
    ) -> core::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::Credentials {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn parse_certificates(path: &Path, pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<core::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Credentials {
            path: path.to_path_buf(),
            reason: format!("malformed PEM: {e}"),
        })?;

    if certs.is_empty() {
        return Err(Error::Credentials {
            path: path.to_path_buf(),
            reason: "no PEM certificate found".to_string(),
        });
    }

    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../cert")
            .join(name)
    }

    fn temp_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn loads_server_identity() {
        server_tls_config(&fixture("server-cert.pem"), &fixture("server-key.pem")).unwrap();
    }

    #[test]
    fn loads_client_trust_anchor() {
        client_tls(&fixture("ca-cert.pem"), "localhost").unwrap();
    }

    #[test]
    fn missing_file_is_a_credentials_error() {
        let missing = fixture("does-not-exist.pem");
        let err = client_tls(&missing, "localhost").unwrap_err();
        match err {
            Error::Credentials { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn file_without_certificates_is_rejected() {
        let file = temp_file(b"this is not a certificate\n");
        let err = client_tls(file.path(), "localhost").unwrap_err();
        assert!(matches!(err, Error::Credentials { .. }), "{err}");
    }

    #[test]
    fn garbage_trust_anchor_is_rejected() {
        let file = temp_file(
            b"-----BEGIN CERTIFICATE-----\nbm90IGEgY2VydGlmaWNhdGU=\n-----END CERTIFICATE-----\n",
        );
        let err = client_tls(file.path(), "localhost").unwrap_err();
        assert!(matches!(err, Error::Credentials { .. }), "{err}");
    }

    #[test]
    fn certificate_is_not_a_private_key() {
        let err =
            server_tls_config(&fixture("server-cert.pem"), &fixture("ca-cert.pem")).unwrap_err();
        match err {
            Error::Credentials { path, .. } => assert_eq!(path, fixture("ca-cert.pem")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn server_name_strips_port_and_brackets() {
        assert_eq!(server_name_of("localhost:50005"), "localhost");
        assert_eq!(server_name_of("127.0.0.1:50005"), "127.0.0.1");
        assert_eq!(server_name_of("[::1]:50005"), "::1");
        assert_eq!(server_name_of("example.com"), "example.com");
    }
}
