//! Transport security and the application handshake.
//!
//! The host generates a self-signed certificate at start. Workers either
//! accept any host certificate or pin its SHA-256 fingerprint. Once the
//! tunnel is up, the worker sends `Hello` with the hex SHA-256 of the shared
//! password and the identity it was given before, if any; the host answers
//! `Welcome` with the confirmed or freshly minted identity, or `Rejected`.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, TlsConnector, client, server};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::network::NetworkMessage;
use crate::network::codec::{read_frame, write_frame};
use crate::utils::sha256_hex;

/// Hash a password the way it travels in `Hello`.
pub fn hash_password(password: &str) -> String {
    sha256_hex(password)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Host side TLS material.
#[derive(Clone)]
pub struct HostIdentity {
    acceptor: TlsAcceptor,
    fingerprint: String,
}

impl fmt::Debug for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostIdentity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl HostIdentity {
    /// Generate a fresh self-signed certificate.
    pub fn generate() -> Result<Self> {
        let certified = rcgen::generate_simple_self_signed(vec![
            "crycrawler".to_string(),
            "localhost".to_string(),
        ])
        .map_err(|e| AppError::transport(format!("certificate generation failed: {e}")))?;

        let cert_der = certified.cert.der().clone();
        let fingerprint = sha256_hex(cert_der.as_ref());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

        let config = ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key)?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            fingerprint,
        })
    }

    /// SHA-256 hex of the certificate, for pinning on workers.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Upgrade an accepted connection.
    pub async fn accept<S>(&self, stream: S) -> Result<server::TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.acceptor
            .accept(stream)
            .await
            .map_err(|e| AppError::transport(format!("TLS accept failed: {e}")))
    }
}

/// Upgrade an outbound connection to the host.
pub async fn secure_client<S>(
    stream: S,
    hostname: &str,
    fingerprint: Option<&str>,
) -> Result<client::TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let provider = crypto_provider();
    let verifier = HostCertVerifier {
        fingerprint: fingerprint.map(|f| f.trim().to_lowercase()),
        provider: provider.clone(),
    };

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|e| AppError::transport(format!("invalid host name '{hostname}': {e}")))?;

    TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await
        .map_err(|e| AppError::transport(format!("TLS connect failed: {e}")))
}

/// Accepts the host's self-signed certificate, optionally pinned.
#[derive(Debug)]
struct HostCertVerifier {
    fingerprint: Option<String>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for HostCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Some(expected) = &self.fingerprint {
            if sha256_hex(end_entity.as_ref()) != *expected {
                return Err(rustls::Error::General(
                    "host certificate fingerprint mismatch".to_string(),
                ));
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Which end of the handshake this side plays.
#[derive(Debug, Clone)]
pub enum Role {
    /// Worker, presenting the identity it was given before, if any
    Initiator { client_id: Option<String> },
    /// Host
    Acceptor,
}

/// Authenticate the peer and agree on the worker identity.
///
/// A wrong password fails this connection attempt only; the acceptor tells
/// the initiator before returning the error.
pub async fn handshake<S>(stream: &mut S, password_hash: &str, role: Role) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match role {
        Role::Initiator { client_id } => {
            let hello = NetworkMessage::Hello {
                password_hash: password_hash.to_string(),
                client_id,
            };
            write_frame(stream, &hello).await?;

            match read_frame(stream).await? {
                Some(NetworkMessage::Welcome { client_id }) => Ok(client_id),
                Some(NetworkMessage::Rejected { reason }) => Err(AppError::handshake(reason)),
                Some(other) => Err(AppError::handshake(format!(
                    "expected Welcome, got {}",
                    other.kind()
                ))),
                None => Err(AppError::handshake("host closed the connection")),
            }
        }
        Role::Acceptor => {
            let (presented_hash, presented_id) = match read_frame(stream).await? {
                Some(NetworkMessage::Hello {
                    password_hash,
                    client_id,
                }) => (password_hash, client_id),
                Some(other) => {
                    return Err(AppError::handshake(format!(
                        "expected Hello, got {}",
                        other.kind()
                    )));
                }
                None => return Err(AppError::handshake("client closed the connection")),
            };

            if presented_hash != password_hash {
                let reply = NetworkMessage::Rejected {
                    reason: "Invalid password".to_string(),
                };
                // Best effort, the attempt fails either way
                let _ = write_frame(stream, &reply).await;
                return Err(AppError::handshake("client presented an invalid password"));
            }

            let client_id = presented_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            write_frame(
                stream,
                &NetworkMessage::Welcome {
                    client_id: client_id.clone(),
                },
            )
            .await?;
            Ok(client_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn run_pair(
        host_hash: &str,
        worker_hash: &str,
        client_id: Option<String>,
    ) -> (Result<String>, Result<String>) {
        let (mut worker, mut host) = tokio::io::duplex(4096);
        let host_hash = host_hash.to_string();
        let acceptor =
            tokio::spawn(async move { handshake(&mut host, &host_hash, Role::Acceptor).await });
        let initiated = handshake(&mut worker, worker_hash, Role::Initiator { client_id }).await;
        (initiated, acceptor.await.unwrap())
    }

    #[tokio::test]
    async fn test_new_worker_gets_minted_identity() {
        let hash = hash_password("pass");
        let (worker, host) = run_pair(&hash, &hash, None).await;

        let id = worker.unwrap();
        assert_eq!(host.unwrap(), id);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_known_worker_keeps_identity() {
        let hash = hash_password("pass");
        let (worker, host) = run_pair(&hash, &hash, Some("worker-7".to_string())).await;

        assert_eq!(worker.unwrap(), "worker-7");
        assert_eq!(host.unwrap(), "worker-7");
    }

    #[tokio::test]
    async fn test_wrong_password_rejected_on_both_ends() {
        let (worker, host) = run_pair(&hash_password("right"), &hash_password("wrong"), None).await;

        assert!(matches!(worker, Err(AppError::Handshake(_))));
        assert!(matches!(host, Err(AppError::Handshake(_))));
    }

    #[test]
    fn test_password_hash_is_hex_sha256() {
        let hash = hash_password("");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_password("x"));
    }

    #[tokio::test]
    async fn test_tls_round_trip_with_pinned_fingerprint() {
        let identity = HostIdentity::generate().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host_identity = identity.clone();
        let host = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = host_identity.accept(tcp).await.unwrap();
            handshake(&mut tls, &hash_password("pw"), Role::Acceptor).await
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut tls = secure_client(tcp, "localhost", Some(identity.fingerprint()))
            .await
            .unwrap();
        let id = handshake(&mut tls, &hash_password("pw"), Role::Initiator { client_id: None })
            .await
            .unwrap();

        assert_eq!(host.await.unwrap().unwrap(), id);
    }

    #[tokio::test]
    async fn test_tls_rejects_wrong_fingerprint() {
        let identity = HostIdentity::generate().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host_identity = identity.clone();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = host_identity.accept(tcp).await;
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let pin = "00".repeat(32);
        let result = secure_client(tcp, "localhost", Some(&pin)).await;
        assert!(matches!(result, Err(AppError::Transport(_))));
    }
}
