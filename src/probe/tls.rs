//! Domain certificate probe.
//!
//! The handshake accepts any certificate: the goal is to read the leaf
//! certificate's validity window, including certificates that are already
//! expired or otherwise untrusted.

use super::{finish, Driver, ProbeError, Probed};
use crate::db::{CheckStatus, DomainTlsParams, Measurements, ProbeOutcome, Target, TargetParams};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

const HTTPS_PORT: u16 = 443;

/// Performs a handshake and grades the leaf certificate's remaining lifetime.
#[derive(Clone)]
pub struct TlsDriver {
    connector: Option<TlsConnector>,
}

impl TlsDriver {
    pub fn new() -> Self {
        let connector = inspecting_connector()
            .map_err(|e| tracing::error!("TLS probe: failed to build client config: {}", e))
            .ok();
        Self { connector }
    }
}

impl Default for TlsDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for TlsDriver {
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match (&target.params, &self.connector) {
            (TargetParams::DomainTls(params), Some(connector)) => {
                run_tls_probe(connector, params, HTTPS_PORT, deadline).await
            }
            (TargetParams::DomainTls(_), None) => {
                Err(ProbeError::Config("TLS client unavailable".to_string()))
            }
            _ => Err(ProbeError::Config("expected domain parameters".to_string())),
        };

        finish(target, started_at, start, result, CheckStatus::Down)
    }
}

fn inspecting_connector() -> Result<TlsConnector, rustls::Error> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InspectOnly(provider)))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts every chain but still checks handshake signatures.
#[derive(Debug)]
struct InspectOnly(Arc<CryptoProvider>);

impl ServerCertVerifier for InspectOnly {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Certificate facts pulled from the leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafCertificate {
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Parse a DER-encoded certificate.
pub fn parse_leaf(der: &[u8]) -> Result<LeafCertificate, ProbeError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| ProbeError::Network(format!("failed to parse certificate: {}", e)))?;
    let validity = cert.validity();
    let to_utc = |ts: i64| {
        DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| ProbeError::Network(format!("certificate time out of range: {}", ts)))
    };
    Ok(LeafCertificate {
        issuer: cert.issuer().to_string(),
        not_before: to_utc(validity.not_before.timestamp())?,
        not_after: to_utc(validity.not_after.timestamp())?,
    })
}

/// Grade the remaining certificate lifetime against the two thresholds.
pub fn classify(days_left: i64, warning_days: i64, expiry_days: i64) -> (CheckStatus, Option<String>) {
    if days_left > warning_days {
        (CheckStatus::Up, None)
    } else if days_left <= expiry_days {
        let msg = if days_left < 0 {
            format!("certificate expired {} days ago", -days_left)
        } else {
            format!("certificate expires in {} days", days_left)
        };
        (CheckStatus::Down, Some(msg))
    } else {
        (
            CheckStatus::Unknown,
            Some(format!(
                "certificate expires in {} days (warning threshold {} days)",
                days_left, warning_days
            )),
        )
    }
}

/// Handshake with `domain:port` and grade the presented leaf certificate.
pub async fn run_tls_probe(
    connector: &TlsConnector,
    params: &DomainTlsParams,
    port: u16,
    timeout: Duration,
) -> Result<Probed, ProbeError> {
    let domain = params.domain.trim().trim_end_matches('.');
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|_| ProbeError::Config(format!("invalid domain: {}", params.domain)))?;

    let start = Instant::now();
    let stream = tokio::time::timeout(timeout, async {
        let tcp = TcpStream::connect((domain, port))
            .await
            .map_err(|e| ProbeError::Network(format!("failed to connect to {}:{}: {}", domain, port, e)))?;
        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProbeError::Network(format!("TLS handshake failed: {}", e)))
    })
    .await
    .map_err(|_| ProbeError::Timeout(timeout))??;
    let elapsed = start.elapsed();

    let (tcp, session) = stream.get_ref();
    let resolved_ip = tcp.peer_addr().ok().map(|a| a.ip().to_string());
    let leaf = session
        .peer_certificates()
        .and_then(|chain| chain.first())
        .ok_or_else(|| ProbeError::Network("server presented no certificate".to_string()))?;
    let leaf = parse_leaf(leaf.as_ref())?;

    let days_left = (leaf.not_after - Utc::now()).num_days();
    let (status, error) = classify(days_left, params.warning_threshold_days, params.expiry_threshold_days);

    Ok(Probed {
        status,
        measurements: Measurements {
            response_time_ms: Some(elapsed.as_millis() as u64),
            resolved_ip,
            issuer: Some(leaf.issuer),
            not_before: Some(leaf.not_before),
            not_after: Some(leaf.not_after),
            days_left: Some(days_left),
            ..Default::default()
        },
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(domain: &str) -> DomainTlsParams {
        DomainTlsParams {
            domain: domain.to_string(),
            warning_threshold_days: 30,
            expiry_threshold_days: 7,
        }
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(classify(90, 30, 7).0, CheckStatus::Up);
        assert_eq!(classify(31, 30, 7).0, CheckStatus::Up);

        let (status, msg) = classify(30, 30, 7);
        assert_eq!(status, CheckStatus::Unknown);
        assert!(msg.unwrap().contains("warning threshold 30"));

        let (status, msg) = classify(7, 30, 7);
        assert_eq!(status, CheckStatus::Down);
        assert_eq!(msg.as_deref(), Some("certificate expires in 7 days"));

        let (status, msg) = classify(-3, 30, 7);
        assert_eq!(status, CheckStatus::Down);
        assert_eq!(msg.as_deref(), Some("certificate expired 3 days ago"));
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        assert!(parse_leaf(&[0x30, 0x03, 0x01, 0x02]).is_err());
    }

    #[tokio::test]
    async fn test_plaintext_server_fails_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let connector = inspecting_connector().unwrap();
        let result = run_tls_probe(&connector, &params("localhost"), port, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::Network(_))));
    }

    #[tokio::test]
    async fn test_invalid_domain_is_unknown() {
        let target = Target::new(41, "tls", TargetParams::DomainTls(params("bad domain!")));
        let outcome = TlsDriver::new().probe(&target, Duration::from_secs(1)).await;
        assert_eq!(outcome.status, CheckStatus::Unknown);
    }
}
