use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use wc_dns::Registrar;
use x509_parser::prelude::*;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CHECKING: &str = "checking...";
const NAME_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Cyan,
    Green,
    Red,
    Yellow,
}

impl Color {
    fn code(self) -> &'static str {
        match self {
            Self::Cyan => "\x1b[96m",
            Self::Green => "\x1b[92m",
            Self::Red => "\x1b[31m",
            Self::Yellow => "\x1b[33m",
        }
    }
}

fn colorize(text: &str, color: Color) -> String {
    format!("{}{}\x1b[0m", color.code(), text)
}

/// Validity window of one certificate in a served chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Validity {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expiry {
    /// Some certificate in the chain is outside its window
    Expired(Validity),
    /// Minimum days left across the chain; `None` for an empty chain
    Valid(Option<i64>),
}

impl Expiry {
    fn render(&self) -> (String, Color) {
        match self {
            Self::Expired(v) => (
                format!(
                    "expired! ({} - {})",
                    v.not_before.format(TIME_FORMAT),
                    v.not_after.format(TIME_FORMAT)
                ),
                Color::Red,
            ),
            Self::Valid(Some(days)) => (format!("ok ({days} days left)"), Color::Green),
            Self::Valid(None) => ("ok".to_string(), Color::Green),
        }
    }
}

fn classify(chain: &[Validity], now: DateTime<Utc>) -> Expiry {
    let mut days_min: Option<i64> = None;
    for validity in chain {
        if now >= validity.not_after || now <= validity.not_before {
            return Expiry::Expired(*validity);
        }
        let days = (validity.not_after - now).num_days();
        days_min = Some(days_min.map_or(days, |min| min.min(days)));
    }
    Expiry::Valid(days_min)
}

fn matches(name: &str, patterns: &[String]) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| name.contains(p.as_str()))
}

/// Dial every matching `A` record over TLS and print how long its
/// certificate chain stays valid
pub async fn run<R: Registrar>(registrar: &R, patterns: &[String]) -> Result<()> {
    let mut stdout = std::io::stdout();

    for domain in registrar.list_domains().await? {
        for record in registrar.list_records(&domain).await? {
            if record.record_type != "A" || !matches(&record.full_name, patterns) {
                continue;
            }

            write!(
                stdout,
                "{:>NAME_WIDTH$}  {}",
                record.full_name,
                colorize(CHECKING, Color::Cyan)
            )?;
            stdout.flush()?;

            let (text, color) = match peer_chain(&record.full_name).await {
                Ok(chain) => classify(&chain, Utc::now()).render(),
                Err(e) => {
                    debug!(host = %record.full_name, error = ?e, "TLS check failed");
                    (format!("{e:#}"), Color::Yellow)
                }
            };
            writeln!(
                stdout,
                "\r{:>NAME_WIDTH$}  {}",
                record.full_name,
                colorize(&format!("{text:<width$}", width = CHECKING.len()), color)
            )?;
        }
    }
    Ok(())
}

/// Validity windows of the chain `host` serves
async fn peer_chain(host: &str) -> Result<Vec<Validity>> {
    let (name, addr) = match host.rsplit_once(':') {
        Some((name, _)) => (name.to_string(), host.to_string()),
        None => (host.to_string(), format!("{host}:443")),
    };

    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(name)
        .with_context(|| format!("invalid server name {host}"))?;

    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .with_context(|| format!("dial tcp {addr}: i/o timeout"))??;
    let tls = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .with_context(|| format!("TLS handshake with {addr} timed out"))??;

    let (_, connection) = tls.get_ref();
    connection
        .peer_certificates()
        .unwrap_or_default()
        .iter()
        .map(|der| validity(der.as_ref()))
        .collect()
}

fn validity(der: &[u8]) -> Result<Validity> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| anyhow::anyhow!("invalid certificate: {e}"))?;
    let window = cert.validity();
    Ok(Validity {
        not_before: to_utc(window.not_before.timestamp())?,
        not_after: to_utc(window.not_after.timestamp())?,
    })
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0).context("certificate time out of range")
}

/// Accepts any certificate; the chain is only inspected, never trusted.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    /// Whatever the installed provider can check, so any server key type
    /// gets through the handshake
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        CryptoProvider::get_default()
            .map(|provider| provider.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn window(from: DateTime<Utc>, to: DateTime<Utc>) -> Validity {
        Validity {
            not_before: from,
            not_after: to,
        }
    }

    #[test]
    fn test_classify_reports_minimum_days_left() {
        let now = at(2024, 6, 1);
        let chain = [
            window(at(2024, 5, 1), at(2024, 7, 31)),
            window(at(2020, 1, 1), at(2030, 1, 1)),
        ];
        assert_eq!(classify(&chain, now), Expiry::Valid(Some(60)));
        assert_eq!(
            classify(&chain, now).render(),
            ("ok (60 days left)".to_string(), Color::Green)
        );
    }

    #[test]
    fn test_classify_expired_certificate() {
        let now = at(2024, 6, 1);
        let chain = [
            window(at(2020, 1, 1), at(2030, 1, 1)),
            window(at(2024, 3, 1), at(2024, 5, 30)),
        ];
        let (text, color) = classify(&chain, now).render();
        assert_eq!(text, "expired! (2024-03-01 00:00:00 - 2024-05-30 00:00:00)");
        assert_eq!(color, Color::Red);
    }

    #[test]
    fn test_classify_not_yet_valid_counts_as_expired() {
        let now = at(2024, 6, 1);
        let chain = [window(at(2024, 7, 1), at(2024, 9, 1))];
        assert!(matches!(classify(&chain, now), Expiry::Expired(_)));
    }

    #[test]
    fn test_classify_empty_chain() {
        assert_eq!(classify(&[], at(2024, 6, 1)).render().0, "ok");
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches("www.example.com", &[]));
        let patterns = vec!["shop".to_string(), "api.".to_string()];
        assert!(matches("shop.example.com", &patterns));
        assert!(matches("api.example.com", &patterns));
        assert!(!matches("www.example.com", &patterns));
    }

    #[test]
    fn test_verifier_offers_installed_provider_schemes() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let schemes = NoVerifier.supported_verify_schemes();
        assert!(schemes.contains(&SignatureScheme::ECDSA_NISTP256_SHA256));
        assert!(schemes.contains(&SignatureScheme::RSA_PSS_SHA256));
    }

    #[test]
    fn test_colorize() {
        assert_eq!(colorize("ok", Color::Green), "\x1b[92mok\x1b[0m");
    }
}
