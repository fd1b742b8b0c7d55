//! TLS probe
//!
//! Completes a real handshake with certificate verification disabled --
//! this is reconnaissance, not trust establishment -- and records the
//! negotiated version, cipher suite, and a certificate summary. On web
//! ports the probe then issues a GET inside the channel and runs the same
//! response audit as the plaintext HTTP probe, reporting failures in the
//! observation's `error` field rather than discarding the handshake.

use super::http::{audit_http_response, request_for};
use super::Detection;
use netscout_core::TlsObservation;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

/// Accept any certificate chain; the scan records what it saw
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

fn server_name(host: &str, ip: IpAddr) -> ServerName {
    ServerName::try_from(host).unwrap_or(ServerName::IpAddress(ip))
}

/// Summarize the leaf certificate: subject CN, issuer CN, expiry
fn cert_summary(der: &[u8]) -> (Option<String>, Option<String>, Option<String>) {
    let Ok((_rem, cert)) = parse_x509_certificate(der) else {
        return (None, None, None);
    };
    let subject = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string());
    let issuer = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string());
    let not_after = cert.validity().not_after.to_rfc2822().ok();
    (subject, issuer, not_after)
}

fn version_name(version: rustls::ProtocolVersion) -> String {
    match version {
        rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        other => format!("{:?}", other),
    }
}

/// TLS handshake probe, with an in-channel HTTP GET on success
pub(crate) async fn probe_tls(
    ip: IpAddr,
    port: u16,
    host: &str,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let tcp = timeout(limit, TcpStream::connect(SocketAddr::new(ip, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;

    let handshake = timeout(limit, connector().connect(server_name(host, ip), tcp)).await;

    let mut stream = match handshake {
        Ok(Ok(stream)) => stream,
        // The peer speaks TCP but not TLS: no match, let other probes run
        Ok(Err(_)) | Err(_) => return Ok(None),
    };

    let mut observation = TlsObservation {
        version: None,
        cipher: None,
        cert_subject: None,
        cert_issuer: None,
        cert_not_after: None,
        error: None,
    };

    {
        let (_, connection) = stream.get_ref();
        observation.version = connection.protocol_version().map(version_name);
        observation.cipher = connection
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()));
        if let Some(certs) = connection.peer_certificates() {
            if let Some(leaf) = certs.first() {
                let (subject, issuer, not_after) = cert_summary(&leaf.0);
                observation.cert_subject = subject;
                observation.cert_issuer = issuer;
                observation.cert_not_after = not_after;
            }
        }
    }

    let mut detection = Detection::new("https", 0.95);

    // GET inside the channel for the security audit
    let request = request_for(host);
    let http = match stream.write_all(request.as_bytes()).await {
        Ok(()) => {
            let raw = super::http::read_response(&mut stream, limit).await;
            if raw.starts_with(b"HTTP/") {
                let audited = audit_http_response(&raw, true);
                if let Some(server) = super::http::header_value(
                    &String::from_utf8_lossy(&raw),
                    "server",
                ) {
                    detection.version = Some(server);
                }
                detection.banner = Some(summary_banner(&observation));
                Some(audited)
            } else {
                Some(netscout_core::HttpObservation {
                    status_code: None,
                    http_version: None,
                    security_score: 0,
                    security_headers: Default::default(),
                    csp_warnings: Vec::new(),
                    cors_warnings: Vec::new(),
                    directory_listing: false,
                    forms_over_http: false,
                    error: Some("no HTTP response inside TLS channel".to_string()),
                })
            }
        }
        Err(e) => {
            observation.error = Some(format!("write inside TLS channel failed: {}", e));
            None
        }
    };

    if detection.banner.is_none() {
        detection.banner = Some(summary_banner(&observation));
    }
    detection.tls = Some(observation);
    detection.http = http;
    Ok(Some(detection))
}

/// Human-readable banner line built from the handshake observation
fn summary_banner(observation: &TlsObservation) -> Vec<u8> {
    let mut parts = Vec::new();
    if let Some(version) = &observation.version {
        parts.push(version.clone());
    }
    if let Some(subject) = &observation.cert_subject {
        parts.push(format!("subject_cn={}", subject));
    }
    if let Some(issuer) = &observation.cert_issuer {
        parts.push(format!("issuer_cn={}", issuer));
    }
    if let Some(not_after) = &observation.cert_not_after {
        parts.push(format!("not_after={}", not_after));
    }
    format!("TLS: {}", parts.join(", ")).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_falls_back_to_ip() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        // A bare IP string is not a DNS name; the fallback kicks in
        match server_name("10.0.0.1", ip) {
            ServerName::IpAddress(addr) => assert_eq!(addr, ip),
            other => panic!("expected IP server name, got {:?}", other),
        }
    }

    #[test]
    fn test_server_name_accepts_hostnames() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(matches!(
            server_name("scan-target.internal", ip),
            ServerName::DnsName(_)
        ));
    }

    #[test]
    fn test_version_names() {
        assert_eq!(version_name(rustls::ProtocolVersion::TLSv1_2), "TLSv1.2");
        assert_eq!(version_name(rustls::ProtocolVersion::TLSv1_3), "TLSv1.3");
    }

    #[test]
    fn test_cert_summary_garbage_is_none() {
        let (subject, issuer, not_after) = cert_summary(b"not a certificate");
        assert!(subject.is_none());
        assert!(issuer.is_none());
        assert!(not_after.is_none());
    }

    #[tokio::test]
    async fn test_probe_against_plain_tcp_is_no_match() {
        // A listener that immediately closes never completes a handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let outcome = probe_tls(
            "127.0.0.1".parse().unwrap(),
            port,
            "127.0.0.1",
            Duration::from_millis(300),
        )
        .await
        .unwrap();
        assert!(outcome.is_none());
    }
}
