//! HTTP probe and response auditing
//!
//! Sends a bare `GET / HTTP/1.0` and, when the peer answers with an HTTP
//! status line, extracts the server product and audits the response for
//! security posture: HSTS, framing and sniffing protections, CSP quality,
//! CORS laxity, directory listings, and forms served over plaintext.

use super::Detection;
use netscout_core::types::CspStatus;
use netscout_core::{HttpObservation, SecurityHeadersAudit};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

/// Upper bound on how much of a response we retain for auditing
const MAX_RESPONSE: usize = 16 * 1024;

pub(crate) fn request_for(host: &str) -> String {
    format!(
        "GET / HTTP/1.0\r\nHost: {}\r\nUser-Agent: netscout/0.4\r\nConnection: close\r\n\r\n",
        host
    )
}

/// Read a response until the peer closes, the buffer fills, or the
/// deadline passes. Partial responses are fine; the audit works with what
/// arrived.
pub(crate) async fn read_response<S>(stream: &mut S, limit: Duration) -> Vec<u8>
where
    S: AsyncReadExt + Unpin,
{
    let deadline = Instant::now() + limit;
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 2048];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || buf.len() >= MAX_RESPONSE {
            break;
        }
        match timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => buf.extend_from_slice(&chunk[..n]),
            _ => break,
        }
    }
    buf.truncate(MAX_RESPONSE);
    buf
}

/// Plaintext HTTP probe
pub(crate) async fn probe_http(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = timeout(limit, TcpStream::connect(SocketAddr::new(ip, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;

    stream
        .write_all(request_for(&ip.to_string()).as_bytes())
        .await?;

    let raw = read_response(&mut stream, limit).await;
    if !raw.starts_with(b"HTTP/") {
        return Ok(None);
    }

    let observation = audit_http_response(&raw, false);
    let mut detection = Detection::new("http", 0.95);
    detection.version = server_header(&raw);
    detection.banner = Some(head_of(&raw));
    detection.http = Some(observation);
    Ok(Some(detection))
}

/// The status line plus headers, for the banner field
fn head_of(raw: &[u8]) -> Vec<u8> {
    match raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => raw[..end].to_vec(),
        None => raw.to_vec(),
    }
}

fn server_header(raw: &[u8]) -> Option<String> {
    header_value(&String::from_utf8_lossy(raw), "server")
}

pub(crate) fn header_value(text: &str, name: &str) -> Option<String> {
    for line in text.lines().skip(1) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Audit an HTTP response for the observation attached to port results
///
/// `over_tls` marks responses fetched inside a TLS channel; plaintext
/// responses carrying forms are flagged, and HSTS is only expected on TLS.
pub fn audit_http_response(raw: &[u8], over_tls: bool) -> HttpObservation {
    let text = String::from_utf8_lossy(raw);

    let (http_version, status_code) = parse_status_line(&text);

    let mut audit = SecurityHeadersAudit::default();
    let mut csp_warnings = Vec::new();
    let mut cors_warnings = Vec::new();

    audit.hsts = header_value(&text, "strict-transport-security").is_some();
    audit.x_frame_options = header_value(&text, "x-frame-options").is_some();
    audit.x_content_type_options = header_value(&text, "x-content-type-options")
        .map(|v| v.eq_ignore_ascii_case("nosniff"))
        .unwrap_or(false);

    audit.csp = match header_value(&text, "content-security-policy") {
        Some(policy) => {
            let lowered = policy.to_ascii_lowercase();
            if lowered.contains("'unsafe-inline'") {
                csp_warnings.push("policy allows 'unsafe-inline'".to_string());
            }
            if lowered.contains("'unsafe-eval'") {
                csp_warnings.push("policy allows 'unsafe-eval'".to_string());
            }
            if has_wildcard_source(&lowered) {
                csp_warnings.push("policy uses a wildcard source".to_string());
            }
            if lowered.split(';').all(|d| !d.trim().starts_with("default-src")) {
                csp_warnings.push("policy has no default-src directive".to_string());
            }
            if csp_warnings.is_empty() {
                CspStatus::Present
            } else {
                CspStatus::Weak
            }
        }
        None => CspStatus::Missing,
    };

    if let Some(origin) = header_value(&text, "access-control-allow-origin") {
        if origin.trim() == "*" {
            cors_warnings.push("Access-Control-Allow-Origin is a wildcard".to_string());
            if header_value(&text, "access-control-allow-credentials")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
            {
                cors_warnings
                    .push("wildcard origin combined with allow-credentials".to_string());
            }
        }
    }

    let body = body_of(&text);
    let body_lower = body.to_ascii_lowercase();
    let directory_listing =
        body_lower.contains("index of /") || body_lower.contains("<title>index of");
    let forms_over_http = !over_tls && body_lower.contains("<form");

    let security_score = score(over_tls, &audit, directory_listing, forms_over_http);

    HttpObservation {
        status_code,
        http_version,
        security_score,
        security_headers: audit,
        csp_warnings,
        cors_warnings,
        directory_listing,
        forms_over_http,
        error: None,
    }
}

fn parse_status_line(text: &str) -> (Option<String>, Option<u16>) {
    let line = text.lines().next().unwrap_or_default();
    if !line.starts_with("HTTP/") {
        return (None, None);
    }
    let mut parts = line.split_whitespace();
    let version = parts
        .next()
        .and_then(|v| v.strip_prefix("HTTP/"))
        .map(|v| v.to_string());
    let status = parts.next().and_then(|s| s.parse::<u16>().ok());
    (version, status)
}

fn has_wildcard_source(policy: &str) -> bool {
    policy.split(';').any(|directive| {
        let mut tokens = directive.trim().split_whitespace();
        match tokens.next() {
            Some("default-src") | Some("script-src") => tokens.any(|t| t == "*"),
            _ => false,
        }
    })
}

fn body_of(text: &str) -> &str {
    match text.find("\r\n\r\n") {
        Some(index) => &text[index + 4..],
        None => "",
    }
}

/// 0-100 posture score, weighted toward transport and script controls
fn score(
    over_tls: bool,
    audit: &SecurityHeadersAudit,
    directory_listing: bool,
    forms_over_http: bool,
) -> u8 {
    let mut total = 0u8;
    if over_tls {
        total += 10;
        if audit.hsts {
            total += 20;
        }
    } else if audit.hsts {
        // HSTS on plaintext is inert but signals intent
        total += 10;
    }
    total += match audit.csp {
        CspStatus::Present => 25,
        CspStatus::Weak => 10,
        CspStatus::Missing => 0,
    };
    if audit.x_frame_options {
        total += 15;
    }
    if audit.x_content_type_options {
        total += 15;
    }
    if !directory_listing {
        total += 10;
    }
    if !forms_over_http {
        total += 5;
    }
    total.min(100)
}
