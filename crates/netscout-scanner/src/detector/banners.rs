//! Line-oriented banner probes: SSH, FTP, SMTP, and the passive greeting
//!
//! These protocols self-announce, so the probe is mostly a bounded read.
//! Socket errors bubble up as `Err` (the caller retries once); a quiet or
//! unrecognized peer is `Ok(None)`.

use super::Detection;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn ssh_banner_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^SSH-(\d+\.\d+)-(.+)$").unwrap())
}

async fn connect(ip: IpAddr, port: u16, limit: Duration) -> io::Result<TcpStream> {
    timeout(limit, TcpStream::connect(SocketAddr::new(ip, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))?
}

/// Read whatever the peer volunteers, up to 512 bytes
async fn read_greeting(stream: &mut TcpStream, limit: Duration) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; 512];
    match timeout(limit, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            Ok(buf)
        }
        Ok(Ok(_)) | Err(_) => Ok(Vec::new()),
        Ok(Err(e)) => Err(e),
    }
}

fn first_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn ssh_detection(raw: &[u8]) -> Option<Detection> {
    let line = first_line(raw);
    let captures = ssh_banner_re().captures(&line)?;
    let mut detection = Detection::new("ssh", 0.95);
    detection.version = Some(captures[2].trim().to_string());
    detection.banner = Some(raw.to_vec());
    Some(detection)
}

/// MySQL greeting: 3-byte little-endian length, sequence byte, then the
/// protocol version byte (0x0a for every modern server)
pub(crate) fn mysql_greeting(raw: &[u8]) -> Option<Detection> {
    if raw.len() < 6 || raw[4] != 0x0a {
        return None;
    }
    let declared = u32::from_le_bytes([raw[0], raw[1], raw[2], 0]) as usize;
    if declared == 0 || declared + 4 > raw.len() + 64 {
        return None;
    }
    let mut detection = Detection::new("mysql", 0.9);
    // Server version is the NUL-terminated string after the protocol byte
    if let Some(end) = raw[5..].iter().position(|&b| b == 0) {
        detection.version = Some(String::from_utf8_lossy(&raw[5..5 + end]).to_string());
    }
    detection.banner = Some(raw.to_vec());
    Some(detection)
}

/// Passive banner read for SSH on its own port
pub(crate) async fn probe_ssh(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    let raw = read_greeting(&mut stream, limit).await?;
    Ok(ssh_detection(&raw))
}

/// Passive banner read for FTP: a greeting starting with reply code 220
pub(crate) async fn probe_ftp(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    let raw = read_greeting(&mut stream, limit).await?;
    let line = first_line(&raw);
    if !line.starts_with("220") {
        return Ok(None);
    }
    let mut detection = Detection::new("ftp", 0.9);
    detection.banner = Some(raw);
    Ok(Some(detection))
}

/// Active SMTP probe: greeting 220, then EHLO answered with 250
pub(crate) async fn probe_smtp(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    let greeting = read_greeting(&mut stream, limit).await?;
    if !first_line(&greeting).starts_with("220") {
        return Ok(None);
    }

    stream.write_all(b"EHLO localhost\r\n").await?;
    let reply = read_greeting(&mut stream, limit).await?;
    if !first_line(&reply).starts_with("250") {
        return Ok(None);
    }

    let mut detection = Detection::new("smtp", 0.9);
    detection.banner = Some(greeting);
    Ok(Some(detection))
}

/// Passive greeting probe for unhinted ports
///
/// One connection classifies every self-announcing protocol; anything that
/// spoke but was not recognized is reported as a generic response at 0.5
/// confidence with the raw banner attached.
pub(crate) async fn probe_greeting(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    let raw = read_greeting(&mut stream, limit).await?;
    if raw.is_empty() {
        return Ok(None);
    }

    if let Some(detection) = ssh_detection(&raw) {
        return Ok(Some(detection));
    }
    if let Some(detection) = mysql_greeting(&raw) {
        return Ok(Some(detection));
    }

    let line = first_line(&raw);
    if line.starts_with("220") {
        let lowered = line.to_ascii_lowercase();
        let service = if lowered.contains("smtp") || lowered.contains("esmtp") {
            "smtp"
        } else {
            "ftp"
        };
        let mut detection = Detection::new(service, 0.85);
        detection.banner = Some(raw);
        return Ok(Some(detection));
    }

    let mut detection = Detection::new(
        netscout_core::well_known_service(port).unwrap_or("unknown"),
        0.5,
    );
    detection.banner = Some(raw);
    Ok(Some(detection))
}
