//! Database wire-protocol probes: MySQL, PostgreSQL, Redis, MongoDB
//!
//! Each probe speaks just enough of the protocol to confirm what is
//! listening -- a greeting read, a StartupMessage, a PING, an isMaster --
//! and never authenticates.

use super::{banners, Detection};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn connect(ip: IpAddr, port: u16, limit: Duration) -> io::Result<TcpStream> {
    timeout(limit, TcpStream::connect(SocketAddr::new(ip, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))?
}

async fn read_some(stream: &mut TcpStream, limit: Duration) -> io::Result<Vec<u8>> {
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

/// MySQL servers greet first; the handshake packet is length-prefixed and
/// carries a protocol version byte followed by the server version string.
pub(crate) async fn probe_mysql(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    let raw = read_some(&mut stream, limit).await?;
    Ok(banners::mysql_greeting(&raw))
}

/// PostgreSQL StartupMessage for protocol 3.0 with a probe user
fn postgres_startup() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&196608i32.to_be_bytes()); // protocol 3.0
    body.extend_from_slice(b"user\0netscout\0");
    body.push(0);
    let mut message = Vec::with_capacity(body.len() + 4);
    message.extend_from_slice(&((body.len() as i32 + 4).to_be_bytes()));
    message.extend_from_slice(&body);
    message
}

/// PostgreSQL answers a StartupMessage with ErrorResponse ('E') or an
/// authentication request ('R'); either framing confirms the protocol.
pub(crate) async fn probe_postgres(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    stream.write_all(&postgres_startup()).await?;

    let raw = read_some(&mut stream, limit).await?;
    if raw.len() < 5 || !(raw[0] == b'E' || raw[0] == b'R') {
        return Ok(None);
    }
    let declared = i32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
    if declared < 4 {
        return Ok(None);
    }

    let mut detection = Detection::new("postgresql", 0.9);
    detection.banner = Some(raw);
    Ok(Some(detection))
}

/// Redis answers an inline PING with +PONG
pub(crate) async fn probe_redis(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    stream.write_all(b"PING\r\n").await?;

    let raw = read_some(&mut stream, limit).await?;
    if raw.starts_with(b"+PONG") {
        let mut detection = Detection::new("redis", 0.95);
        detection.banner = Some(raw);
        return Ok(Some(detection));
    }
    // Protected-mode servers refuse with -DENIED but are still Redis
    if raw.starts_with(b"-DENIED") || raw.starts_with(b"-NOAUTH") {
        let mut detection = Detection::new("redis", 0.9);
        detection.banner = Some(raw);
        return Ok(Some(detection));
    }
    Ok(None)
}

/// Legacy OP_QUERY isMaster against admin.$cmd
fn mongodb_is_master() -> Vec<u8> {
    // BSON document { "isMaster": 1 }
    let mut doc = Vec::new();
    doc.push(0x10); // int32 element
    doc.extend_from_slice(b"isMaster\0");
    doc.extend_from_slice(&1i32.to_le_bytes());
    doc.push(0); // document terminator
    let doc_len = (doc.len() as i32 + 4).to_le_bytes();

    let mut body = Vec::new();
    body.extend_from_slice(&0i32.to_le_bytes()); // flags
    body.extend_from_slice(b"admin.$cmd\0");
    body.extend_from_slice(&0i32.to_le_bytes()); // numberToSkip
    body.extend_from_slice(&1i32.to_le_bytes()); // numberToReturn
    body.extend_from_slice(&doc_len);
    body.extend_from_slice(&doc);

    let total = (body.len() as i32 + 16).to_le_bytes();
    let mut message = Vec::with_capacity(body.len() + 16);
    message.extend_from_slice(&total); // messageLength
    message.extend_from_slice(&1i32.to_le_bytes()); // requestID
    message.extend_from_slice(&0i32.to_le_bytes()); // responseTo
    message.extend_from_slice(&2004i32.to_le_bytes()); // OP_QUERY
    message.extend_from_slice(&body);
    message
}

/// MongoDB replies with a length-prefixed wire message echoing our request
/// id in responseTo.
pub(crate) async fn probe_mongodb(
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> io::Result<Option<Detection>> {
    let mut stream = connect(ip, port, limit).await?;
    stream.write_all(&mongodb_is_master()).await?;

    let raw = read_some(&mut stream, limit).await?;
    if raw.len() < 16 {
        return Ok(None);
    }
    let declared = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let response_to = i32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
    if declared < 16 || response_to != 1 {
        return Ok(None);
    }

    let mut detection = Detection::new("mongodb", 0.9);
    detection.banner = Some(raw);
    Ok(Some(detection))
}
