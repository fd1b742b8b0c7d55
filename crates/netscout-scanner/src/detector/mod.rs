//! Active service detection
//!
//! Classifies open ports by sending protocol-specific payloads and reading
//! greetings. Probes are tried in priority order -- the port's most likely
//! protocol first -- and detection stops at the first match with
//! confidence at or above [`HIGH_CONFIDENCE`]. Every probe carries its own
//! 3 s timeout and is retried once on a transient socket error.
//!
//! Confidence ladder:
//! - >= 0.9: specific protocol handshake or banner match
//! - 0.7 - 0.9: recognizable pattern in a greeting
//! - 0.5 - 0.7: some response, nothing recognizable
//! - 0.3: static port-table fallback
//! - 0.0: nothing at all

mod banners;
mod db_probes;
mod http;
mod tls;

use netscout_core::{
    assess_risk, well_known_service, HttpObservation, PortResult, PortState, TlsObservation,
};
use netscout_core::services::FALLBACK_CONFIDENCE;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, trace};

pub use http::audit_http_response;

/// Timeout applied independently to each probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Confidence at which detection stops
pub const HIGH_CONFIDENCE: f32 = 0.9;

/// What a single probe learned about a port
#[derive(Debug, Clone)]
pub(crate) struct Detection {
    pub service: String,
    pub version: Option<String>,
    pub banner: Option<Vec<u8>>,
    pub confidence: f32,
    pub tls: Option<TlsObservation>,
    pub http: Option<HttpObservation>,
}

impl Detection {
    pub(crate) fn new(service: &str, confidence: f32) -> Self {
        Self {
            service: service.to_string(),
            version: None,
            banner: None,
            confidence,
            tls: None,
            http: None,
        }
    }
}

/// The probe set, in the order candidates are attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Http,
    Tls,
    Ssh,
    Ftp,
    Smtp,
    Mysql,
    Postgres,
    Redis,
    Mongo,
    /// Passive greeting read that classifies self-announcing protocols
    Greeting,
}

/// Ports whose primary probe is plaintext HTTP
const HTTP_PORTS: &[u16] = &[80, 81, 3000, 5000, 8000, 8008, 8080, 8081, 8888];

/// Ports whose primary probe is a TLS handshake
const TLS_PORTS: &[u16] = &[443, 465, 636, 993, 995, 8443, 9443];

fn probe_order(port: u16) -> Vec<Probe> {
    let primary = match port {
        p if HTTP_PORTS.contains(&p) => Probe::Http,
        p if TLS_PORTS.contains(&p) => Probe::Tls,
        22 | 2222 => Probe::Ssh,
        21 => Probe::Ftp,
        25 | 587 => Probe::Smtp,
        3306 => Probe::Mysql,
        5432 => Probe::Postgres,
        6379 => Probe::Redis,
        27017 => Probe::Mongo,
        _ => Probe::Greeting,
    };

    // After the port's own protocol, fall through the self-announcing
    // greeting read, then the two web probes that cover most of the rest.
    let mut order = vec![primary];
    for fallback in [Probe::Greeting, Probe::Http, Probe::Tls] {
        if !order.contains(&fallback) {
            order.push(fallback);
        }
    }
    order
}

/// Service detector for open ports
///
/// Cheap to construct and stateless; one instance is shared by all workers
/// of a scan.
#[derive(Debug, Clone)]
pub struct ServiceDetector {
    enhanced: bool,
    probe_timeout: Duration,
}

impl ServiceDetector {
    pub fn new(enhanced: bool) -> Self {
        Self {
            enhanced,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    /// Override the per-probe timeout (tests shrink it)
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Classify an open port into a full [`PortResult`]
    ///
    /// `host` feeds TLS SNI; `rtt` is the connect round-trip observed by
    /// the prober. Detection failures downgrade to the port-table fallback
    /// rather than erroring -- the port stays open regardless.
    pub async fn detect(
        &self,
        ip: IpAddr,
        port: u16,
        host: &str,
        rtt: Duration,
    ) -> PortResult {
        let mut result = PortResult::new(port, PortState::Open).with_response_time(rtt);

        if self.enhanced {
            if let Some(detection) = self.run_probes(ip, port, host).await {
                result.service = Some(detection.service);
                result.version = detection.version;
                result.confidence = detection.confidence.clamp(0.0, 1.0);
                result.tls = detection.tls;
                result.http = detection.http;
                if let Some(raw) = detection.banner {
                    result = result.with_banner(&raw);
                }
            }
        }

        // Port-table fallback when probing is off or came up empty
        if result.service.is_none() {
            if let Some(name) = well_known_service(port) {
                result.service = Some(name.to_string());
                result.confidence = FALLBACK_CONFIDENCE;
            }
        }

        let assessment = assess_risk(port, result.service.as_deref());
        result.risk = Some(assessment.risk);
        result.cvss_score = assessment.cvss_score;
        result.vulnerabilities = assessment.vulnerabilities;
        result.recommendations = assessment.recommendations;

        result
    }

    async fn run_probes(&self, ip: IpAddr, port: u16, host: &str) -> Option<Detection> {
        let mut best: Option<Detection> = None;

        for probe in probe_order(port) {
            let attempt = self.run_probe(probe, ip, port, host).await;
            match attempt {
                Some(detection) => {
                    trace!(
                        "port {}: probe {:?} matched {} ({:.2})",
                        port,
                        probe,
                        detection.service,
                        detection.confidence
                    );
                    if detection.confidence >= HIGH_CONFIDENCE {
                        return Some(detection);
                    }
                    let better = best
                        .as_ref()
                        .map(|b| detection.confidence > b.confidence)
                        .unwrap_or(true);
                    if better {
                        best = Some(detection);
                    }
                }
                None => trace!("port {}: probe {:?} no match", port, probe),
            }
        }

        debug!(
            "port {}: detection settled at {:?}",
            port,
            best.as_ref().map(|b| (&b.service, b.confidence))
        );
        best
    }

    /// Run one probe with a single retry on transient socket error
    async fn run_probe(
        &self,
        probe: Probe,
        ip: IpAddr,
        port: u16,
        host: &str,
    ) -> Option<Detection> {
        for attempt in 0..2 {
            let outcome = match probe {
                Probe::Http => http::probe_http(ip, port, self.probe_timeout).await,
                Probe::Tls => tls::probe_tls(ip, port, host, self.probe_timeout).await,
                Probe::Ssh => banners::probe_ssh(ip, port, self.probe_timeout).await,
                Probe::Ftp => banners::probe_ftp(ip, port, self.probe_timeout).await,
                Probe::Smtp => banners::probe_smtp(ip, port, self.probe_timeout).await,
                Probe::Mysql => db_probes::probe_mysql(ip, port, self.probe_timeout).await,
                Probe::Postgres => db_probes::probe_postgres(ip, port, self.probe_timeout).await,
                Probe::Redis => db_probes::probe_redis(ip, port, self.probe_timeout).await,
                Probe::Mongo => db_probes::probe_mongodb(ip, port, self.probe_timeout).await,
                Probe::Greeting => banners::probe_greeting(ip, port, self.probe_timeout).await,
            };

            match outcome {
                Ok(detection) => return detection,
                Err(e) if attempt == 0 => {
                    trace!("port {}: probe {:?} socket error, retrying: {}", port, probe, e);
                }
                Err(e) => {
                    trace!("port {}: probe {:?} failed twice: {}", port, probe, e);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn spawn_banner_listener(banner: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(banner).await;
                // Hold the socket open briefly so the client can read
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });
        port
    }

    fn local() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn fast_detector() -> ServiceDetector {
        ServiceDetector::new(true).with_probe_timeout(Duration::from_millis(400))
    }

    #[test]
    fn test_probe_order_puts_port_protocol_first() {
        assert_eq!(probe_order(22)[0], Probe::Ssh);
        assert_eq!(probe_order(80)[0], Probe::Http);
        assert_eq!(probe_order(443)[0], Probe::Tls);
        assert_eq!(probe_order(6379)[0], Probe::Redis);
        assert_eq!(probe_order(49152)[0], Probe::Greeting);
    }

    #[test]
    fn test_probe_order_no_duplicates() {
        for port in [22, 80, 443, 3306, 49152] {
            let order = probe_order(port);
            let mut dedup = order.clone();
            dedup.dedup();
            assert_eq!(order.len(), dedup.len());
        }
    }

    #[tokio::test]
    async fn test_detect_ssh_banner() {
        let port = spawn_banner_listener(b"SSH-2.0-OpenSSH_8.9p1 Ubuntu\r\n").await;
        let result = fast_detector().detect(local(), port, "127.0.0.1", Duration::ZERO).await;

        assert_eq!(result.service.as_deref(), Some("ssh"));
        assert!(result.confidence >= 0.9);
        assert!(result.version.as_deref().unwrap().contains("OpenSSH_8.9"));
        assert!(result.banner.as_deref().unwrap().starts_with("SSH-2.0-"));
    }

    #[tokio::test]
    async fn test_detect_ftp_banner() {
        let port = spawn_banner_listener(b"220 ProFTPD Server ready.\r\n").await;
        let result = fast_detector().detect(local(), port, "127.0.0.1", Duration::ZERO).await;

        assert_eq!(result.service.as_deref(), Some("ftp"));
        assert!(result.confidence >= 0.85);
    }

    #[tokio::test]
    async fn test_fallback_mode_uses_port_table() {
        let detector = ServiceDetector::new(false);
        let result = detector.detect(local(), 3306, "127.0.0.1", Duration::ZERO).await;

        assert_eq!(result.service.as_deref(), Some("mysql"));
        assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
        // Risk annotation still applies in fallback mode
        assert!(result.risk.is_some());
    }

    #[tokio::test]
    async fn test_fallback_unknown_port_no_service() {
        let detector = ServiceDetector::new(false);
        let result = detector.detect(local(), 49152, "127.0.0.1", Duration::ZERO).await;

        assert!(result.service.is_none());
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_silent_listener_downgrades_to_table() {
        // Listener accepts but never speaks; probes time out, fallback wins
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let detector =
            ServiceDetector::new(true).with_probe_timeout(Duration::from_millis(100));
        let result = detector.detect(local(), port, "127.0.0.1", Duration::ZERO).await;

        assert_eq!(result.state, PortState::Open);
        // Ephemeral port is not in the table; nothing was learned
        assert!(result.confidence <= FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_http_detection_through_full_detector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                use tokio::io::AsyncReadExt;
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\nContent-Length: 0\r\n\r\n",
                    )
                    .await;
            }
        });

        let result = fast_detector().detect(local(), port, "127.0.0.1", Duration::ZERO).await;
        assert_eq!(result.service.as_deref(), Some("http"));
        assert!(result.confidence >= 0.9);
        assert_eq!(result.version.as_deref(), Some("nginx/1.18.0"));
        let http = result.http.expect("http observation");
        assert_eq!(http.status_code, Some(200));
    }
}
