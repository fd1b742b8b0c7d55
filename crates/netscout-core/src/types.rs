//! Core types for the reconnaissance pipeline

use crate::error::{Error, Result};
use crate::risk::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

/// Maximum number of ports a single scan may expand to
pub const MAX_PORTS: usize = 65_535;

/// Maximum banner length retained on a result, in bytes
pub const MAX_BANNER_LEN: usize = 1024;

/// An ordered, deduplicated set of TCP ports parsed from range syntax
///
/// Accepts `"80"`, `"1-1000"`, `"22,80,443"`, and mixtures such as
/// `"22-25,80,443"`. Ranges are inclusive; duplicates are dropped while
/// preserving first-seen order. Hashing callers use [`PortSet::sorted`],
/// which is insensitive to input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSet {
    ports: Vec<u16>,
}

impl PortSet {
    /// Parse a port specification string
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPortSpec`] for empty specs, port 0, reversed
    /// ranges, non-numeric parts, or expansions beyond [`MAX_PORTS`].
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidPortSpec("empty specification".to_string()));
        }

        let mut seen = [false; 65536];
        let mut ports = Vec::new();
        let mut expanded = 0usize;

        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::InvalidPortSpec(format!("empty part in {:?}", input)));
            }

            let (start, end) = match part.split_once('-') {
                Some((lo, hi)) => (Self::parse_port(lo)?, Self::parse_port(hi)?),
                None => {
                    let p = Self::parse_port(part)?;
                    (p, p)
                }
            };

            if end < start {
                return Err(Error::InvalidPortSpec(format!(
                    "end port {} < start port {}",
                    end, start
                )));
            }

            expanded += (end - start) as usize + 1;
            if expanded > MAX_PORTS {
                return Err(Error::InvalidPortSpec(format!(
                    "specification expands past {} ports",
                    MAX_PORTS
                )));
            }

            for port in start..=end {
                if !seen[port as usize] {
                    seen[port as usize] = true;
                    ports.push(port);
                }
            }
        }

        Ok(Self { ports })
    }

    fn parse_port(s: &str) -> Result<u16> {
        let port: u16 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidPortSpec(format!("invalid port number: {:?}", s)))?;
        if port == 0 {
            return Err(Error::InvalidPortSpec("port 0 is invalid".to_string()));
        }
        Ok(port)
    }

    /// Construct from an explicit list, deduplicating in order
    pub fn from_ports(list: impl IntoIterator<Item = u16>) -> Self {
        let mut seen = [false; 65536];
        let mut ports = Vec::new();
        for port in list {
            if port != 0 && !seen[port as usize] {
                seen[port as usize] = true;
                ports.push(port);
            }
        }
        Self { ports }
    }

    /// Iterate ports in parse order
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }

    /// Ports in ascending order; the canonical form used for cache keys
    pub fn sorted(&self) -> Vec<u16> {
        let mut out = self.ports.clone();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ports
    }
}

impl fmt::Display for PortSet {
    /// Compact canonical rendering: sorted, runs collapsed to ranges
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sorted = self.sorted();
        let mut parts: Vec<String> = Vec::new();
        let mut i = 0;
        while i < sorted.len() {
            let start = sorted[i];
            let mut end = start;
            while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
                end = sorted[i + 1];
                i += 1;
            }
            if end > start {
                parts.push(format!("{}-{}", start, end));
            } else {
                parts.push(format!("{}", start));
            }
            i += 1;
        }
        write!(f, "{}", parts.join(","))
    }
}

/// State of a probed port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    /// Three-way handshake completed
    Open,
    /// Peer refused the connection (RST)
    Closed,
    /// No response within the timeout, or unreachable
    Filtered,
    /// Local resource failure (fd limit, ephemeral port exhaustion)
    Error,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
            PortState::Error => write!(f, "error"),
        }
    }
}

/// Transport protocol of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Address classification of a resolved target
///
/// Loopback and internal targets are scanned but flagged; the class also
/// selects the cache TTL. `Placeholder` never reaches a live [`Target`] --
/// blocklisted names are rejected during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    Loopback,
    Internal,
    External,
    Placeholder,
}

impl TargetClass {
    /// Classify a resolved IP address
    pub fn of(ip: IpAddr) -> Self {
        if ip.is_loopback() {
            return TargetClass::Loopback;
        }
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_private() || v4.is_link_local() {
                    TargetClass::Internal
                } else {
                    TargetClass::External
                }
            }
            IpAddr::V6(v6) => {
                // fc00::/7 unique local
                if (v6.segments()[0] & 0xfe00) == 0xfc00 {
                    TargetClass::Internal
                } else {
                    TargetClass::External
                }
            }
        }
    }

    /// Whether the address is on a private or loopback network
    pub fn is_private(&self) -> bool {
        matches!(self, TargetClass::Loopback | TargetClass::Internal)
    }
}

/// A validated, resolved scan target
///
/// Created once at scan request time and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// The host string as supplied by the caller
    pub host: String,
    /// Resolved IP address
    pub resolved_ip: IpAddr,
    /// Address classification
    pub classification: TargetClass,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.resolved_ip.to_string() {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{} ({})", self.host, self.resolved_ip)
        }
    }
}

/// Whether results come from live probing or cache replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Cached,
}

/// TLS handshake observations for a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsObservation {
    /// Negotiated protocol version, e.g. "TLSv1.3"
    pub version: Option<String>,
    /// Negotiated cipher suite
    pub cipher: Option<String>,
    /// Certificate subject common name
    pub cert_subject: Option<String>,
    /// Certificate issuer common name
    pub cert_issuer: Option<String>,
    /// Certificate expiry (RFC 2822)
    pub cert_not_after: Option<String>,
    /// Handshake or parse failure, reported in place rather than aborting
    pub error: Option<String>,
}

/// CSP header status from the HTTP audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CspStatus {
    Present,
    Weak,
    Missing,
}

/// Security-relevant response header audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityHeadersAudit {
    pub hsts: bool,
    pub x_frame_options: bool,
    pub x_content_type_options: bool,
    pub csp: CspStatus,
}

impl Default for SecurityHeadersAudit {
    fn default() -> Self {
        Self {
            hsts: false,
            x_frame_options: false,
            x_content_type_options: false,
            csp: CspStatus::Missing,
        }
    }
}

/// HTTP-layer observations collected over plaintext or inside TLS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpObservation {
    pub status_code: Option<u16>,
    pub http_version: Option<String>,
    /// 0-100 aggregate posture score
    pub security_score: u8,
    pub security_headers: SecurityHeadersAudit,
    pub csp_warnings: Vec<String>,
    pub cors_warnings: Vec<String>,
    pub directory_listing: bool,
    pub forms_over_http: bool,
    /// Request failure, reported in place rather than aborting
    pub error: Option<String>,
}

/// Result of scanning and classifying a single port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
    pub state: PortState,
    pub protocol: Protocol,
    pub service: Option<String>,
    pub version: Option<String>,
    /// Raw banner, truncated to 1 KiB, newlines normalized
    pub banner: Option<String>,
    /// Detector certainty in [0.0, 1.0]
    pub confidence: f32,
    /// Observed connect round-trip time
    #[serde(with = "duration_ms")]
    pub response_time: Duration,
    pub risk: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsObservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpObservation>,
}

impl PortResult {
    /// Create a bare result for a probed port
    pub fn new(port: u16, state: PortState) -> Self {
        Self {
            port,
            state,
            protocol: Protocol::Tcp,
            service: None,
            version: None,
            banner: None,
            confidence: 0.0,
            response_time: Duration::ZERO,
            risk: None,
            cvss_score: None,
            vulnerabilities: Vec::new(),
            recommendations: Vec::new(),
            tls: None,
            http: None,
        }
    }

    pub fn with_response_time(mut self, rtt: Duration) -> Self {
        self.response_time = rtt;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>, confidence: f32) -> Self {
        self.service = Some(service.into());
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attach a banner, truncating and normalizing line endings
    pub fn with_banner(mut self, raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(&raw[..raw.len().min(MAX_BANNER_LEN)]);
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        self.banner = Some(normalized.trim_end_matches('\n').to_string());
        self
    }
}

impl fmt::Display for PortResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.port, self.protocol, self.state)?;
        if let Some(service) = &self.service {
            write!(f, " [{}]", service)?;
        }
        if let Some(version) = &self.version {
            write!(f, " {}", version)?;
        }
        Ok(())
    }
}

/// Lifecycle status of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Pending => write!(f, "pending"),
            ScanStatus::Running => write!(f, "running"),
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Failed => write!(f, "failed"),
            ScanStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One recorded adjustment from the adaptive controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveAdjustment {
    pub at: DateTime<Utc>,
    /// Why the adjustment fired, e.g. "success rate 0.42 below 0.70"
    pub reason: String,
    pub concurrency: usize,
    pub timeout_ms: u64,
}

/// A complete scan: request, lifecycle, and accumulated results
///
/// Owned by the scheduler for the duration of the scan; workers emit
/// [`PortResult`]s by value and hold no reference to the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: Uuid,
    pub target: Target,
    pub ports: PortSet,
    pub config: crate::config::ScanConfig,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only while the scan is running
    pub results: Vec<PortResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<AdaptiveAdjustment>,
}

impl ScanRecord {
    pub fn new(target: Target, ports: PortSet, config: crate::config::ScanConfig) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            target,
            ports,
            config,
            status: ScanStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            adjustments: Vec::new(),
        }
    }

    /// Move to a terminal status, stamping `completed_at`
    pub fn finish(&mut self, status: ScanStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn open_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.state == PortState::Open)
            .count()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_set_single() {
        let ports = PortSet::parse("80").unwrap();
        assert_eq!(ports.len(), 1);
        assert!(ports.contains(80));
    }

    #[test]
    fn test_port_set_range() {
        let ports = PortSet::parse("80-83").unwrap();
        assert_eq!(ports.sorted(), vec![80, 81, 82, 83]);
    }

    #[test]
    fn test_port_set_mixed() {
        let ports = PortSet::parse("22-25,80,443").unwrap();
        assert_eq!(ports.len(), 6);
        assert_eq!(ports.sorted(), vec![22, 23, 24, 25, 80, 443]);
    }

    #[test]
    fn test_port_set_dedup_order_insensitive() {
        let a = PortSet::parse("22,80,443").unwrap();
        let b = PortSet::parse("443,22,80,22").unwrap();
        assert_eq!(a.sorted(), b.sorted());
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn test_port_set_invalid() {
        assert!(PortSet::parse("").is_err());
        assert!(PortSet::parse("0").is_err());
        assert!(PortSet::parse("70000").is_err());
        assert!(PortSet::parse("abc").is_err());
        assert!(PortSet::parse("100-50").is_err());
        assert!(PortSet::parse("80,,443").is_err());
    }

    #[test]
    fn test_port_set_oversize_rejected() {
        // 1-65535 expands to exactly the cap; duplicating it overflows
        assert!(PortSet::parse("1-65535").is_ok());
        assert!(PortSet::parse("1-65535,1-2").is_err());
    }

    #[test]
    fn test_port_set_display_collapses_runs() {
        let ports = PortSet::parse("443,22,23,24,80").unwrap();
        assert_eq!(ports.to_string(), "22-24,80,443");
    }

    #[test]
    fn test_target_class_loopback() {
        assert_eq!(
            TargetClass::of("127.0.0.1".parse().unwrap()),
            TargetClass::Loopback
        );
        assert_eq!(TargetClass::of("::1".parse().unwrap()), TargetClass::Loopback);
    }

    #[test]
    fn test_target_class_private() {
        assert_eq!(
            TargetClass::of("192.168.1.10".parse().unwrap()),
            TargetClass::Internal
        );
        assert_eq!(
            TargetClass::of("10.0.0.1".parse().unwrap()),
            TargetClass::Internal
        );
    }

    #[test]
    fn test_target_class_public() {
        assert_eq!(
            TargetClass::of("1.1.1.1".parse().unwrap()),
            TargetClass::External
        );
        assert!(!TargetClass::External.is_private());
        assert!(TargetClass::Loopback.is_private());
    }

    #[test]
    fn test_port_result_builders() {
        let result = PortResult::new(22, PortState::Open)
            .with_response_time(Duration::from_millis(12))
            .with_service("ssh", 0.95)
            .with_version("OpenSSH_8.9")
            .with_banner(b"SSH-2.0-OpenSSH_8.9\r\n");

        assert_eq!(result.port, 22);
        assert_eq!(result.service.as_deref(), Some("ssh"));
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.banner.as_deref(), Some("SSH-2.0-OpenSSH_8.9"));
    }

    #[test]
    fn test_banner_truncation() {
        let raw = vec![b'A'; 4096];
        let result = PortResult::new(80, PortState::Open).with_banner(&raw);
        assert_eq!(result.banner.unwrap().len(), MAX_BANNER_LEN);
    }

    #[test]
    fn test_confidence_clamped() {
        let result = PortResult::new(80, PortState::Open).with_service("http", 1.7);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_port_result_serialization_round_trip() {
        let result = PortResult::new(443, PortState::Open)
            .with_service("https", 0.92)
            .with_response_time(Duration::from_millis(30));
        let json = serde_json::to_string(&result).unwrap();
        let back: PortResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }

    #[test]
    fn test_scan_record_lifecycle() {
        let target = Target {
            host: "127.0.0.1".to_string(),
            resolved_ip: "127.0.0.1".parse().unwrap(),
            classification: TargetClass::Loopback,
        };
        let mut record = ScanRecord::new(
            target,
            PortSet::parse("22,80").unwrap(),
            crate::config::ScanConfig::default(),
        );

        assert_eq!(record.status, ScanStatus::Pending);
        assert!(record.completed_at.is_none());

        record.status = ScanStatus::Running;
        record.results.push(PortResult::new(22, PortState::Open));
        record.finish(ScanStatus::Completed);

        assert!(record.status.is_terminal());
        assert!(record.completed_at.unwrap() >= record.created_at);
        assert_eq!(record.open_count(), 1);
    }

    #[test]
    fn test_scan_status_display() {
        assert_eq!(ScanStatus::Running.to_string(), "running");
        assert_eq!(ScanStatus::Cancelled.to_string(), "cancelled");
    }
}
