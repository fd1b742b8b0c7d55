//! Static risk annotation rules
//!
//! Maps (port, service) to a risk level, optional CVSS score, and
//! remediation guidance. The table is versioned with the build; there are
//! no live CVE lookups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of exposing a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Info => write!(f, "INFO"),
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Risk annotation attached to an open-port result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk: RiskLevel,
    pub cvss_score: Option<f32>,
    pub vulnerabilities: Vec<String>,
    pub recommendations: Vec<String>,
}

impl RiskAssessment {
    fn new(risk: RiskLevel) -> Self {
        Self {
            risk,
            cvss_score: None,
            vulnerabilities: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn cvss(mut self, score: f32) -> Self {
        self.cvss_score = Some(score);
        self
    }

    fn vuln(mut self, v: &str) -> Self {
        self.vulnerabilities.push(v.to_string());
        self
    }

    fn advise(mut self, r: &str) -> Self {
        self.recommendations.push(r.to_string());
        self
    }
}

/// Assess the exposure risk of an open port
///
/// The service label (when detection produced one) takes precedence over
/// the port number, so a MySQL server on a nonstandard port is still rated
/// as MySQL.
pub fn assess_risk(port: u16, service: Option<&str>) -> RiskAssessment {
    match service.unwrap_or_default() {
        "telnet" => return telnet_risk(),
        "ftp" => return ftp_risk(),
        "ssh" => return ssh_risk(),
        "rdp" => return rdp_risk(),
        "smb" | "netbios-ssn" => return smb_risk(),
        "mysql" | "postgresql" | "mssql" | "oracle" => return database_risk(),
        "redis" => return redis_risk(),
        "mongodb" => return mongodb_risk(),
        "memcached" => return memcached_risk(),
        "elasticsearch" => return elasticsearch_risk(),
        "vnc" => return vnc_risk(),
        "ldap" => return ldap_risk(),
        "nfs" => return nfs_risk(),
        "smtp" => return smtp_risk(),
        "http" => return http_risk(),
        "https" => return https_risk(),
        _ => {}
    }

    match port {
        23 => telnet_risk(),
        21 | 20 => ftp_risk(),
        22 => ssh_risk(),
        3389 => rdp_risk(),
        445 | 139 | 135 => smb_risk(),
        3306 | 5432 | 1433 | 1521 => database_risk(),
        6379 => redis_risk(),
        27017 => mongodb_risk(),
        11211 => memcached_risk(),
        9200 => elasticsearch_risk(),
        5900 => vnc_risk(),
        389 | 636 => ldap_risk(),
        2049 => nfs_risk(),
        25 => smtp_risk(),
        80 | 8080 | 8000 => http_risk(),
        443 | 8443 => https_risk(),
        1723 => RiskAssessment::new(RiskLevel::High)
            .vuln("PPTP uses broken MS-CHAPv2 authentication")
            .advise("Replace PPTP with a modern VPN (WireGuard, IPsec)"),
        _ => RiskAssessment::new(RiskLevel::Info),
    }
}

fn telnet_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Critical)
        .cvss(9.8)
        .vuln("Credentials and session data transit in cleartext")
        .advise("Disable telnet and use SSH")
}

fn ftp_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .cvss(7.5)
        .vuln("Cleartext authentication; anonymous login frequently enabled")
        .advise("Use SFTP or FTPS")
        .advise("Verify anonymous login is disabled")
}

fn ssh_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Low)
        .advise("Require key-based authentication")
        .advise("Rate-limit authentication attempts")
}

fn rdp_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .cvss(9.8)
        .vuln("Exposed RDP is a common ransomware entry point (BlueKeep class)")
        .advise("Restrict RDP to VPN access")
        .advise("Enable network-level authentication")
}

fn smb_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .cvss(8.1)
        .vuln("SMBv1 exposure enables EternalBlue-class exploitation")
        .advise("Block SMB at the network boundary")
        .advise("Disable SMBv1")
}

fn database_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .vuln("Database reachable from scan origin")
        .advise("Bind database listeners to internal interfaces only")
        .advise("Enforce strong authentication and TLS")
}

fn redis_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .cvss(9.1)
        .vuln("Redis ships without authentication by default")
        .advise("Enable requirepass / ACLs and bind to localhost")
}

fn mongodb_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .cvss(9.1)
        .vuln("Unauthenticated MongoDB permits full data access")
        .advise("Enable authorization and network-restrict the listener")
}

fn memcached_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Medium)
        .vuln("Exposed memcached can be abused for UDP amplification")
        .advise("Bind memcached to localhost")
}

fn elasticsearch_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .vuln("Unauthenticated Elasticsearch exposes indexed data")
        .advise("Enable security features and restrict network access")
}

fn vnc_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::High)
        .vuln("VNC authentication is weak and frequently absent")
        .advise("Tunnel VNC over SSH or a VPN")
}

fn ldap_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Medium)
        .vuln("Anonymous LDAP binds can enumerate directory contents")
        .advise("Disable anonymous binds; prefer LDAPS")
}

fn nfs_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Medium)
        .vuln("World-readable NFS exports leak file contents")
        .advise("Restrict exports to known client addresses")
}

fn smtp_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Medium)
        .vuln("Open relays enable spam and spoofing")
        .advise("Verify relay restrictions and require STARTTLS")
}

fn http_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Low)
        .advise("Redirect plaintext HTTP to HTTPS")
}

fn https_risk() -> RiskAssessment {
    RiskAssessment::new(RiskLevel::Info).advise("Keep TLS configuration current")
}
