//! Port priority tiers
//!
//! The scheduler partitions a port set into four tiers and scans them in
//! strict order, so the ports most likely to matter are reported first.
//! Membership is immutable static data compiled into the binary.

use crate::types::PortSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ports scanned first: remote access, web, and primary databases
pub const CRITICAL_PORTS: &[u16] = &[21, 22, 23, 25, 80, 443, 3306, 3389, 5432, 8080, 8443];

/// Common infrastructure and alternate application ports
pub const HIGH_PORTS: &[u16] = &[20, 53, 110, 143, 445, 1433, 1521, 3000, 5000, 8000, 27017];

/// Less common but security-relevant services
pub const MEDIUM_PORTS: &[u16] = &[135, 139, 389, 636, 1723, 2049, 5900, 6379, 9200, 11211];

/// Scheduling tier of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortPriority {
    Critical,
    High,
    Medium,
    Low,
}

/// Tiers in scheduling order
pub const TIER_ORDER: [PortPriority; 4] = [
    PortPriority::Critical,
    PortPriority::High,
    PortPriority::Medium,
    PortPriority::Low,
];

impl PortPriority {
    /// Look up the tier of a port; anything unlisted is `Low`
    pub fn of(port: u16) -> Self {
        if CRITICAL_PORTS.contains(&port) {
            PortPriority::Critical
        } else if HIGH_PORTS.contains(&port) {
            PortPriority::High
        } else if MEDIUM_PORTS.contains(&port) {
            PortPriority::Medium
        } else {
            PortPriority::Low
        }
    }

    /// Position in the scheduling order, 0 = first
    pub fn rank(&self) -> usize {
        match self {
            PortPriority::Critical => 0,
            PortPriority::High => 1,
            PortPriority::Medium => 2,
            PortPriority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PortPriority::Critical => "critical",
            PortPriority::High => "high",
            PortPriority::Medium => "medium",
            PortPriority::Low => "low",
        }
    }
}

impl fmt::Display for PortPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Partition a port set into the four tiers, preserving set order within
/// each tier. Empty tiers are included so callers can iterate `TIER_ORDER`
/// uniformly.
pub fn partition_ports(ports: &PortSet) -> [(PortPriority, Vec<u16>); 4] {
    let mut tiers: [(PortPriority, Vec<u16>); 4] = [
        (PortPriority::Critical, Vec::new()),
        (PortPriority::High, Vec::new()),
        (PortPriority::Medium, Vec::new()),
        (PortPriority::Low, Vec::new()),
    ];
    for port in ports.iter() {
        tiers[PortPriority::of(port).rank()].1.push(port);
    }
    tiers
}
