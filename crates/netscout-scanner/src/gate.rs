//! Pre-scan safety gate
//!
//! Before a scan dispatches, the gate probes the target on a small set of
//! sentinel ports. A public target that answers on none of them is likely
//! a typo or an unowned address, so the scan is suspended until the caller
//! explicitly consents with `force`. Private and loopback targets pass
//! unconditionally.

use crate::prober::TcpProber;
use futures::future::join_all;
use netscout_core::{PortState, Target};
use std::time::Duration;
use tracing::{debug, info};

/// Ports checked for any sign of life
pub const SENTINEL_PORTS: &[u16] = &[80, 443];

/// Short per-sentinel timeout; the gate must not noticeably delay scans
pub const SENTINEL_TIMEOUT: Duration = Duration::from_secs(2);

/// Sentinel reachability check ahead of a scan
#[derive(Debug, Clone)]
pub struct PreScanGate {
    prober: TcpProber,
    timeout: Duration,
}

impl Default for PreScanGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PreScanGate {
    pub fn new() -> Self {
        Self {
            prober: TcpProber::new(),
            timeout: SENTINEL_TIMEOUT,
        }
    }

    /// Override the sentinel timeout (tests shrink it)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the scan may proceed without explicit consent
    ///
    /// Private and loopback targets always pass. Public targets pass when
    /// any sentinel port completes a handshake within the timeout.
    pub async fn permits(&self, target: &Target) -> bool {
        if target.classification.is_private() {
            return true;
        }

        let checks = SENTINEL_PORTS.iter().map(|&port| {
            let prober = self.prober.clone();
            let ip = target.resolved_ip;
            let limit = self.timeout;
            async move { prober.probe(ip, port, limit).await }
        });

        let reachable = join_all(checks)
            .await
            .into_iter()
            .any(|outcome| outcome.state == PortState::Open);

        if reachable {
            debug!("pre-scan gate: {} answered on a sentinel port", target);
        } else {
            info!(
                "pre-scan gate: {} silent on sentinel ports {:?}",
                target, SENTINEL_PORTS
            );
        }
        reachable
    }
}
