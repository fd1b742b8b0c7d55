//! TCP connect prober
//!
//! One connection attempt per port over the OS socket API. The full
//! handshake requires no privileges and works against every target; the
//! connection is closed immediately on success, and any banner reading is
//! the detector's job.
//!
//! State classification:
//! - handshake completed -> `Open`
//! - connection refused (RST) -> `Closed`
//! - timeout, unreachable, or policy denial -> `Filtered`
//! - local resource exhaustion (fds, ephemeral ports) -> `Error`

use netscout_core::PortState;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub state: PortState,
    /// Observed connect round-trip time (full timeout on no response)
    pub rtt: Duration,
    /// True when the probe timed out with no response at all; a timeout is
    /// not counted as a success by the adaptive controller
    pub timed_out: bool,
}

/// TCP connect prober
///
/// Stateless and cheap to share; the per-probe timeout is passed by the
/// caller so the adaptive controller can retune it mid-scan.
#[derive(Debug, Clone, Default)]
pub struct TcpProber;

impl TcpProber {
    pub fn new() -> Self {
        Self
    }

    /// Probe a single port
    ///
    /// Never returns `Err`: every failure mode is folded into the outcome
    /// state so the scheduler can keep going and the controller can learn
    /// from it.
    pub async fn probe(&self, ip: IpAddr, port: u16, limit: Duration) -> ProbeOutcome {
        let addr = SocketAddr::new(ip, port);
        let start = Instant::now();

        trace!("probing {}", addr);

        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let rtt = start.elapsed();
                debug!("port {} open on {} ({:?})", port, ip, rtt);
                drop(stream);
                ProbeOutcome {
                    state: PortState::Open,
                    rtt,
                    timed_out: false,
                }
            }
            Ok(Err(e)) => {
                let rtt = start.elapsed();
                let state = match e.kind() {
                    ErrorKind::ConnectionRefused => PortState::Closed,
                    // Local socket exhaustion: source port or fd pressure
                    ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => {
                        warn!("local resource failure probing {}: {}", addr, e);
                        PortState::Error
                    }
                    // Unreachable networks and policy denials look filtered
                    _ => {
                        debug!("probe {} failed: {}", addr, e);
                        PortState::Filtered
                    }
                };
                ProbeOutcome {
                    state,
                    rtt,
                    timed_out: false,
                }
            }
            Err(_elapsed) => {
                trace!("probe {} timed out after {:?}", addr, limit);
                ProbeOutcome {
                    state: PortState::Filtered,
                    rtt: limit,
                    timed_out: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpProber::new();
        let outcome = prober
            .probe(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                Duration::from_millis(500),
            )
            .await;

        assert_eq!(outcome.state, PortState::Open);
        assert!(!outcome.timed_out);
        assert!(outcome.rtt < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        // Bind then drop to find a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = TcpProber::new();
        let outcome = prober
            .probe(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                Duration::from_millis(500),
            )
            .await;

        // Closed or filtered depending on local firewall policy
        assert!(matches!(
            outcome.state,
            PortState::Closed | PortState::Filtered
        ));
    }

    #[tokio::test]
    async fn test_probe_timeout_is_filtered() {
        // TEST-NET-1 never answers
        let prober = TcpProber::new();
        let outcome = prober
            .probe(
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
                80,
                Duration::from_millis(50),
            )
            .await;

        assert_eq!(outcome.state, PortState::Filtered);
        assert!(outcome.timed_out);
        assert_eq!(outcome.rtt, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_probe_measures_rtt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = TcpProber::new()
            .probe(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                Duration::from_secs(1),
            )
            .await;

        assert!(outcome.rtt > Duration::ZERO);
        assert!(outcome.rtt < Duration::from_secs(1));
    }
}
