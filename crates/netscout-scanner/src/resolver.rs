//! Target validation and resolution
//!
//! The only component permitted to perform DNS. Validation runs in a fixed
//! order: empty rejection, placeholder blocklist, IP-literal fast path,
//! then a bounded A-record lookup. The resolved address is classified to
//! drive cache TTLs and the pre-scan gate.

use netscout_core::{Error, Result, Target, TargetClass};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Wall-clock bound on a single DNS lookup
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Names rejected before any network activity
pub const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "test.com",
    "localhost",
    "placeholder.local",
    "demo.com",
    "sample.com",
];

/// Narrow DNS interface so tests and embedders can swap the resolver
///
/// Object-safe: the single lookup method returns a boxed future.
pub trait DnsResolver: Send + Sync {
    /// Resolve a hostname to its first A/AAAA record
    fn lookup<'a>(
        &'a self,
        host: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<IpAddr>> + Send + 'a>>;
}

/// System resolver backed by `tokio::net::lookup_host`
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

impl DnsResolver for SystemResolver {
    fn lookup<'a>(
        &'a self,
        host: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<IpAddr>> + Send + 'a>> {
        Box::pin(async move {
            // Port 0 satisfies the ToSocketAddrs contract; only the address
            // matters here.
            let mut addrs = tokio::net::lookup_host((host, 0))
                .await
                .map_err(|_| Error::Unresolvable(host.to_string()))?;
            addrs
                .next()
                .map(|sa| sa.ip())
                .ok_or_else(|| Error::Unresolvable(host.to_string()))
        })
    }
}

/// Validates raw target strings and resolves them to classified [`Target`]s
pub struct TargetResolver {
    dns: Arc<dyn DnsResolver>,
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl TargetResolver {
    pub fn new(dns: Arc<dyn DnsResolver>) -> Self {
        Self { dns }
    }

    /// Validate and resolve a target host
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyTarget`] for empty or whitespace input
    /// - [`Error::Placeholder`] for blocklisted names
    /// - [`Error::Unresolvable`] when DNS fails or exceeds its 5 s budget
    pub async fn resolve(&self, host: &str) -> Result<Target> {
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyTarget);
        }

        let lowered = trimmed.to_ascii_lowercase();
        if PLACEHOLDER_HOSTS.contains(&lowered.as_str()) {
            warn!("rejecting placeholder target {:?}", trimmed);
            return Err(Error::Placeholder(trimmed.to_string()));
        }

        // IP literals skip DNS entirely
        let resolved_ip = if let Ok(ip) = trimmed.parse::<IpAddr>() {
            ip
        } else {
            match timeout(DNS_TIMEOUT, self.dns.lookup(trimmed)).await {
                Ok(Ok(ip)) => ip,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!("DNS lookup for {:?} exceeded {:?}", trimmed, DNS_TIMEOUT);
                    return Err(Error::Unresolvable(trimmed.to_string()));
                }
            }
        };

        let classification = TargetClass::of(resolved_ip);
        debug!(
            "resolved {:?} -> {} ({:?})",
            trimmed, resolved_ip, classification
        );

        Ok(Target {
            host: trimmed.to_string(),
            resolved_ip,
            classification,
        })
    }
}
