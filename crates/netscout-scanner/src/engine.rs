//! Scan engine: the delivery pipeline
//!
//! Wires the resolver, pre-scan gate, result cache, tier scheduler, and
//! persistence sink into one entry point. All dependencies are injected
//! at construction; process-wide state lives in `main` wiring, not here.
//!
//! Request flow:
//! 1. validate and resolve the target (placeholders rejected before any
//!    network activity)
//! 2. cache fast path: a fresh entry replays per-port events with
//!    `freshness = cached`
//! 3. pre-scan gate: a silent public target emits `pre_scan_warning` and
//!    suspends until the caller repeats the request with consent
//! 4. single-flight: concurrent identical requests serialize on the cache
//!    key; late arrivals find the entry the winner stored and replay it
//! 5. live scan through the scheduler, then store + persist

use crate::cache::{CacheEntry, ScanCache};
use crate::detector::ServiceDetector;
use crate::gate::PreScanGate;
use crate::resolver::TargetResolver;
use crate::scheduler::TierScheduler;
use crate::storage::{MemorySink, ScanSink};
use netscout_core::{
    partition_ports, CacheConfig, Error, EventSink, Freshness, PortSet, PortState, Result,
    ScanConfig, ScanEvent, ScanRecord, ScanStatus, Target,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One scan request as the engine consumes it
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub host: String,
    pub ports: PortSet,
    pub config: ScanConfig,
    /// Explicit consent to scan a target the gate would hold
    pub consent: bool,
    /// Pre-assigned scan id (the task queue hands these out at submit)
    pub scan_id: Option<Uuid>,
    /// The command line or API call to echo back in `pre_scan_warning`
    pub original_command: Option<String>,
}

impl ScanRequest {
    pub fn new(host: impl Into<String>, ports: PortSet) -> Self {
        Self {
            host: host.into(),
            ports,
            config: ScanConfig::default(),
            consent: false,
            scan_id: None,
            original_command: None,
        }
    }
}

/// Builder for [`ScanEngine`]; every dependency has an in-process default
pub struct ScanEngineBuilder {
    resolver: TargetResolver,
    gate: PreScanGate,
    cache: Option<Arc<ScanCache>>,
    sink: Option<Arc<dyn ScanSink>>,
    detector_probe_timeout: Option<Duration>,
}

impl Default for ScanEngineBuilder {
    fn default() -> Self {
        Self {
            resolver: TargetResolver::default(),
            gate: PreScanGate::new(),
            cache: None,
            sink: None,
            detector_probe_timeout: None,
        }
    }
}

impl ScanEngineBuilder {
    pub fn resolver(mut self, resolver: TargetResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn gate(mut self, gate: PreScanGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn cache(mut self, cache: Arc<ScanCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ScanSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Shrink the detector's per-probe timeout (tests)
    pub fn detector_probe_timeout(mut self, timeout: Duration) -> Self {
        self.detector_probe_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ScanEngine {
        ScanEngine {
            resolver: self.resolver,
            gate: self.gate,
            scheduler: TierScheduler::new(),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ScanCache::new(CacheConfig::default()))),
            sink: self.sink.unwrap_or_else(|| Arc::new(MemorySink::new())),
            detector_probe_timeout: self.detector_probe_timeout,
        }
    }
}

/// The scanning service core
pub struct ScanEngine {
    resolver: TargetResolver,
    gate: PreScanGate,
    scheduler: TierScheduler,
    cache: Arc<ScanCache>,
    sink: Arc<dyn ScanSink>,
    detector_probe_timeout: Option<Duration>,
}

impl ScanEngine {
    pub fn builder() -> ScanEngineBuilder {
        ScanEngineBuilder::default()
    }

    pub fn cache(&self) -> &ScanCache {
        &self.cache
    }

    pub fn sink(&self) -> &Arc<dyn ScanSink> {
        &self.sink
    }

    /// Validate a request without touching the network
    ///
    /// The HTTP surface calls this before opening a stream so validation
    /// failures become 4xx responses instead of in-stream errors.
    pub fn validate(&self, request: &ScanRequest) -> Result<()> {
        request.config.validate()
    }

    /// Resolve a target through the engine's resolver
    ///
    /// Exposed so transports can reject bad targets before opening a
    /// stream; [`ScanEngine::scan`] resolves again internally.
    pub async fn resolve(&self, host: &str) -> Result<Target> {
        self.resolver.resolve(host).await
    }

    /// Execute one scan request end to end
    ///
    /// Events flow through `events`; the returned record carries every
    /// per-port result. Validation and resolution errors return before
    /// any event is emitted.
    pub async fn scan(
        &self,
        request: ScanRequest,
        events: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<ScanRecord> {
        request.config.validate()?;
        let target = self.resolver.resolve(&request.host).await?;
        let key = ScanCache::key(&request.host, &request.ports);

        // Cache fast path
        if !request.config.force {
            if let Some(entry) = self.cache.lookup(&key).await {
                debug!("replaying cached scan for {}", target);
                return Ok(self.replay(&target, &request, entry, events.as_ref()));
            }
        }

        // Pre-scan gate: explicit consent overrides a silent target
        let consented = request.config.force && request.consent;
        if !consented && !self.gate.permits(&target).await {
            events.emit(ScanEvent::PreScanWarning {
                target: target.host.clone(),
                resolved_ip: target.resolved_ip,
                original_command: request
                    .original_command
                    .clone()
                    .unwrap_or_else(|| format!("scan {} {}", request.host, request.ports)),
            });
            info!("pre-scan gate suspended scan of {}", target);
            return Err(Error::Disallowed(format!(
                "target {} did not answer on any sentinel port; repeat with force and consent",
                target.host
            )));
        }

        // Single-flight: exactly one live scan per key at a time
        let _flight = self.cache.key_lock(&key).await;
        if !request.config.force {
            if let Some(entry) = self.cache.lookup(&key).await {
                debug!("single-flight follower replaying {}", target);
                return Ok(self.replay(&target, &request, entry, events.as_ref()));
            }
        }

        let mut record =
            ScanRecord::new(target.clone(), request.ports.clone(), request.config.clone());
        if let Some(scan_id) = request.scan_id {
            record.scan_id = scan_id;
        }
        events.emit(ScanEvent::ScanStart {
            scan_id: record.scan_id,
            target: target.host.clone(),
            resolved_ip: target.resolved_ip,
            total_ports: request.ports.len(),
            freshness: Freshness::Fresh,
            cached_at: None,
        });

        let mut detector = ServiceDetector::new(request.config.enhanced_service_detection);
        if let Some(timeout) = self.detector_probe_timeout {
            detector = detector.with_probe_timeout(timeout);
        }

        self.scheduler
            .run(&mut record, Arc::new(detector), Arc::clone(&events), cancel)
            .await?;

        // Completed scans refresh the cache even when force bypassed lookup
        self.cache
            .store(&key, &record.results, target.classification)
            .await;

        if let Err(e) = self.sink.record_scan(&record).await {
            warn!("failed to persist scan {}: {}", record.scan_id, e);
        }

        Ok(record)
    }

    /// Synthesize the event stream for a cache hit
    ///
    /// Replays per-port events exactly as a live scan would, tier by tier,
    /// with `freshness = cached` on the opening event.
    fn replay(
        &self,
        target: &Target,
        request: &ScanRequest,
        entry: CacheEntry,
        events: &dyn EventSink,
    ) -> ScanRecord {
        let mut record = ScanRecord::new(
            target.clone(),
            request.ports.clone(),
            request.config.clone(),
        );
        if let Some(scan_id) = request.scan_id {
            record.scan_id = scan_id;
        }

        events.emit(ScanEvent::ScanStart {
            scan_id: record.scan_id,
            target: target.host.clone(),
            resolved_ip: target.resolved_ip,
            total_ports: request.ports.len(),
            freshness: Freshness::Cached,
            cached_at: Some(entry.stored_at),
        });

        let total: usize = entry.results.len();
        let mut open = 0usize;
        let mut closed = 0usize;
        let mut filtered = 0usize;
        let mut completed = 0usize;

        for (priority, tier_ports) in partition_ports(&request.ports) {
            if tier_ports.is_empty() {
                continue;
            }

            let progress_at = |done: usize| {
                if total == 0 {
                    100.0
                } else {
                    100.0 * done as f64 / total as f64
                }
            };
            events.emit(ScanEvent::TierStart {
                priority,
                count: tier_ports.len(),
                progress: progress_at(completed),
            });

            let mut tier_open = 0usize;
            let mut tier_done = 0usize;
            for result in entry.results.iter().filter(|r| tier_ports.contains(&r.port)) {
                tier_done += 1;
                match result.state {
                    PortState::Open => {
                        open += 1;
                        tier_open += 1;
                        events.emit(ScanEvent::OpenPort {
                            port_result: Box::new(result.clone()),
                            progress: progress_at(completed + tier_done),
                        });
                    }
                    PortState::Closed => closed += 1,
                    PortState::Filtered => filtered += 1,
                    PortState::Error => {}
                }
            }

            completed += tier_ports.len().min(total - completed);
            events.emit(ScanEvent::TierComplete {
                priority,
                open_count: tier_open,
                progress: progress_at(completed),
            });
        }

        events.emit(ScanEvent::ScanComplete {
            progress: 100.0,
            open_ports: open,
            closed,
            filtered,
        });

        record.results = entry.results;
        record.finish(ScanStatus::Completed);
        record
    }
}
