//! Priority-tiered scan scheduler
//!
//! Owns one scan end to end: partitions the port set into priority tiers,
//! fans each tier out through a bounded worker pool, pipes open ports
//! through the service detector, and serializes events onto the scan's
//! sink. Tier boundaries are total -- every event of a higher-priority
//! tier precedes `tier_complete` of that tier, and no lower-tier event
//! crosses it. Within a tier, emission follows completion order.
//!
//! The worker pool is resized in place whenever the adaptive controller
//! adjusts, without interrupting in-flight probes. Cancellation is
//! cooperative: workers observe the token between probes and the
//! scheduler stops emitting the moment it trips.

use crate::adaptive::{AdaptiveController, WorkerPool};
use crate::detector::ServiceDetector;
use crate::prober::{ProbeOutcome, TcpProber};
use netscout_core::{
    partition_ports, Error, EventSink, PortResult, PortState, Result, ScanEvent, ScanRecord,
    ScanStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hard cap on the per-scan wall clock
const MAX_SCAN_DEADLINE: Duration = Duration::from_secs(600);

/// Counters shared by the completion loop
#[derive(Default)]
struct Tally {
    open: usize,
    closed: usize,
    filtered: usize,
    errors: usize,
}

impl Tally {
    fn count(&mut self, state: PortState) {
        match state {
            PortState::Open => self.open += 1,
            PortState::Closed => self.closed += 1,
            PortState::Filtered => self.filtered += 1,
            PortState::Error => self.errors += 1,
        }
    }
}

/// Tier-ordered scan executor
#[derive(Debug, Clone, Default)]
pub struct TierScheduler {
    prober: TcpProber,
}

impl TierScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute a scan, mutating the record in place
    ///
    /// Emits `tier_start` / `open_port` / `tier_complete` per tier and a
    /// terminal `scan_complete` or `scan_error`. Returns
    /// [`Error::Cancelled`] when the token trips; per-port failures never
    /// propagate -- they are folded into result states.
    pub async fn run(
        &self,
        record: &mut ScanRecord,
        detector: Arc<ServiceDetector>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        record.config.validate()?;
        record.status = ScanStatus::Running;

        let total = record.ports.len();
        if total == 0 {
            sink.emit(ScanEvent::ScanComplete {
                progress: 100.0,
                open_ports: 0,
                closed: 0,
                filtered: 0,
            });
            record.finish(ScanStatus::Completed);
            return Ok(());
        }

        let deadline = scan_deadline(total, &record.config);
        debug!(
            "scan {} starting: {} ports, deadline {:?}",
            record.scan_id, total, deadline
        );

        let outcome = tokio::time::timeout(
            deadline,
            self.run_tiers(record, detector, Arc::clone(&sink), cancel.clone()),
        )
        .await;

        match outcome {
            Ok(Ok(tally)) => {
                sink.emit(ScanEvent::ScanComplete {
                    progress: 100.0,
                    open_ports: tally.open,
                    closed: tally.closed,
                    filtered: tally.filtered,
                });
                info!(
                    "scan {} complete: {} open / {} closed / {} filtered / {} errored",
                    record.scan_id, tally.open, tally.closed, tally.filtered, tally.errors
                );
                record.finish(ScanStatus::Completed);
                Ok(())
            }
            Ok(Err(Error::Cancelled)) => {
                // No events after cancellation
                record.finish(ScanStatus::Cancelled);
                Err(Error::Cancelled)
            }
            Ok(Err(e)) => {
                sink.emit(ScanEvent::ScanError {
                    message: e.to_string(),
                });
                record.finish(ScanStatus::Failed);
                Err(e)
            }
            Err(_elapsed) => {
                cancel.cancel();
                let message = format!("scan deadline of {:?} exceeded", deadline);
                warn!("scan {}: {}", record.scan_id, message);
                sink.emit(ScanEvent::ScanError { message });
                record.finish(ScanStatus::Failed);
                Err(Error::Network("scan deadline exceeded".to_string()))
            }
        }
    }

    async fn run_tiers(
        &self,
        record: &mut ScanRecord,
        detector: Arc<ServiceDetector>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<Tally> {
        let total = record.ports.len();
        let controller = Arc::new(AdaptiveController::new(&record.config));
        let pool = Arc::new(WorkerPool::new(controller.concurrency()));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tally = Tally::default();

        for (priority, tier_ports) in partition_ports(&record.ports) {
            if tier_ports.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            sink.emit(ScanEvent::TierStart {
                priority,
                count: tier_ports.len(),
                progress: percent(completed.load(Ordering::Relaxed), total),
            });

            let mut workers = JoinSet::new();
            for port in tier_ports {
                let prober = self.prober.clone();
                let detector = Arc::clone(&detector);
                let controller = Arc::clone(&controller);
                let pool = Arc::clone(&pool);
                let cancel = cancel.clone();
                let ip = record.target.resolved_ip;
                let host = record.target.host.clone();

                workers.spawn(async move {
                    let _permit = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        permit = pool.acquire() => permit,
                    };
                    if cancel.is_cancelled() {
                        return None;
                    }

                    let outcome = prober.probe(ip, port, controller.timeout()).await;
                    let result = if outcome.state == PortState::Open && !cancel.is_cancelled() {
                        detector.detect(ip, port, &host, outcome.rtt).await
                    } else {
                        PortResult::new(port, outcome.state).with_response_time(outcome.rtt)
                    };
                    Some((outcome, result))
                });
            }

            let mut tier_open = 0;
            while let Some(joined) = workers.join_next().await {
                let (outcome, result) = match joined {
                    Ok(Some(done)) => done,
                    Ok(None) => continue, // worker observed cancellation
                    Err(e) => {
                        warn!("scan worker panicked: {}", e);
                        continue;
                    }
                };

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some((concurrency, _timeout)) = controller.record(&outcome) {
                    pool.resize(concurrency);
                }

                tally.count(result.state);
                if result.state == PortState::Open && !cancel.is_cancelled() {
                    tier_open += 1;
                    sink.emit(ScanEvent::OpenPort {
                        port_result: Box::new(result.clone()),
                        progress: percent(done, total),
                    });
                }
                record.results.push(result);

                // A gone consumer is a cancellation signal
                if sink.is_closed() {
                    cancel.cancel();
                }
            }

            if cancel.is_cancelled() {
                record.adjustments = controller.adjustments();
                return Err(Error::Cancelled);
            }

            sink.emit(ScanEvent::TierComplete {
                priority,
                open_count: tier_open,
                progress: percent(completed.load(Ordering::Relaxed), total),
            });
        }

        record.adjustments = controller.adjustments();
        Ok(tally)
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        100.0 * done as f64 / total as f64
    }
}

/// Wall-clock budget: five times the serialized tier estimate, capped
fn scan_deadline(total: usize, config: &netscout_core::ScanConfig) -> Duration {
    let batches = (total as f64 / config.initial_concurrency as f64).ceil();
    let estimate = 5.0 * batches * config.timeout_s;
    Duration::from_secs_f64(estimate.clamp(30.0, MAX_SCAN_DEADLINE.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netscout_core::{
        CollectorSink, PortPriority, PortSet, ScanConfig, Target, TargetClass,
    };
    use std::net::IpAddr;
    use tokio::net::TcpListener;

    fn local_target() -> Target {
        Target {
            host: "127.0.0.1".to_string(),
            resolved_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
            classification: TargetClass::Loopback,
        }
    }

    fn fast_config() -> ScanConfig {
        ScanConfig {
            timeout_s: 0.25,
            min_timeout_s: 0.1,
            enhanced_service_detection: false,
            ..Default::default()
        }
    }

    fn record_for(ports: &str) -> ScanRecord {
        ScanRecord::new(local_target(), PortSet::parse(ports).unwrap(), fast_config())
    }

    async fn run_scan(record: &mut ScanRecord) -> (Arc<CollectorSink>, Result<()>) {
        let sink = Arc::new(CollectorSink::new());
        let detector = Arc::new(
            ServiceDetector::new(record.config.enhanced_service_detection)
                .with_probe_timeout(Duration::from_millis(200)),
        );
        let outcome = TierScheduler::new()
            .run(record, detector, sink.clone(), CancellationToken::new())
            .await;
        (sink, outcome)
    }

    #[tokio::test]
    async fn test_empty_port_set_completes_immediately() {
        let mut record = ScanRecord::new(
            local_target(),
            PortSet::from_ports(Vec::<u16>::new()),
            fast_config(),
        );
        let (sink, outcome) = run_scan(&mut record).await;

        outcome.unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ScanEvent::ScanComplete { progress, .. } if progress == 100.0
        ));
        assert_eq!(record.status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn test_single_open_port_in_critical_tier() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        // One ephemeral open port plus port 22 (likely closed locally)
        let mut record = record_for(&format!("22,{}", open_port));
        let (sink, outcome) = run_scan(&mut record).await;
        outcome.unwrap();

        let open_events: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, ScanEvent::OpenPort { .. }))
            .collect();
        assert!(!open_events.is_empty());
        if let ScanEvent::OpenPort { port_result, .. } = &open_events[0] {
            assert_eq!(port_result.state, PortState::Open);
        }
        assert_eq!(record.results.len(), 2);
    }

    #[tokio::test]
    async fn test_tier_ordering_is_total() {
        // Ports spanning all four tiers, all probed on loopback
        let mut record = record_for("22,80,53,6379,40000-40004");
        let (sink, outcome) = run_scan(&mut record).await;
        outcome.unwrap();

        let mut last_rank = 0usize;
        for event in sink.events() {
            if let Some(priority) = event.priority() {
                assert!(
                    priority.rank() >= last_rank,
                    "tier went backwards: {:?}",
                    priority
                );
                last_rank = priority.rank();
            }
        }

        // Every non-empty tier opened and closed in order
        let tier_starts: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::TierStart { priority, .. } => Some(priority),
                _ => None,
            })
            .collect();
        assert_eq!(
            tier_starts,
            vec![
                PortPriority::Critical,
                PortPriority::High,
                PortPriority::Medium,
                PortPriority::Low
            ]
        );
    }

    #[tokio::test]
    async fn test_progress_monotone_and_reaches_100() {
        let mut record = record_for("41000-41019");
        let (sink, outcome) = run_scan(&mut record).await;
        outcome.unwrap();

        let mut last = 0.0f64;
        for event in sink.events() {
            if let Some(progress) = event.progress() {
                assert!(progress >= last, "progress decreased: {} < {}", progress, last);
                last = progress;
            }
        }
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn test_all_results_recorded() {
        let mut record = record_for("42000-42009");
        let (_sink, outcome) = run_scan(&mut record).await;
        outcome.unwrap();

        assert_eq!(record.results.len(), 10);
        let mut ports: Vec<u16> = record.results.iter().map(|r| r.port).collect();
        ports.sort_unstable();
        assert_eq!(ports, (42000..=42009).collect::<Vec<u16>>());
    }

    #[tokio::test]
    async fn test_cancellation_stops_event_flow() {
        let cancel = CancellationToken::new();
        let sink = Arc::new(CollectorSink::new());
        let detector = Arc::new(ServiceDetector::new(false));

        let mut record = record_for("43000-43099");
        cancel.cancel();

        let outcome = TierScheduler::new()
            .run(&mut record, detector, sink.clone(), cancel)
            .await;
        assert!(matches!(outcome, Err(Error::Cancelled)));
        assert_eq!(record.status, ScanStatus::Cancelled);

        // The tier may have announced itself, but the scan never completed
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, ScanEvent::ScanComplete { .. })));
    }

    #[tokio::test]
    async fn test_closed_sink_cancels_scan() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = Arc::new(netscout_core::ChannelSink::new(tx));
        drop(rx);

        let detector = Arc::new(ServiceDetector::new(false));
        let mut record = record_for("44000-44099");
        let outcome = TierScheduler::new()
            .run(&mut record, detector, sink, CancellationToken::new())
            .await;

        assert!(matches!(outcome, Err(Error::Cancelled)));
        assert_eq!(record.status, ScanStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut record = record_for("22");
        record.config.initial_concurrency = 0;
        let (sink, outcome) = run_scan(&mut record).await;
        assert!(outcome.is_err());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_deadline_bounds() {
        let config = ScanConfig::default();
        assert!(scan_deadline(10, &config) >= Duration::from_secs(30));
        assert!(scan_deadline(65535, &config) <= MAX_SCAN_DEADLINE);
    }
}
