//! Adaptive concurrency control
//!
//! Retunes worker-pool size and probe timeout from the observed success
//! rate. Outcomes accumulate in a rolling window; every
//! [`SAMPLE_INTERVAL`] attempts the window is evaluated:
//!
//! - rate below 0.70: halve concurrency (floor 1), add 0.5 s of timeout
//! - rate above 0.90: grow concurrency by 1.5x (capped), shave 0.2 s of
//!   timeout (floored)
//!
//! A "success" is any terminal probe state other than a local error, and
//! not a bare timeout. Every adjustment is recorded with its reason for
//! the scan record.

use crate::prober::ProbeOutcome;
use chrono::Utc;
use netscout_core::types::AdaptiveAdjustment;
use netscout_core::{PortState, ScanConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Attempts between controller evaluations
pub const SAMPLE_INTERVAL: usize = 50;

/// Success-rate threshold below which the controller backs off
const BACKOFF_THRESHOLD: f64 = 0.70;

/// Success-rate threshold above which the controller speeds up
const SPEEDUP_THRESHOLD: f64 = 0.90;

/// Live tuning state for one scan
#[derive(Debug, Clone)]
pub struct AdaptiveState {
    pub concurrency: usize,
    pub timeout: Duration,
    pub window_attempts: usize,
    pub window_successes: usize,
    pub adjustments: Vec<AdaptiveAdjustment>,
}

/// Success-rate driven controller, one per scan
///
/// When the scan config disables adaptation the controller is inert: the
/// user-supplied concurrency and timeout hold for the whole scan and
/// [`AdaptiveController::record`] never returns an adjustment.
pub struct AdaptiveController {
    enabled: bool,
    max_concurrency: usize,
    min_timeout: Duration,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveController {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            enabled: config.adaptive,
            max_concurrency: config.max_concurrency,
            min_timeout: config.min_timeout(),
            state: Mutex::new(AdaptiveState {
                concurrency: config.initial_concurrency,
                timeout: config.timeout(),
                window_attempts: 0,
                window_successes: 0,
                adjustments: Vec::new(),
            }),
        }
    }

    /// Current pool size target
    pub fn concurrency(&self) -> usize {
        self.state.lock().concurrency
    }

    /// Current per-probe timeout
    pub fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    /// Feed one probe outcome into the window
    ///
    /// Returns `Some((concurrency, timeout))` when this outcome closed a
    /// window and produced an adjustment the scheduler should apply.
    pub fn record(&self, outcome: &ProbeOutcome) -> Option<(usize, Duration)> {
        if !self.enabled {
            return None;
        }

        let mut state = self.state.lock();
        state.window_attempts += 1;
        if outcome.state != PortState::Error && !outcome.timed_out {
            state.window_successes += 1;
        }

        if state.window_attempts < SAMPLE_INTERVAL {
            return None;
        }

        let rate = state.window_successes as f64 / state.window_attempts as f64;
        state.window_attempts = 0;
        state.window_successes = 0;

        let (prev_concurrency, prev_timeout) = (state.concurrency, state.timeout);

        if rate < BACKOFF_THRESHOLD {
            state.concurrency = (state.concurrency / 2).max(1);
            state.timeout += Duration::from_millis(500);
        } else if rate > SPEEDUP_THRESHOLD {
            state.concurrency = (state.concurrency * 3 / 2).min(self.max_concurrency);
            state.timeout = state
                .timeout
                .saturating_sub(Duration::from_millis(200))
                .max(self.min_timeout);
        } else {
            return None;
        }

        if state.concurrency == prev_concurrency && state.timeout == prev_timeout {
            return None;
        }

        let reason = if rate < BACKOFF_THRESHOLD {
            format!("success rate {:.2} below {:.2}", rate, BACKOFF_THRESHOLD)
        } else {
            format!("success rate {:.2} above {:.2}", rate, SPEEDUP_THRESHOLD)
        };
        debug!(
            "adaptive adjustment: {} (concurrency {} -> {}, timeout {:?} -> {:?})",
            reason, prev_concurrency, state.concurrency, prev_timeout, state.timeout
        );
        let adjustment = AdaptiveAdjustment {
            at: Utc::now(),
            reason,
            concurrency: state.concurrency,
            timeout_ms: state.timeout.as_millis() as u64,
        };
        state.adjustments.push(adjustment);

        Some((state.concurrency, state.timeout))
    }

    /// Adjustments applied so far, for the scan record
    pub fn adjustments(&self) -> Vec<AdaptiveAdjustment> {
        self.state.lock().adjustments.clone()
    }
}

/// Bounded worker pool whose size can change while probes are in flight
///
/// Growing adds permits; shrinking retires permits asynchronously as
/// workers release them, so running probes are never interrupted.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: Mutex<usize>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size: Mutex::new(size),
        }
    }

    /// Block until a worker slot is free
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed while the pool is alive
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore closed")
    }

    /// Resize the pool in place
    pub fn resize(&self, new_size: usize) {
        let new_size = new_size.max(1);
        let mut size = self.size.lock();
        if new_size > *size {
            self.semaphore.add_permits(new_size - *size);
        } else if new_size < *size {
            let retire = (*size - new_size) as u32;
            let semaphore = Arc::clone(&self.semaphore);
            tokio::spawn(async move {
                if let Ok(permits) = semaphore.acquire_many_owned(retire).await {
                    permits.forget();
                }
            });
        }
        *size = new_size;
    }

    pub fn size(&self) -> usize {
        *self.size.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(state: PortState, timed_out: bool) -> ProbeOutcome {
        ProbeOutcome {
            state,
            rtt: Duration::from_millis(10),
            timed_out,
        }
    }

    fn controller_with(initial: usize, timeout_s: f64) -> AdaptiveController {
        AdaptiveController::new(&ScanConfig {
            timeout_s,
            initial_concurrency: initial,
            ..Default::default()
        })
    }

    #[test]
    fn test_no_adjustment_before_interval() {
        let controller = controller_with(50, 1.0);
        for _ in 0..SAMPLE_INTERVAL - 1 {
            assert!(controller
                .record(&outcome(PortState::Filtered, true))
                .is_none());
        }
        assert_eq!(controller.concurrency(), 50);
    }

    #[test]
    fn test_backoff_on_low_success_rate() {
        let controller = controller_with(50, 1.0);
        let mut adjusted = None;
        for _ in 0..SAMPLE_INTERVAL {
            adjusted = controller.record(&outcome(PortState::Filtered, true));
        }

        let (concurrency, timeout) = adjusted.expect("window close should adjust");
        assert_eq!(concurrency, 25);
        assert_eq!(timeout, Duration::from_millis(1500));
        assert_eq!(controller.adjustments().len(), 1);
        assert!(controller.adjustments()[0].reason.contains("below"));
    }

    #[test]
    fn test_speedup_on_high_success_rate() {
        let controller = controller_with(50, 1.0);
        let mut adjusted = None;
        for _ in 0..SAMPLE_INTERVAL {
            adjusted = controller.record(&outcome(PortState::Closed, false));
        }

        let (concurrency, timeout) = adjusted.expect("window close should adjust");
        assert_eq!(concurrency, 75);
        assert_eq!(timeout, Duration::from_millis(800));
    }

    #[test]
    fn test_middle_band_holds_steady() {
        let controller = controller_with(50, 1.0);
        // 40 successes / 50 attempts = 0.80, inside [0.70, 0.90]
        for i in 0..SAMPLE_INTERVAL {
            let result = if i % 5 == 0 {
                controller.record(&outcome(PortState::Filtered, true))
            } else {
                controller.record(&outcome(PortState::Closed, false))
            };
            assert!(result.is_none());
        }
        assert_eq!(controller.concurrency(), 50);
        assert!(controller.adjustments().is_empty());
    }

    #[test]
    fn test_concurrency_floor() {
        let controller = controller_with(1, 1.0);
        for _ in 0..SAMPLE_INTERVAL {
            controller.record(&outcome(PortState::Error, false));
        }
        assert_eq!(controller.concurrency(), 1);
        // Timeout still grew even with concurrency pinned at the floor
        assert_eq!(controller.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_bounds_hold_over_many_windows() {
        let controller = controller_with(400, 1.0);
        for _ in 0..SAMPLE_INTERVAL * 20 {
            controller.record(&outcome(PortState::Open, false));
        }
        assert_eq!(controller.concurrency(), 500);
        assert_eq!(controller.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_error_states_are_not_successes() {
        let controller = controller_with(50, 1.0);
        // Half errors, half opens: rate 0.5 -> backoff
        for i in 0..SAMPLE_INTERVAL {
            if i % 2 == 0 {
                controller.record(&outcome(PortState::Error, false));
            } else {
                controller.record(&outcome(PortState::Open, false));
            }
        }
        assert_eq!(controller.concurrency(), 25);
    }

    #[test]
    fn test_disabled_controller_is_inert() {
        let controller = AdaptiveController::new(&ScanConfig {
            adaptive: false,
            initial_concurrency: 10,
            ..Default::default()
        });
        for _ in 0..SAMPLE_INTERVAL * 2 {
            assert!(controller
                .record(&outcome(PortState::Filtered, true))
                .is_none());
        }
        assert_eq!(controller.concurrency(), 10);
        assert!(controller.adjustments().is_empty());
    }

    #[tokio::test]
    async fn test_pool_grow() {
        let pool = WorkerPool::new(1);
        let permit = pool.acquire().await;
        pool.resize(3);
        assert_eq!(pool.size(), 3);
        // Two more slots are immediately available
        let _p2 = pool.acquire().await;
        let _p3 = pool.acquire().await;
        drop(permit);
    }

    #[tokio::test]
    async fn test_pool_shrink_does_not_interrupt_holders() {
        let pool = WorkerPool::new(4);
        let p1 = pool.acquire().await;
        let p2 = pool.acquire().await;
        pool.resize(1);
        assert_eq!(pool.size(), 1);
        // Existing permits stay valid; dropping them feeds the retirement
        drop(p1);
        drop(p2);
        tokio::task::yield_now().await;
        let _p = pool.acquire().await;
    }
}
