//! Scan lifecycle events and the sink they flow through
//!
//! The scheduler owns one event stream per scan and serializes all writes
//! to it; transports (SSE, WebSocket, CLI) adapt an [`EventSink`] rather
//! than holding any reference back into the scanner.

use crate::priority::PortPriority;
use crate::types::{Freshness, PortResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Tagged scan event, framed as-is onto SSE and WebSocket channels
///
/// The JSON `type` field discriminates; tier boundaries are total and
/// `progress` is monotone non-decreasing across the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    /// First event of every stream
    ScanStart {
        scan_id: Uuid,
        target: String,
        resolved_ip: IpAddr,
        total_ports: usize,
        freshness: Freshness,
        #[serde(skip_serializing_if = "Option::is_none")]
        cached_at: Option<DateTime<Utc>>,
    },

    /// A priority tier began scanning
    TierStart {
        priority: PortPriority,
        count: usize,
        progress: f64,
    },

    /// An open port was found and classified
    OpenPort {
        port_result: Box<PortResult>,
        progress: f64,
    },

    /// A priority tier drained
    TierComplete {
        priority: PortPriority,
        open_count: usize,
        progress: f64,
    },

    /// Terminal: the scan finished
    ScanComplete {
        progress: f64,
        open_ports: usize,
        closed: usize,
        filtered: usize,
    },

    /// Terminal: the scan failed before or during execution
    ScanError { message: String },

    /// The pre-scan gate found no sentinel response; consent required
    PreScanWarning {
        target: String,
        resolved_ip: IpAddr,
        original_command: String,
    },
}

impl ScanEvent {
    /// The progress value carried by this event, if any
    pub fn progress(&self) -> Option<f64> {
        match self {
            ScanEvent::TierStart { progress, .. }
            | ScanEvent::OpenPort { progress, .. }
            | ScanEvent::TierComplete { progress, .. }
            | ScanEvent::ScanComplete { progress, .. } => Some(*progress),
            _ => None,
        }
    }

    /// The tier this event belongs to, if tier-scoped
    pub fn priority(&self) -> Option<PortPriority> {
        match self {
            ScanEvent::TierStart { priority, .. } | ScanEvent::TierComplete { priority, .. } => {
                Some(*priority)
            }
            ScanEvent::OpenPort { port_result, .. } => Some(PortPriority::of(port_result.port)),
            _ => None,
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::ScanComplete { .. } | ScanEvent::ScanError { .. })
    }
}

/// Outbound event channel owned by the scheduler
///
/// Implementations must be cheap and non-blocking; event emission never
/// sits on the scan's critical path.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery failures are swallowed; a dead consumer
    /// surfaces through [`EventSink::is_closed`] instead.
    fn emit(&self, event: ScanEvent);

    /// Whether the consumer has gone away (used to cancel cooperatively)
    fn is_closed(&self) -> bool {
        false
    }
}

/// Sink backed by an unbounded tokio channel
pub struct ChannelSink {
    tx: UnboundedSender<ScanEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ScanEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Sink that collects events in memory; used by the task queue and tests
#[derive(Default)]
pub struct CollectorSink {
    events: parking_lot::Mutex<Vec<ScanEvent>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().clone()
    }

    pub fn last_progress(&self) -> Option<f64> {
        self.events.lock().iter().rev().find_map(|e| e.progress())
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: ScanEvent) {
        self.events.lock().push(event);
    }
}

/// Sink that discards everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ScanEvent) {}
}
