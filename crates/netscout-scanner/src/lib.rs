//! NetScout Scanning Engine
//!
//! This crate implements the reconnaissance pipeline behind the NetScout
//! service: a TCP connect prober with adaptive concurrency control, a
//! priority-tiered scheduler, an active service detector, a
//! content-addressed result cache, a durable task queue, and the
//! persistence sink.
//!
//! # Architecture
//!
//! - [`prober`]: single-port TCP connect attempts with state classification
//! - [`adaptive`]: success-rate driven concurrency and timeout tuning
//! - [`resolver`]: target validation, placeholder rejection, bounded DNS
//! - [`detector`]: protocol probes for service and version extraction
//! - [`gate`]: pre-scan sentinel reachability check
//! - [`scheduler`]: tier-ordered fan-out with a resizable worker pool
//! - [`cache`]: content-addressed cache with single-flight and TTL policy
//! - [`queue`]: async task state machine with retry and retention
//! - [`engine`]: top-level wiring of resolver, gate, cache, and scheduler
//! - [`storage`]: SQLite and in-memory scan history sinks
//!
//! # Example
//!
//! ```no_run
//! use netscout_scanner::{ScanEngine, ScanRequest};
//! use netscout_core::{CollectorSink, PortSet};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> netscout_core::Result<()> {
//! let engine = Arc::new(ScanEngine::builder().build());
//! let sink = Arc::new(CollectorSink::new());
//!
//! let request = ScanRequest::new("192.0.2.10", PortSet::parse("22,80,443")?);
//!
//! let record = engine.scan(request, sink, CancellationToken::new()).await?;
//! println!("{} open ports", record.open_count());
//! # Ok(())
//! # }
//! ```

pub mod adaptive;
pub mod cache;
pub mod detector;
pub mod engine;
pub mod gate;
pub mod prober;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod storage;

pub use adaptive::{AdaptiveController, AdaptiveState};
pub use cache::{CacheEntry, CacheStats, KvStore, MemoryStore, ScanCache};
pub use detector::ServiceDetector;
pub use engine::{ScanEngine, ScanEngineBuilder, ScanRequest};
pub use gate::PreScanGate;
pub use prober::{ProbeOutcome, TcpProber};
pub use queue::{TaskQueue, TaskRecord, TaskState};
pub use resolver::{DnsResolver, SystemResolver, TargetResolver};
pub use scheduler::TierScheduler;
pub use storage::{MemorySink, ScanSink, ScanSummary, SqliteSink};
