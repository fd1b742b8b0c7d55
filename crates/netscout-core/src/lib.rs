//! NetScout Core Library
//!
//! This crate provides the shared types, error handling, configuration, and
//! static lookup tables for the NetScout reconnaissance service.
//!
//! # Examples
//!
//! ```
//! use netscout_core::{PortSet, PortPriority, ScanConfig};
//!
//! // Parse port specifications
//! let ports = PortSet::parse("22-25,80,443").unwrap();
//! assert_eq!(ports.len(), 6);
//!
//! // Classify a port into its scheduling tier
//! assert_eq!(PortPriority::of(22), PortPriority::Critical);
//!
//! // Default scan configuration validates cleanly
//! let config = ScanConfig::default();
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod priority;
pub mod risk;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use config::{CacheConfig, QueueConfig, ScanConfig, ServerConfig};
pub use error::{Error, Result};
pub use events::{ChannelSink, CollectorSink, EventSink, NullSink, ScanEvent};
pub use priority::{partition_ports, PortPriority, TIER_ORDER};
pub use risk::{assess_risk, RiskAssessment, RiskLevel};
pub use services::well_known_service;
pub use types::{
    AdaptiveAdjustment, Freshness, HttpObservation, PortResult, PortSet, PortState, Protocol,
    ScanRecord, ScanStatus, SecurityHeadersAudit, Target, TargetClass, TlsObservation,
};
