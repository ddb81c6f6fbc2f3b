//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Watch hub, front door, upstream client produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
