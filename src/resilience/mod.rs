//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Direct request to the coordination service:
//!     → retries.rs (attempt budget, retry transport failures only)
//!     → backoff.rs (delay before each further attempt)
//!     → next endpoint in the pool
//! ```
//!
//! # Design Decisions
//! - Watches are never retried; a failed watch is reported to every subscriber
//! - Any upstream HTTP response counts as an answer, whatever its status

pub mod backoff;
pub mod retries;

pub use retries::RetryPolicy;
