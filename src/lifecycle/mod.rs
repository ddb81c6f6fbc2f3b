//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Trigger → server stops accepting → hub closes every watch → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Open watches are closed on shutdown, otherwise draining would wait on
//!   streams that never end

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
