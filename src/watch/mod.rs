//! Watch coalescing subsystem.
//!
//! # Data Flow
//! ```text
//! Client watch request
//!     → fingerprint.rs (request target, or key + revision of the JSON body)
//!     → hub.rs (join the unit for that fingerprint, or create it)
//!         → first subscriber only: one upstream call, relayed line by line
//!     → unit.rs (cached header, replay cache, ordered subscribers)
//!     → watcher.rs (header once, then cache replay, then live chunks)
//! ```
//!
//! # Design Decisions
//! - N identical watches cost one upstream stream
//! - A subscriber that has not drained its last chunk is dropped instead of
//!   stalling the others
//! - The upstream body is closed exactly once, when the last subscriber leaves

pub mod fingerprint;
pub mod hub;
pub(crate) mod unit;
pub mod watcher;

pub use fingerprint::{Fingerprint, FingerprintError, Fingerprinter};
pub use hub::WatchHub;
pub use watcher::{HeadResult, ResponseHead, WatchEvents, WatchFailure, Watcher, WatcherId};
