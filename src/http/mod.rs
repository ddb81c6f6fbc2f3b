//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, one catch-all handler)
//!     → request.rs (watch or direct)
//!         → watch: hub subscription, streamed back chunk by chunk
//!         → direct: buffered, forwarded with retries
//!     → response.rs (watch response assembly, error bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{classify, RequestKind};
pub use server::{HttpServer, ServerError};
