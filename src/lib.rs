//! # RCS
//!
//! In-memory key-value cache server speaking RCSP, a small line-oriented text protocol
//! over TCP.
//!
//! ## Features
//!
//! - RCSP/1.0 native protocol (SET, GET, DELETE, PURGE, LENGTH, KEYS, PING, CLOSE)
//! - Optional TLS on every interface
//! - Per-entry TTL with lazy expiry and an optional background sweep
//! - Graceful shutdown with a deadline, or forced close
//! - HTTP/JSON gateway and Prometheus metrics over the same store
//!
//! ## Example
//!
//! ```ignore
//! use rcs::metrics::Metrics;
//! use rcs::server::Server;
//! use rcs::storage::Store;
//! use std::sync::Arc;
//!
//! let server = Arc::new(Server::new(Arc::new(Store::new()), Arc::new(Metrics::new())));
//! server.listen_and_serve("127.0.0.1:6121").await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  RCSP/TCP  ┌──────────────┐
//! │ RCSP client  │───────────▶│ server       │──┐
//! └──────────────┘            └──────────────┘  │   ┌─────────┐
//! ┌──────────────┐  HTTP/JSON ┌──────────────┐  ├──▶│ Store   │
//! │ HTTP client  │───────────▶│ http gateway │──┘   └─────────┘
//! └──────────────┘            └──────────────┘
//! ```

// Modules
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod prelude;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use error::{ProtocolError, RcsError, Result};
