//! Prelude module for common imports.
//!
//! # Usage
//!
//! ```ignore
//! use rcs::prelude::*;
//! ```

// Error types
pub use crate::error::{ProtocolError, RcsError, Result};

// Configuration
pub use crate::config::{Config, HttpConfig, NativeConfig, StorageConfig, Verbosity};

// Storage
pub use crate::storage::{ExpirySweeper, Store};

// Protocol
pub use crate::protocol::{Request, Response, ResponseWriter, Verb, parse_request, parse_response};

// Metrics
pub use crate::metrics::Metrics;

// Servers
pub use crate::http::HttpGateway;
pub use crate::server::Server;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
