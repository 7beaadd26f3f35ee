//! Cached entry with optional expiration
//!
//! TTL rules:
//! - no deadline = never expire
//! - deadline <= now = logically absent, even if the sweep has not removed it yet

use bytes::Bytes;
use std::time::{Duration, Instant};

/// A single cached value
#[derive(Debug, Clone)]
pub struct Item {
    /// Stored payload
    pub data: Bytes,
    /// Absolute expiration instant (`None` = never expire)
    pub expires_at: Option<Instant>,
}

impl Item {
    /// Create an item that never expires
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    /// Create an item expiring `ttl` from now. A zero TTL means no expiry.
    pub fn with_ttl(data: Bytes, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: expires_at(ttl),
        }
    }

    /// Check if the item has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a caller-supplied clock reading
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Absolute deadline for a relative TTL
pub fn expires_at(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Instant::now().checked_add(ttl)
    }
}
