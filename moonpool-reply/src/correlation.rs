//! Correlation identifiers and their generation.
//!
//! A correlation id is attached to every outgoing request and is expected to
//! be echoed back on the reply. Peers are not trusted to echo it faithfully,
//! so the id a request was registered with is kept separately from whatever
//! id is later observed on the wire.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Token matching an incoming reply to its originating request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a correlation id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Factory for creating correlation IDs.
///
/// Produces `"{prefix}-{n}"` with `n` increasing from 1. The counter is
/// atomic, so a single factory can be shared by every task issuing requests
/// through the same client.
///
/// # Example
///
/// ```rust
/// use moonpool_reply::CorrelationIdFactory;
///
/// let factory = CorrelationIdFactory::new("client-a");
/// assert_eq!(factory.next().as_str(), "client-a-1");
/// assert_eq!(factory.next().as_str(), "client-a-2");
/// ```
#[derive(Debug)]
pub struct CorrelationIdFactory {
    prefix: String,
    next_id: AtomicU64,
}

impl CorrelationIdFactory {
    /// Create a factory with a fixed prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a factory with a random UUIDv4 prefix.
    ///
    /// Several clients consuming one shared reply queue must not hand out the
    /// same ids, which a fixed prefix cannot guarantee.
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The prefix shared by every id from this factory.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generate the next correlation ID.
    pub fn next(&self) -> CorrelationId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        CorrelationId(format!("{}-{}", self.prefix, n))
    }
}

impl Default for CorrelationIdFactory {
    fn default() -> Self {
        Self::random()
    }
}
