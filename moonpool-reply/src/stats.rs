//! Counters describing how requests were resolved.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by a [`ReplyManager`](crate::ReplyManager).
#[derive(Debug, Default)]
pub struct ReplyStats {
    registered: AtomicU64,
    replies: AtomicU64,
    timeouts: AtomicU64,
    duplicates: AtomicU64,
    mismatches: AtomicU64,
    unknown: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`ReplyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyStatsSnapshot {
    /// Requests registered.
    pub registered: u64,
    /// Requests resumed with a reply.
    pub replies: u64,
    /// Requests resumed with a timeout.
    pub timeouts: u64,
    /// Events for an id that was already resolved.
    pub duplicates: u64,
    /// Replies whose correlation id differed from the expected one.
    pub mismatches: u64,
    /// Deliveries that matched no pending request.
    pub unknown: u64,
    /// Requests withdrawn without resumption.
    pub abandoned: u64,
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        pub(crate) fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl ReplyStats {
    counter!(record_registered, registered);
    counter!(record_reply, replies);
    counter!(record_timeout, timeouts);
    counter!(record_duplicate, duplicates);
    counter!(record_mismatch, mismatches);
    counter!(record_unknown, unknown);
    counter!(record_abandoned, abandoned);

    /// Read all counters.
    pub fn snapshot(&self) -> ReplyStatsSnapshot {
        ReplyStatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

impl ReplyStatsSnapshot {
    /// Requests resumed by either event.
    pub fn resolved(&self) -> u64 {
        self.replies + self.timeouts
    }
}
