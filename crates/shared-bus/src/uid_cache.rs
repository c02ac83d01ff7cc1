//! # Message Uid Cache
//!
//! Drops inbound duplicates. A peer that retries a send, or a mailbox that
//! redelivers after we already received the direct copy, must not make a
//! protocol step run twice.
//!
//! - Uids are remembered for a retention window, measured from first sight
//! - Expired uids are garbage-collected at a fixed interval
//! - Mailbox messages can be hours old, so the message's own timestamp is
//!   not used for expiry

use shared_types::{now_secs, MessageUid};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from uid validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UidError {
    /// The message was already processed.
    #[error("Message {uid} already processed")]
    Duplicate { uid: MessageUid },
}

/// Time-bounded set of seen message uids.
pub struct MessageUidCache {
    /// Map of uid -> time it was first seen.
    cache: HashMap<MessageUid, u64>,

    /// Retention window in seconds.
    retention_secs: u64,

    /// Last garbage collection timestamp.
    last_gc: u64,

    /// Garbage collection interval in seconds.
    gc_interval_secs: u64,
}

impl MessageUidCache {
    /// Default retention: one day, longer than any mailbox redelivery.
    pub const DEFAULT_RETENTION: u64 = 24 * 60 * 60;

    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL: u64 = 60;

    /// Create a cache with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Self::DEFAULT_RETENTION, Self::DEFAULT_GC_INTERVAL)
    }

    /// Create a cache with custom settings.
    #[must_use]
    pub fn with_config(retention_secs: u64, gc_interval_secs: u64) -> Self {
        Self {
            cache: HashMap::new(),
            retention_secs,
            last_gc: now_secs(),
            gc_interval_secs,
        }
    }

    /// Record `uid`, rejecting it if already seen.
    pub fn check_and_insert(&mut self, uid: MessageUid) -> Result<(), UidError> {
        self.check_and_insert_at(uid, now_secs())
    }

    /// Record `uid` as of `now`.
    pub fn check_and_insert_at(&mut self, uid: MessageUid, now: u64) -> Result<(), UidError> {
        self.maybe_gc(now);

        if self.cache.contains_key(&uid) {
            return Err(UidError::Duplicate { uid });
        }
        self.cache.insert(uid, now);
        Ok(())
    }

    /// Whether `uid` has been seen and not yet expired.
    #[must_use]
    pub fn contains(&self, uid: &MessageUid) -> bool {
        self.cache.contains_key(uid)
    }

    /// Number of remembered uids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn maybe_gc(&mut self, now: u64) {
        if now.saturating_sub(self.last_gc) >= self.gc_interval_secs {
            self.garbage_collect(now);
        }
    }

    /// Remove uids older than the retention window.
    pub fn garbage_collect(&mut self, now: u64) {
        let threshold = now.saturating_sub(self.retention_secs);
        self.cache.retain(|_, seen| *seen >= threshold);
        self.last_gc = now;
    }
}

impl Default for MessageUidCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected() {
        let mut cache = MessageUidCache::new();
        let uid = MessageUid::new();
        let now = now_secs();

        assert!(cache.check_and_insert_at(uid, now).is_ok());
        assert_eq!(
            cache.check_and_insert_at(uid, now + 5),
            Err(UidError::Duplicate { uid })
        );
        assert!(cache.check_and_insert_at(MessageUid::new(), now).is_ok());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_uids_collected() {
        let mut cache = MessageUidCache::with_config(100, 10);
        let old = MessageUid::new();
        let now = now_secs();

        cache.check_and_insert_at(old, now).unwrap();
        cache.check_and_insert_at(MessageUid::new(), now + 150).unwrap();

        assert!(!cache.contains(&old));
        assert_eq!(cache.len(), 1);
        // Once expired the uid is accepted again.
        assert!(cache.check_and_insert_at(old, now + 151).is_ok());
    }

    #[test]
    fn test_gc_waits_for_interval() {
        let mut cache = MessageUidCache::with_config(0, 1000);
        let uid = MessageUid::new();
        let now = now_secs();

        cache.check_and_insert_at(uid, now).unwrap();
        cache.check_and_insert_at(MessageUid::new(), now + 1).unwrap();
        assert!(cache.contains(&uid));
        assert!(!cache.is_empty());
    }
}
