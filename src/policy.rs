//! Deletion eligibility
//!
//! Access signatures handed out by the upper layer stay valid for
//! `blob_signature_ttl`. A block younger than twice that value may still be
//! referenced by an unexpired signature, so Delete must leave it in place.

use std::time::{Duration, SystemTime};

/// Decides whether a block's timestamp is old enough for physical deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionPolicy {
    signature_ttl: Duration,
}

impl DeletionPolicy {
    pub fn new(signature_ttl: Duration) -> Self {
        Self { signature_ttl }
    }

    pub fn signature_ttl(&self) -> Duration {
        self.signature_ttl
    }

    /// Minimum age a block must reach before it can be removed
    pub fn min_age(&self) -> Duration {
        self.signature_ttl.saturating_mul(2)
    }

    /// True when `mtime` is at least `2 × ttl` before `now`.
    /// Timestamps in the future are never eligible.
    pub fn is_deletable(&self, mtime: SystemTime, now: SystemTime) -> bool {
        match now.duration_since(mtime) {
            Ok(age) => age >= self.min_age(),
            Err(_) => false,
        }
    }

    /// A timestamp exactly old enough to be deletable as of `now`
    pub fn expired_as_of(&self, now: SystemTime) -> SystemTime {
        now.checked_sub(self.min_age()).unwrap_or(SystemTime::UNIX_EPOCH)
    }
}
