//! In-memory volume
//!
//! HashMap-based backend with RwLock for concurrency. Used for tests and for
//! exercising both legal collision behaviors of Put.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::config::{CollisionPolicy, Config, VolumeConfig};
use crate::error::{Result, VolumeError};
use crate::index::IndexEntry;
use crate::locator::{Locator, LOCATOR_LEN};
use crate::policy::DeletionPolicy;
use crate::status::VolumeStatus;

use super::{TestableVolume, Volume};

/// Reported capacity when none is configured: 1 GiB
pub const DEFAULT_MEMORY_CAPACITY: u64 = 1 << 30;

/// Source of per-instance device numbers (never zero)
static NEXT_DEVICE_NUM: AtomicU64 = AtomicU64::new(1);

/// Bookkeeping charged per stored block on top of its payload
const ENTRY_OVERHEAD: u64 = (std::mem::size_of::<StoredBlock>() + LOCATOR_LEN) as u64;

#[derive(Debug, Clone)]
struct StoredBlock {
    data: Bytes,
    mtime: SystemTime,
}

/// Volume that keeps blocks in process memory
///
/// ## Concurrency:
/// - `blocks`: one RwLock; reads share it, mutations take it exclusively
/// - Block bytes are `Bytes`, so Get clones a handle under the read lock
///   and copies into the pooled buffer after releasing it
pub struct MemoryVolume {
    device_num: u64,
    blocks: RwLock<HashMap<String, StoredBlock>>,
    pool: Arc<BufferPool>,
    policy: DeletionPolicy,
    writable: bool,
    collision_policy: CollisionPolicy,
    capacity: u64,
}

impl MemoryVolume {
    /// Create an empty volume
    pub fn new(pool: Arc<BufferPool>, policy: DeletionPolicy, writable: bool) -> Self {
        Self {
            device_num: NEXT_DEVICE_NUM.fetch_add(1, Ordering::Relaxed),
            blocks: RwLock::new(HashMap::new()),
            pool,
            policy,
            writable,
            collision_policy: CollisionPolicy::default(),
            capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }

    pub fn from_config(volume_config: &VolumeConfig, config: &Config, pool: Arc<BufferPool>) -> Self {
        let mut volume = Self::new(pool, config.deletion_policy(), !volume_config.read_only)
            .with_collision_policy(volume_config.collision_policy);
        if let Some(capacity) = volume_config.capacity {
            volume = volume.with_capacity(capacity);
        }
        volume
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = bytes;
        self
    }

    pub fn collision_policy(&self) -> CollisionPolicy {
        self.collision_policy
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(VolumeError::read_only(self))
        }
    }

    /// Payload plus bookkeeping, including the table itself
    fn bytes_used(&self) -> u64 {
        let blocks = self.blocks.read();
        let payload: u64 = blocks.values().map(|b| b.data.len() as u64).sum();
        std::mem::size_of::<Self>() as u64 + payload + ENTRY_OVERHEAD * blocks.len() as u64
    }
}

impl Volume for MemoryVolume {
    fn get(&self, hash: &str) -> Result<PooledBuffer> {
        let data = self
            .blocks
            .read()
            .get(hash)
            .map(|b| b.data.clone())
            .ok_or_else(|| VolumeError::not_found(hash))?;

        let mut buf = self.pool.get(data.len())?;
        buf.copy_from_slice(&data);
        tracing::trace!("{}: read {} ({} bytes)", self, hash, data.len());
        Ok(buf)
    }

    fn put(&self, hash: &str, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let locator = Locator::parse(hash)?;
        if data.len() > self.pool.buffer_size() {
            return Err(VolumeError::TooLarge {
                size: data.len(),
                max: self.pool.buffer_size(),
            });
        }

        let mut blocks = self.blocks.write();
        // Read the clock under the lock so racing Puts commit mtimes in order
        let now = SystemTime::now();

        if let Some(existing) = blocks.get_mut(locator.as_str()) {
            if existing.data[..] == *data {
                existing.mtime = now;
                tracing::debug!("{}: refreshed {}", self, hash);
                return Ok(());
            }
            match self.collision_policy {
                CollisionPolicy::Reject => {
                    tracing::warn!("{}: refusing to overwrite {} with different content", self, hash);
                    return Err(VolumeError::Collision {
                        hash: hash.to_string(),
                    });
                }
                CollisionPolicy::Overwrite => {
                    tracing::warn!("{}: overwriting {} with different content", self, hash);
                }
            }
        }

        blocks.insert(
            locator.as_str().to_string(),
            StoredBlock {
                data: Bytes::copy_from_slice(data),
                mtime: now,
            },
        );
        tracing::debug!("{}: stored {} ({} bytes)", self, hash, data.len());
        Ok(())
    }

    fn compare(&self, hash: &str, expected: &[u8]) -> Result<()> {
        let stored = self
            .blocks
            .read()
            .get(hash)
            .map(|b| b.data.clone())
            .ok_or_else(|| VolumeError::not_found(hash))?;

        if stored[..] == *expected {
            Ok(())
        } else {
            tracing::warn!("{}: content mismatch for {}", self, hash);
            Err(VolumeError::mismatch(hash))
        }
    }

    fn touch(&self, hash: &str) -> Result<()> {
        self.ensure_writable()?;
        let mut blocks = self.blocks.write();
        let block = blocks
            .get_mut(hash)
            .ok_or_else(|| VolumeError::not_found(hash))?;
        block.mtime = SystemTime::now();
        Ok(())
    }

    fn mtime(&self, hash: &str) -> Result<SystemTime> {
        self.blocks
            .read()
            .get(hash)
            .map(|b| b.mtime)
            .ok_or_else(|| VolumeError::not_found(hash))
    }

    fn delete(&self, hash: &str) -> Result<()> {
        self.ensure_writable()?;
        let mut blocks = self.blocks.write();
        let mtime = blocks
            .get(hash)
            .map(|b| b.mtime)
            .ok_or_else(|| VolumeError::not_found(hash))?;

        if !self.policy.is_deletable(mtime, SystemTime::now()) {
            tracing::debug!("{}: {} is too new to delete", self, hash);
            return Ok(());
        }

        blocks.remove(hash);
        tracing::debug!("{}: deleted {}", self, hash);
        Ok(())
    }

    fn index_to(&self, prefix: &str, sink: &mut dyn Write) -> Result<()> {
        // Snapshot under the lock, write after releasing it
        let entries: Vec<IndexEntry> = self
            .blocks
            .read()
            .iter()
            .filter(|(hash, _)| hash.starts_with(prefix))
            .map(|(hash, b)| IndexEntry::new(hash.as_str(), b.data.len() as u64, b.mtime))
            .collect();

        for entry in &entries {
            entry.write_line(sink)?;
        }
        Ok(())
    }

    fn status(&self) -> Result<VolumeStatus> {
        let bytes_used = self.bytes_used();
        Ok(VolumeStatus {
            device_num: self.device_num,
            bytes_free: self.capacity.saturating_sub(bytes_used),
            bytes_used,
        })
    }

    fn writable(&self) -> bool {
        self.writable
    }
}

impl TestableVolume for MemoryVolume {
    fn put_raw(&self, hash: &str, data: &[u8]) -> Result<()> {
        self.blocks.write().insert(
            hash.to_string(),
            StoredBlock {
                data: Bytes::copy_from_slice(data),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn touch_with_date(&self, hash: &str, date: SystemTime) -> Result<()> {
        let mut blocks = self.blocks.write();
        let block = blocks
            .get_mut(hash)
            .ok_or_else(|| VolumeError::not_found(hash))?;
        block.mtime = date;
        Ok(())
    }

    fn signature_ttl(&self) -> Duration {
        self.policy.signature_ttl()
    }

    fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn teardown(&mut self) {
        self.blocks.get_mut().clear();
    }
}

impl fmt::Display for MemoryVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[memory volume {}]", self.device_num)
    }
}
