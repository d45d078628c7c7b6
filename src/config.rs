//! Configuration for blockvol
//!
//! Centralized configuration with sensible defaults. A `Config` is built
//! once at startup and never mutated afterwards; runtime objects that need
//! it (the deletion policy, the buffer pool) are derived from it and passed
//! explicitly into each volume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::BufferPool;
use crate::error::{Result, VolumeError};
use crate::policy::DeletionPolicy;

/// Default blob signature TTL: two weeks.
pub const DEFAULT_BLOB_SIGNATURE_TTL: Duration = Duration::from_secs(1_209_600);

/// Default maximum block size: 64 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 26;

/// Default number of read buffers in the pool.
pub const DEFAULT_MAX_BUFFERS: usize = 128;

/// Process-wide configuration shared by every volume
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Retention
    // -------------------------------------------------------------------------
    /// Lifetime of access signatures issued elsewhere in the system.
    /// Blocks younger than twice this value are never physically deleted.
    pub blob_signature_ttl: Duration,

    // -------------------------------------------------------------------------
    // Buffer Pool
    // -------------------------------------------------------------------------
    /// Largest block a volume will store or return (bytes).
    /// Also the capacity of every pooled read buffer.
    pub block_size: usize,

    /// Max buffers leased at once; further reads wait for a release
    pub max_buffers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blob_signature_ttl: DEFAULT_BLOB_SIGNATURE_TTL,
            block_size: DEFAULT_BLOCK_SIZE,
            max_buffers: DEFAULT_MAX_BUFFERS,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values no volume could operate with
    pub fn validate(&self) -> Result<()> {
        if self.blob_signature_ttl.is_zero() {
            return Err(VolumeError::Config(
                "blob_signature_ttl must be greater than zero".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(VolumeError::Config(
                "block_size must be greater than zero".to_string(),
            ));
        }
        if self.max_buffers == 0 {
            return Err(VolumeError::Config(
                "max_buffers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Deletion policy derived from the signature TTL
    pub fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::new(self.blob_signature_ttl)
    }

    /// Build the shared read-buffer pool
    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        Arc::new(BufferPool::new(self.block_size, self.max_buffers))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the blob signature TTL
    pub fn blob_signature_ttl(mut self, ttl: Duration) -> Self {
        self.config.blob_signature_ttl = ttl;
        self
    }

    /// Set the maximum block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the number of pooled read buffers
    pub fn max_buffers(mut self, count: usize) -> Self {
        self.config.max_buffers = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Per-volume Configuration
// =============================================================================

/// Storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Files under a local (or network-mounted) directory
    #[default]
    Directory,

    /// Process memory; contents vanish with the volume
    Memory,
}

/// What a backend does when Put meets different content under an existing hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Replace the stored content; later Gets return the new bytes
    #[default]
    Overwrite,

    /// Refuse the Put with `VolumeError::Collision`; stored bytes are kept
    Reject,
}

/// Configuration for a single volume
#[derive(Debug, Clone, Default)]
pub struct VolumeConfig {
    pub kind: BackendKind,

    /// Root directory (directory backend only)
    pub root: PathBuf,

    /// Open the volume read-only
    pub read_only: bool,

    /// Serialize all I/O on the volume behind one lock
    pub serialize_io: bool,

    /// Collision handling (memory backend only; the directory
    /// backend always replaces atomically)
    pub collision_policy: CollisionPolicy,

    /// Reported capacity for backends without a real device (bytes)
    pub capacity: Option<u64>,
}

impl VolumeConfig {
    pub fn builder() -> VolumeConfigBuilder {
        VolumeConfigBuilder::default()
    }
}

/// Builder for VolumeConfig
#[derive(Default)]
pub struct VolumeConfigBuilder {
    config: VolumeConfig,
}

impl VolumeConfigBuilder {
    pub fn kind(mut self, kind: BackendKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root = path.into();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn serialize_io(mut self, serialize: bool) -> Self {
        self.config.serialize_io = serialize;
        self
    }

    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.config.collision_policy = policy;
        self
    }

    pub fn capacity(mut self, bytes: u64) -> Self {
        self.config.capacity = Some(bytes);
        self
    }

    pub fn build(self) -> VolumeConfig {
        self.config
    }
}
