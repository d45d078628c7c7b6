//! Volume Module
//!
//! The storage contract every backend satisfies, plus the reference backends.
//!
//! ## Responsibilities
//! - Define the operations an upper-layer block server may call on a volume
//! - Define the test-only hatches the conformance suite needs
//! - Construct a backend from configuration
//!
//! ## Backends
//! ```text
//!                ┌──────────────────────┐
//!                │    dyn Volume        │
//!                └──────────┬───────────┘
//!           ┌───────────────┴───────────────┐
//!           ▼                               ▼
//!   ┌───────────────┐              ┌─────────────────┐
//!   │ MemoryVolume  │              │ DirectoryVolume │
//!   │ (RwLock map)  │              │ (<root>/abc/..) │
//!   └───────────────┘              └─────────────────┘
//! ```
//! A network filesystem is served by `DirectoryVolume` over the mount point.

pub mod directory;
pub mod memory;

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::buffer::{BufferPool, PooledBuffer};
use crate::config::{BackendKind, Config, VolumeConfig};
use crate::error::Result;
use crate::status::VolumeStatus;

pub use directory::DirectoryVolume;
pub use memory::MemoryVolume;

/// A single storage backend holding blocks and their modification times
///
/// All operations take `&self` and may be called from many threads at once,
/// including against the same hash.
pub trait Volume: fmt::Display + Send + Sync {
    /// Full content stored under `hash`, in a buffer leased from the pool.
    ///
    /// Fails with `NotFound` if nothing is stored under `hash`.
    fn get(&self, hash: &str) -> Result<PooledBuffer>;

    /// Store `data` under `hash` and set its mtime to now.
    ///
    /// Identical content already present: succeed and refresh the mtime.
    /// Different content already present: the backend either overwrites (a
    /// later Get returns `data`) or fails (a later Get returns the old bytes,
    /// `data`, or `NotFound`). Partial bytes are never observable.
    fn put(&self, hash: &str, data: &[u8]) -> Result<()>;

    /// Succeed iff the bytes stored under `hash` equal `expected`.
    ///
    /// `Mismatch` covers both collisions and on-media corruption, including
    /// stored blocks larger than any pool buffer. Takes no pool lease.
    fn compare(&self, hash: &str, expected: &[u8]) -> Result<()>;

    /// Set the stored block's mtime to now
    fn touch(&self, hash: &str) -> Result<()>;

    /// Modification time of the stored block
    fn mtime(&self, hash: &str) -> Result<SystemTime>;

    /// Remove the block if its mtime is at least 2 × TTL old; otherwise
    /// succeed without changing anything.
    fn delete(&self, hash: &str) -> Result<()>;

    /// Write one index line for every block whose hash starts with `prefix`
    fn index_to(&self, prefix: &str, sink: &mut dyn Write) -> Result<()>;

    /// Live space accounting
    fn status(&self) -> Result<VolumeStatus>;

    /// Fixed for the volume's lifetime
    fn writable(&self) -> bool;
}

/// Test-only surface used by the conformance suite
///
/// These hatches bypass every consistency check so fixtures can hold
/// corrupted or colliding data, and so block aging can be simulated.
pub trait TestableVolume: Volume {
    /// Store arbitrary bytes under `hash`, ignoring writability and
    /// content checks
    fn put_raw(&self, hash: &str, data: &[u8]) -> Result<()>;

    /// Set the stored block's mtime to an arbitrary time
    fn touch_with_date(&self, hash: &str, date: SystemTime) -> Result<()>;

    /// Signature TTL the volume's deletion policy was built with
    fn signature_ttl(&self) -> Duration;

    /// Pool this volume leases read buffers from
    fn buffer_pool(&self) -> &Arc<BufferPool>;

    /// Release everything the volume allocated. Safe to call more than once;
    /// failures are logged, never raised.
    fn teardown(&mut self);
}

/// Construct the backend described by `volume_config`
pub fn open_volume(
    volume_config: &VolumeConfig,
    config: &Config,
    pool: Arc<BufferPool>,
) -> Result<Box<dyn TestableVolume>> {
    config.validate()?;

    let volume: Box<dyn TestableVolume> = match volume_config.kind {
        BackendKind::Memory => Box::new(MemoryVolume::from_config(volume_config, config, pool)),
        BackendKind::Directory => {
            Box::new(DirectoryVolume::from_config(volume_config, config, pool)?)
        }
    };

    tracing::info!(
        "Opened {} (writable={})",
        volume,
        volume.writable()
    );
    Ok(volume)
}
