//! Directory volume
//!
//! Stores each block as a file on a local or network-mounted filesystem.
//!
//! ## Layout
//! ```text
//! {root}/
//!   ├── e4d/
//!   │   └── e4d909c290d0fb1ca068ffaddf22cbd0
//!   └── f15/
//!       ├── f15ac516f788aec4f30932ffb6395c39
//!       └── .f15ac516f788aec4f30932ffb6395c39.tmp-4242-7   (Put in progress)
//! ```
//! The file's mtime is the block's timestamp. Put writes a temp file in the
//! target directory and renames it into place, so a reader sees either the
//! old file or the new one, never a partial write.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::{BufferPool, PooledBuffer};
use crate::config::{Config, VolumeConfig};
use crate::error::{Result, VolumeError};
use crate::index::IndexEntry;
use crate::locator::{self, Locator};
use crate::policy::DeletionPolicy;
use crate::status::VolumeStatus;

use super::{TestableVolume, Volume};

/// Number of striped per-key locks
const LOCK_STRIPES: usize = 64;

/// Chunk size for streaming Compare
const COMPARE_CHUNK: usize = 64 * 1024;

/// Distinguishes temp files written concurrently by one process
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Volume backed by a directory tree
///
/// ## Concurrency:
/// - Mutations (put/touch/delete) hold the stripe lock for their hash, so
///   unrelated keys proceed in parallel
/// - Reads take no stripe lock; rename-based replacement keeps them consistent
/// - With `serialize_io`, every operation additionally holds one volume-wide lock
pub struct DirectoryVolume {
    root: PathBuf,
    pool: Arc<BufferPool>,
    policy: DeletionPolicy,
    writable: bool,
    stripes: Vec<Mutex<()>>,
    serialize: Option<Mutex<()>>,

    /// Remove `root` on teardown
    owns_root: bool,
    torn_down: bool,
}

impl DirectoryVolume {
    /// Open a volume over an existing or new directory.
    ///
    /// A writable volume creates `root` if needed; a read-only one requires it.
    pub fn open(
        root: impl Into<PathBuf>,
        pool: Arc<BufferPool>,
        policy: DeletionPolicy,
        writable: bool,
    ) -> Result<Self> {
        let root = root.into();
        if writable {
            fs::create_dir_all(&root)?;
        } else if !root.is_dir() {
            return Err(VolumeError::Config(format!(
                "read-only volume root {} is not a directory",
                root.display()
            )));
        }

        Ok(Self {
            root,
            pool,
            policy,
            writable,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            serialize: None,
            owns_root: false,
            torn_down: false,
        })
    }

    /// Open a volume whose root directory is removed by `teardown`
    pub fn scratch(
        root: impl Into<PathBuf>,
        pool: Arc<BufferPool>,
        policy: DeletionPolicy,
        writable: bool,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut volume = Self::open(root, pool, policy, writable)?;
        volume.owns_root = true;
        Ok(volume)
    }

    pub fn from_config(volume_config: &VolumeConfig, config: &Config, pool: Arc<BufferPool>) -> Result<Self> {
        let volume = Self::open(
            &volume_config.root,
            pool,
            config.deletion_policy(),
            !volume_config.read_only,
        )?;
        Ok(volume.serialized(volume_config.serialize_io))
    }

    /// Serialize all I/O behind one volume-wide lock
    pub fn serialized(mut self, serialize: bool) -> Self {
        self.serialize = serialize.then(|| Mutex::new(()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_serialized(&self) -> bool {
        self.serialize.is_some()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(VolumeError::read_only(self))
        }
    }

    /// Volume-wide lock, if serialization is enabled
    fn io_guard(&self) -> Option<MutexGuard<'_, ()>> {
        self.serialize.as_ref().map(|m| m.lock())
    }

    /// Stripe lock for `hash`
    fn key_guard(&self, hash: &str) -> MutexGuard<'_, ()> {
        let slot = hash
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        self.stripes[slot % self.stripes.len()].lock()
    }

    fn block_path(&self, locator: Locator<'_>) -> PathBuf {
        self.root.join(locator.prefix()).join(locator.as_str())
    }

    /// Path for a read-side operation; a malformed hash cannot be stored,
    /// so it is reported as missing
    fn existing_path(&self, hash: &str) -> Result<PathBuf> {
        Locator::parse(hash)
            .map(|l| self.block_path(l))
            .map_err(|_| VolumeError::not_found(hash))
    }

    fn temp_path(&self, locator: Locator<'_>) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.root.join(locator.prefix()).join(format!(
            ".{}.tmp-{}-{}",
            locator,
            std::process::id(),
            seq
        ))
    }

    /// Write `data` to a temp file and rename it over the block path
    fn write_block(&self, locator: Locator<'_>, data: &[u8]) -> Result<()> {
        let dir = self.root.join(locator.prefix());
        fs::create_dir_all(&dir)?;

        let tmp = self.temp_path(locator);
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, self.block_path(locator))
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn set_mtime(&self, hash: &str, path: &Path, time: SystemTime) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| missing(e, hash))?;
        file.set_modified(time)?;
        Ok(())
    }

    /// Stream the stored file against `expected`
    fn compare_file(&self, hash: &str, path: &Path, expected: &[u8]) -> Result<bool> {
        let mut file = File::open(path).map_err(|e| missing(e, hash))?;
        if file.metadata()?.len() != expected.len() as u64 {
            return Ok(false);
        }

        let mut chunk = vec![0u8; COMPARE_CHUNK.min(expected.len().max(1))];
        let mut offset = 0;
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                return Ok(offset == expected.len());
            }
            if offset + n > expected.len() || chunk[..n] != expected[offset..offset + n] {
                return Ok(false);
            }
            offset += n;
        }
    }

    /// Index lines for one fan-out subdirectory
    fn index_dir(&self, dir: &Path, prefix: &str, sink: &mut dyn Write) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            // Removed by a concurrent operation
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !locator::is_valid(name) || !name.starts_with(prefix) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            IndexEntry::new(name, metadata.len(), metadata.modified()?).write_line(sink)?;
        }
        Ok(())
    }
}

impl Volume for DirectoryVolume {
    fn get(&self, hash: &str) -> Result<PooledBuffer> {
        let path = self.existing_path(hash)?;

        loop {
            // Lease before taking the volume lock; never wait on the pool
            // while holding it
            let len = fs::metadata(&path).map_err(|e| missing(e, hash))?.len() as usize;
            let mut buf = self.pool.get(len)?;

            let _io = self.io_guard();
            let mut file = File::open(&path).map_err(|e| missing(e, hash))?;
            if file.metadata()?.len() as usize != len {
                tracing::debug!("{}: {} replaced during read, retrying", self, hash);
                continue;
            }

            file.read_exact(&mut buf)?;
            tracing::trace!("{}: read {} ({} bytes)", self, hash, len);
            return Ok(buf);
        }
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

        let _io = self.io_guard();
        let _key = self.key_guard(hash);
        let path = self.block_path(locator);

        match self.compare_file(hash, &path, data) {
            Ok(true) => {
                self.set_mtime(hash, &path, SystemTime::now())?;
                tracing::debug!("{}: refreshed {}", self, hash);
                return Ok(());
            }
            Ok(false) => {
                tracing::warn!("{}: overwriting {} with different content", self, hash);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.write_block(locator, data)?;
        tracing::debug!("{}: stored {} ({} bytes)", self, hash, data.len());
        Ok(())
    }

    fn compare(&self, hash: &str, expected: &[u8]) -> Result<()> {
        let path = self.existing_path(hash)?;
        let _io = self.io_guard();

        if self.compare_file(hash, &path, expected)? {
            Ok(())
        } else {
            tracing::warn!("{}: content mismatch for {}", self, hash);
            Err(VolumeError::mismatch(hash))
        }
    }

    fn touch(&self, hash: &str) -> Result<()> {
        self.ensure_writable()?;
        let path = self.existing_path(hash)?;
        let _io = self.io_guard();
        let _key = self.key_guard(hash);

        self.set_mtime(hash, &path, SystemTime::now())
    }

    fn mtime(&self, hash: &str) -> Result<SystemTime> {
        let path = self.existing_path(hash)?;
        let _io = self.io_guard();

        let metadata = fs::metadata(&path).map_err(|e| missing(e, hash))?;
        Ok(metadata.modified()?)
    }

    fn delete(&self, hash: &str) -> Result<()> {
        self.ensure_writable()?;
        let path = self.existing_path(hash)?;
        let _io = self.io_guard();
        let _key = self.key_guard(hash);

        let mtime = fs::metadata(&path)
            .map_err(|e| missing(e, hash))?
            .modified()?;

        if !self.policy.is_deletable(mtime, SystemTime::now()) {
            tracing::debug!("{}: {} is too new to delete", self, hash);
            return Ok(());
        }

        fs::remove_file(&path).map_err(|e| missing(e, hash))?;
        tracing::debug!("{}: deleted {}", self, hash);
        Ok(())
    }

    fn index_to(&self, prefix: &str, sink: &mut dyn Write) -> Result<()> {
        let _io = self.io_guard();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            // Fan-out dirs are the first three hex chars of the locator
            let relevant = if prefix.len() >= 3 {
                prefix.starts_with(name)
            } else {
                name.starts_with(prefix)
            };
            if name.len() != 3 || !relevant || !entry.file_type()?.is_dir() {
                continue;
            }

            self.index_dir(&entry.path(), prefix, sink)?;
        }
        Ok(())
    }

    fn status(&self) -> Result<VolumeStatus> {
        let space = disk_space(&self.root)?;
        Ok(VolumeStatus {
            device_num: device_num(&self.root)?,
            bytes_free: space.free,
            bytes_used: space.used,
        })
    }

    fn writable(&self) -> bool {
        self.writable
    }
}

impl TestableVolume for DirectoryVolume {
    fn put_raw(&self, hash: &str, data: &[u8]) -> Result<()> {
        let locator = Locator::parse(hash)?;
        self.write_block(locator, data)
    }

    fn touch_with_date(&self, hash: &str, date: SystemTime) -> Result<()> {
        let path = self.existing_path(hash)?;
        self.set_mtime(hash, &path, date)
    }

    fn signature_ttl(&self) -> Duration {
        self.policy.signature_ttl()
    }

    fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.owns_root {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("{}: teardown failed: {}", self, e);
                }
            }
        }
    }
}

impl fmt::Display for DirectoryVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[directory {}]", self.root.display())
    }
}

/// Map a filesystem "not found" to the contract's NotFound
fn missing(e: io::Error, hash: &str) -> VolumeError {
    if e.kind() == io::ErrorKind::NotFound {
        VolumeError::not_found(hash)
    } else {
        VolumeError::Io(e)
    }
}

// =============================================================================
// Space Accounting
// =============================================================================

struct DiskSpace {
    free: u64,
    used: u64,
}

#[cfg(unix)]
fn device_num(path: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(path)?.dev())
}

#[cfg(not(unix))]
fn device_num(_path: &Path) -> Result<u64> {
    Err(VolumeError::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "device numbers are only available on Unix",
    )))
}

#[cfg(unix)]
fn disk_space(path: &Path) -> Result<DiskSpace> {
    use std::os::unix::ffi::OsStrExt;

    let path_cstr = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: statvfs is a plain C struct of integers; all-zero is a valid value.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: path_cstr is a valid NUL-terminated string and stat a valid
    // out-pointer for the duration of the call.
    let rc = unsafe { libc::statvfs(path_cstr.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }

    let frsize = stat.f_frsize as u64;
    Ok(DiskSpace {
        free: stat.f_bavail as u64 * frsize,
        used: (stat.f_blocks as u64).saturating_sub(stat.f_bfree as u64) * frsize,
    })
}

#[cfg(not(unix))]
fn disk_space(_path: &Path) -> Result<DiskSpace> {
    Err(VolumeError::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk space accounting is only available on Unix",
    )))
}
