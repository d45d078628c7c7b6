//! Tests for DirectoryVolume
//!
//! These tests verify:
//! - Blocks persist as files and survive reopening the volume
//! - Put of different content replaces the file atomically
//! - Deletion honors the 2 × TTL rule using file mtimes
//! - Read-only volumes refuse every mutation and leave files untouched
//! - Serialized and striped locking both tolerate concurrent callers
//! - Construction through open_volume

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use blockvol::conformance::fixtures::*;
use blockvol::{
    open_volume, BackendKind, BufferPool, Config, DeletionPolicy, DirectoryVolume, TestableVolume,
    Volume, VolumeConfig, VolumeError,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const TTL: Duration = Duration::from_secs(600);

fn setup_temp_root() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("volume");
    (temp_dir, path)
}

fn open(root: &Path, writable: bool) -> DirectoryVolume {
    let pool = Arc::new(BufferPool::new(1 << 16, 8));
    DirectoryVolume::open(root, pool, DeletionPolicy::new(TTL), writable).unwrap()
}

fn block_file(root: &Path, hash: &str) -> PathBuf {
    root.join(&hash[..3]).join(hash)
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_open_creates_root() {
    let (_temp, root) = setup_temp_root();
    assert!(!root.exists());

    let _volume = open(&root, true);
    assert!(root.is_dir());
}

#[test]
fn test_blocks_survive_reopen() {
    let (_temp, root) = setup_temp_root();

    {
        let volume = open(&root, true);
        for (hash, block) in ALL_BLOCKS {
            volume.put(hash, block).unwrap();
        }
    }

    let volume = open(&root, false);
    for (hash, block) in ALL_BLOCKS {
        assert_eq!(&volume.get(hash).unwrap()[..], block);
    }
}

#[test]
fn test_block_file_holds_exact_content() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);

    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    assert_eq!(fs::read(block_file(&root, TEST_HASH)).unwrap(), TEST_BLOCK);
}

#[test]
fn test_put_different_content_overwrites() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);

    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    volume.put(TEST_HASH, TEST_BLOCK_2).unwrap();

    assert_eq!(&volume.get(TEST_HASH).unwrap()[..], TEST_BLOCK_2);
}

#[test]
fn test_put_same_content_refreshes_mtime() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    let old = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
    volume.touch_with_date(TEST_HASH, old).unwrap();
    assert_eq!(volume.mtime(TEST_HASH).unwrap(), old);

    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    assert!(volume.mtime(TEST_HASH).unwrap() > old);
}

#[test]
fn test_corrupt_file_fails_compare() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    fs::write(block_file(&root, TEST_HASH), BAD_BLOCK).unwrap();

    assert!(volume.compare(TEST_HASH, TEST_BLOCK).unwrap_err().is_mismatch());
}

#[test]
fn test_stray_files_are_not_indexed() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    fs::write(root.join("e4d").join("notes.txt"), b"x").unwrap();
    fs::write(root.join("README"), b"x").unwrap();
    fs::create_dir_all(root.join("tmp")).unwrap();

    let mut out = Vec::new();
    volume.index_to("", &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_new_block_keeps_file() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    volume.delete(TEST_HASH).unwrap();
    assert!(block_file(&root, TEST_HASH).is_file());
}

#[test]
fn test_delete_old_block_removes_file() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    let expired = DeletionPolicy::new(TTL).expired_as_of(SystemTime::now());
    volume.touch_with_date(TEST_HASH, expired).unwrap();
    volume.delete(TEST_HASH).unwrap();

    assert!(!block_file(&root, TEST_HASH).exists());
    assert!(volume.mtime(TEST_HASH).unwrap_err().is_not_found());
}

#[test]
fn test_delete_missing_block() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true);

    assert!(volume.delete(TEST_HASH).unwrap_err().is_not_found());
}

// =============================================================================
// Read-only Tests
// =============================================================================

#[test]
fn test_read_only_open_of_missing_root() {
    let (_temp, root) = setup_temp_root();
    let pool = Arc::new(BufferPool::new(64, 1));

    let result = DirectoryVolume::open(&root, pool, DeletionPolicy::new(TTL), false);
    assert!(matches!(result, Err(VolumeError::Config(_))));
    assert!(!root.exists());
}

#[test]
fn test_read_only_leaves_files_untouched() {
    let (_temp, root) = setup_temp_root();
    open(&root, true).put(TEST_HASH, TEST_BLOCK).unwrap();

    let volume = open(&root, false);
    let mtime = volume.mtime(TEST_HASH).unwrap();

    assert!(volume.put(TEST_HASH_2, TEST_BLOCK_2).unwrap_err().is_read_only());
    assert!(volume.touch(TEST_HASH).unwrap_err().is_read_only());
    assert!(volume.delete(TEST_HASH).unwrap_err().is_read_only());

    assert!(!block_file(&root, TEST_HASH_2).exists());
    assert_eq!(volume.mtime(TEST_HASH).unwrap(), mtime);
    assert_eq!(fs::read(block_file(&root, TEST_HASH)).unwrap(), TEST_BLOCK);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

fn hammer(volume: Arc<DirectoryVolume>) {
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let volume = Arc::clone(&volume);
            thread::spawn(move || {
                let (hash, block) = ALL_BLOCKS[i % ALL_BLOCKS.len()];
                for _ in 0..10 {
                    volume.put(hash, block).unwrap();
                    volume.compare(hash, block).unwrap();
                    assert_eq!(&volume.get(hash).unwrap()[..], block);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(volume.buffer_pool().leased(), 0);
}

#[test]
fn test_concurrent_same_key_puts() {
    let (_temp, root) = setup_temp_root();
    hammer(Arc::new(open(&root, true)));
}

#[test]
fn test_concurrent_puts_serialized() {
    let (_temp, root) = setup_temp_root();
    let volume = open(&root, true).serialized(true);
    assert!(volume.is_serialized());
    hammer(Arc::new(volume));
}

#[test]
fn test_get_waiting_for_buffer_does_not_block_volume() {
    let (_temp, root) = setup_temp_root();
    let pool = Arc::new(BufferPool::new(1 << 16, 1));
    let volume = Arc::new(
        DirectoryVolume::open(&root, pool, DeletionPolicy::new(TTL), true)
            .unwrap()
            .serialized(true),
    );
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    volume.put(TEST_HASH_2, TEST_BLOCK_2).unwrap();

    // Holds the pool's only buffer
    let held = volume.get(TEST_HASH).unwrap();

    let (get_tx, get_rx) = mpsc::channel();
    let waiter = {
        let volume = Arc::clone(&volume);
        thread::spawn(move || {
            let buf = volume.get(TEST_HASH_2).unwrap();
            get_tx.send(buf.to_vec()).unwrap();
        })
    };

    // Give the waiting Get time to park on the pool
    thread::sleep(Duration::from_millis(100));

    let (op_tx, op_rx) = mpsc::channel();
    let reader = {
        let volume = Arc::clone(&volume);
        thread::spawn(move || {
            let mtime = volume.mtime(TEST_HASH).is_ok();
            let compare = volume.compare(TEST_HASH, TEST_BLOCK).is_ok();
            let mut index = Vec::new();
            let listed = volume.index_to("", &mut index).is_ok();
            op_tx.send(mtime && compare && listed).unwrap();
        })
    };

    assert!(
        op_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        "operations on the volume failed"
    );
    assert!(get_rx.try_recv().is_err(), "get should still be waiting for a buffer");

    drop(held);
    assert_eq!(get_rx.recv_timeout(Duration::from_secs(5)).unwrap(), TEST_BLOCK);

    reader.join().unwrap();
    waiter.join().unwrap();
    assert_eq!(volume.buffer_pool().leased(), 0);
}

#[test]
fn test_compare_of_block_larger_than_buffers() {
    let (_temp, root) = setup_temp_root();
    let pool = Arc::new(BufferPool::new(16, 1));
    let volume = DirectoryVolume::open(&root, pool, DeletionPolicy::new(TTL), true).unwrap();
    volume.put_raw(TEST_HASH, &[7u8; 64]).unwrap();

    assert!(volume.compare(TEST_HASH, TEST_BLOCK).unwrap_err().is_mismatch());
    assert!(volume.compare(TEST_HASH, &[7u8; 64]).is_ok());
    assert_eq!(volume.buffer_pool().leased(), 0);
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_open_volume_directory_backend() {
    let (_temp, root) = setup_temp_root();
    let config = Config::builder()
        .block_size(1 << 16)
        .blob_signature_ttl(TTL)
        .build();
    let volume_config = VolumeConfig::builder()
        .kind(BackendKind::Directory)
        .root(&root)
        .serialize_io(true)
        .build();

    let volume = open_volume(&volume_config, &config, config.buffer_pool()).unwrap();
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    assert!(volume.to_string().contains("directory"));
    assert_eq!(volume.signature_ttl(), TTL);
    assert!(block_file(&root, TEST_HASH).is_file());
}

#[test]
fn test_scratch_volume_teardown() {
    let (_temp, root) = setup_temp_root();
    let pool = Arc::new(BufferPool::new(64, 1));
    let mut volume = DirectoryVolume::scratch(&root, pool, DeletionPolicy::new(TTL), false).unwrap();

    volume.put_raw(TEST_HASH, b"raw").unwrap();
    assert_eq!(&volume.get(TEST_HASH).unwrap()[..], b"raw");

    volume.teardown();
    assert!(!root.exists());
}
