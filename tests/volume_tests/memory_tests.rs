//! Tests for MemoryVolume
//!
//! These tests verify:
//! - Put/Get/Compare/Touch/Mtime/Delete semantics
//! - Both collision policies
//! - Deletion honors the 2 × TTL rule
//! - Read-only volumes refuse every mutation
//! - Construction through open_volume

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use blockvol::conformance::fixtures::*;
use blockvol::{
    open_volume, BackendKind, BufferPool, CollisionPolicy, Config, DeletionPolicy, MemoryVolume,
    TestableVolume, Volume, VolumeConfig, VolumeError,
};

// =============================================================================
// Helper Functions
// =============================================================================

const TTL: Duration = Duration::from_secs(600);

fn writable() -> MemoryVolume {
    MemoryVolume::new(Arc::new(BufferPool::new(1024, 8)), DeletionPolicy::new(TTL), true)
}

fn read_only() -> MemoryVolume {
    MemoryVolume::new(Arc::new(BufferPool::new(1024, 8)), DeletionPolicy::new(TTL), false)
}

// =============================================================================
// Put/Get Tests
// =============================================================================

#[test]
fn test_put_then_get() {
    let volume = writable();
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    let buf = volume.get(TEST_HASH).unwrap();
    assert_eq!(&buf[..], TEST_BLOCK);
}

#[test]
fn test_get_missing_block() {
    let volume = writable();

    let err = volume.get(TEST_HASH).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(volume.buffer_pool().leased(), 0);
}

#[test]
fn test_put_empty_block() {
    let volume = writable();
    volume.put(TEST_HASH, b"").unwrap();

    let buf = volume.get(TEST_HASH).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn test_put_same_content_refreshes_mtime() {
    let volume = writable();
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    let old = SystemTime::now() - Duration::from_secs(3600);
    volume.touch_with_date(TEST_HASH, old).unwrap();

    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    assert!(volume.mtime(TEST_HASH).unwrap() > old);
    assert_eq!(volume.len(), 1);
}

#[test]
fn test_overwrite_policy_replaces_content() {
    let volume = writable();
    assert_eq!(volume.collision_policy(), CollisionPolicy::Overwrite);

    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    volume.put(TEST_HASH, TEST_BLOCK_2).unwrap();

    assert_eq!(&volume.get(TEST_HASH).unwrap()[..], TEST_BLOCK_2);
}

#[test]
fn test_reject_policy_keeps_original() {
    let volume = writable().with_collision_policy(CollisionPolicy::Reject);

    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    let err = volume.put(TEST_HASH, TEST_BLOCK_2).unwrap_err();

    assert!(matches!(err, VolumeError::Collision { .. }));
    assert_eq!(&volume.get(TEST_HASH).unwrap()[..], TEST_BLOCK);
}

#[test]
fn test_put_rejects_malformed_locator() {
    let volume = writable();

    for hash in ["", "abc", "E4D909C290D0FB1CA068FFADDF22CBD0", "g4d909c290d0fb1ca068ffaddf22cbd0"] {
        let err = volume.put(hash, TEST_BLOCK).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidLocator(_)), "{:?}", hash);
    }
    assert!(volume.is_empty());
}

#[test]
fn test_put_rejects_oversized_block() {
    let volume = writable();

    let err = volume.put(TEST_HASH, &vec![1u8; 1025]).unwrap_err();
    assert!(matches!(err, VolumeError::TooLarge { size: 1025, max: 1024 }));
}

// =============================================================================
// Compare Tests
// =============================================================================

#[test]
fn test_compare_outcomes() {
    let volume = writable();
    volume.put_raw(TEST_HASH, TEST_BLOCK).unwrap();
    volume.put_raw(TEST_HASH_2, BAD_BLOCK).unwrap();

    volume.compare(TEST_HASH, TEST_BLOCK).unwrap();
    assert!(volume.compare(TEST_HASH, BAD_BLOCK).unwrap_err().is_mismatch());
    assert!(volume.compare(TEST_HASH_2, TEST_BLOCK_2).unwrap_err().is_mismatch());
    assert!(volume.compare(TEST_HASH_3, TEST_BLOCK_3).unwrap_err().is_not_found());
    assert_eq!(volume.buffer_pool().leased(), 0);
}

#[test]
fn test_compare_of_block_larger_than_buffers() {
    let volume = MemoryVolume::new(Arc::new(BufferPool::new(16, 4)), DeletionPolicy::new(TTL), true);
    volume.put_raw(TEST_HASH, &[7u8; 64]).unwrap();

    assert!(volume.compare(TEST_HASH, TEST_BLOCK).unwrap_err().is_mismatch());
    assert!(volume.compare(TEST_HASH, &[7u8; 64]).is_ok());
}

#[test]
fn test_compare_with_exhausted_pool() {
    let volume = MemoryVolume::new(Arc::new(BufferPool::new(1024, 1)), DeletionPolicy::new(TTL), true);
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    let _held = volume.get(TEST_HASH).unwrap();
    volume.compare(TEST_HASH, TEST_BLOCK).unwrap();
    assert!(volume.compare(TEST_HASH, BAD_BLOCK).unwrap_err().is_mismatch());
}

// =============================================================================
// Touch/Mtime Tests
// =============================================================================

#[test]
fn test_touch_advances_mtime() {
    let volume = writable();
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    let old = SystemTime::now() - Duration::from_secs(60);
    volume.touch_with_date(TEST_HASH, old).unwrap();

    volume.touch(TEST_HASH).unwrap();
    assert!(volume.mtime(TEST_HASH).unwrap() > old);
}

#[test]
fn test_touch_and_mtime_of_missing_block() {
    let volume = writable();

    assert!(volume.touch(TEST_HASH).unwrap_err().is_not_found());
    assert!(volume.mtime(NO_SUCH_HASH).unwrap_err().is_not_found());
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_respects_age_threshold() {
    let volume = writable();
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    // Just younger than 2 × TTL: kept
    let young = SystemTime::now() - 2 * TTL + Duration::from_secs(30);
    volume.touch_with_date(TEST_HASH, young).unwrap();
    volume.delete(TEST_HASH).unwrap();
    assert!(volume.get(TEST_HASH).is_ok());

    // Exactly 2 × TTL old: removed
    let policy = DeletionPolicy::new(TTL);
    volume
        .touch_with_date(TEST_HASH, policy.expired_as_of(SystemTime::now()))
        .unwrap();
    volume.delete(TEST_HASH).unwrap();
    assert!(volume.get(TEST_HASH).unwrap_err().is_not_found());
}

#[test]
fn test_delete_future_mtime_is_kept() {
    let volume = writable();
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    volume
        .touch_with_date(TEST_HASH, SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    volume.delete(TEST_HASH).unwrap();
    assert!(volume.get(TEST_HASH).is_ok());
}

#[test]
fn test_delete_missing_block() {
    let volume = writable();
    assert!(volume.delete(TEST_HASH).unwrap_err().is_not_found());
}

// =============================================================================
// Read-only Tests
// =============================================================================

#[test]
fn test_read_only_refuses_mutations() {
    let volume = read_only();
    volume.put_raw(TEST_HASH, TEST_BLOCK).unwrap();

    assert!(volume.put(TEST_HASH_2, TEST_BLOCK_2).unwrap_err().is_read_only());
    assert!(volume.touch(TEST_HASH).unwrap_err().is_read_only());
    assert!(volume.delete(TEST_HASH).unwrap_err().is_read_only());

    assert_eq!(&volume.get(TEST_HASH).unwrap()[..], TEST_BLOCK);
    assert_eq!(volume.len(), 1);
    assert!(!volume.writable());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_parallel_puts_and_gets() {
    let volume = Arc::new(writable());

    let handles: Vec<_> = ALL_BLOCKS
        .iter()
        .map(|&(hash, block)| {
            let volume = Arc::clone(&volume);
            thread::spawn(move || {
                for _ in 0..20 {
                    volume.put(hash, block).unwrap();
                    assert_eq!(&volume.get(hash).unwrap()[..], block);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(volume.len(), 3);
    assert_eq!(volume.buffer_pool().leased(), 0);
}

#[test]
fn test_racing_puts_never_move_mtime_backward() {
    let volume = Arc::new(writable());
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let volume = Arc::clone(&volume);
            thread::spawn(move || {
                for _ in 0..500 {
                    volume.put(TEST_HASH, TEST_BLOCK).unwrap();
                }
            })
        })
        .collect();

    let sampler = {
        let volume = Arc::clone(&volume);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = volume.mtime(TEST_HASH).unwrap();
            while !done.load(Ordering::Acquire) {
                let mtime = volume.mtime(TEST_HASH).unwrap();
                assert!(mtime >= last, "mtime moved from {:?} back to {:?}", last, mtime);
                last = mtime;
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    sampler.join().unwrap();
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_open_volume_memory_backend() {
    let config = Config::builder().block_size(4096).max_buffers(2).build();
    let volume_config = VolumeConfig::builder()
        .kind(BackendKind::Memory)
        .collision_policy(CollisionPolicy::Reject)
        .capacity(1 << 20)
        .build();

    let volume = open_volume(&volume_config, &config, config.buffer_pool()).unwrap();
    volume.put(TEST_HASH, TEST_BLOCK).unwrap();

    assert!(volume.writable());
    assert!(matches!(
        volume.put(TEST_HASH, TEST_BLOCK_2),
        Err(VolumeError::Collision { .. })
    ));
    assert!(volume.status().unwrap().bytes_free < 1 << 20);
}
