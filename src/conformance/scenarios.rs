//! Conformance scenarios
//!
//! Each scenario receives a fresh volume and checks one point of the
//! contract. The runner owns construction, applicability and teardown.

use std::borrow::Cow;
use std::time::{Duration, SystemTime};

use crate::index::{parse_index, unix_seconds, IndexEntry};
use crate::policy::DeletionPolicy;
use crate::volume::TestableVolume;

use super::fixtures::*;
use super::{Category, Check, Failure, Scenario};

/// Slack for backends whose timestamps have coarse granularity
const MTIME_GRANULARITY: Duration = Duration::from_secs(1);

macro_rules! fail {
    ($($arg:tt)*) => {
        Failure(format!($($arg)*))
    };
}

macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(fail!($($arg)*));
        }
    };
}

/// Every scenario, in run order
pub(super) const ALL: &[Scenario] = &[
    Scenario::new("get", Category::Any, get),
    Scenario::new("get_no_such_block", Category::Any, get_no_such_block),
    Scenario::new("compare_same_content", Category::Any, compare_same_content),
    Scenario::new("compare_with_different_content", Category::Any, compare_with_different_content),
    Scenario::new("compare_with_bad_data", Category::Any, compare_with_bad_data),
    Scenario::new("compare_no_such_block", Category::Any, compare_no_such_block),
    Scenario::new("put_block_with_same_content", Category::Writable, put_block_with_same_content),
    Scenario::new("put_block_with_different_content", Category::Writable, put_block_with_different_content),
    Scenario::new("put_multiple_blocks", Category::Writable, put_multiple_blocks),
    Scenario::new("put_and_touch", Category::Writable, put_and_touch),
    Scenario::new("touch_refreshes_mtime", Category::Writable, touch_refreshes_mtime),
    Scenario::new("touch_no_such_block", Category::Any, touch_no_such_block),
    Scenario::new("mtime_no_such_block", Category::Any, mtime_no_such_block),
    Scenario::new("index_to", Category::Any, index_to),
    Scenario::new("delete_new_block", Category::Writable, delete_new_block),
    Scenario::new("delete_old_block", Category::Writable, delete_old_block),
    Scenario::new("delete_no_such_block", Category::Any, delete_no_such_block),
    Scenario::new("status", Category::Any, status),
    Scenario::new("string", Category::Any, string),
    Scenario::new("update_read_only", Category::ReadOnly, update_read_only),
    Scenario::new("release_buffers", Category::Any, release_buffers),
    Scenario::new("get_concurrent", Category::Concurrent { writable_only: false }, get_concurrent),
    Scenario::new("put_concurrent", Category::Concurrent { writable_only: true }, put_concurrent),
    Scenario::new(
        "put_same_content_concurrent",
        Category::Concurrent { writable_only: true },
        put_same_content_concurrent,
    ),
];

// =============================================================================
// Helpers
// =============================================================================

fn text(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn setup(v: &dyn TestableVolume, hash: &str, block: &[u8]) -> Check {
    v.put_raw(hash, block)
        .map_err(|e| fail!("setup: put_raw {}: {}", hash, e))
}

fn setup_all(v: &dyn TestableVolume) -> Check {
    for (hash, block) in ALL_BLOCKS {
        setup(v, hash, block)?;
    }
    Ok(())
}

/// Get `hash` and require exactly `expected`
fn expect_content(v: &dyn TestableVolume, hash: &str, expected: &[u8]) -> Check {
    let buf = v.get(hash).map_err(|e| fail!("get {}: {}", hash, e))?;
    ensure!(
        &buf[..] == expected,
        "get {}: expected {:?}, got {:?}",
        hash,
        text(expected),
        text(&buf)
    );
    buf.release();
    Ok(())
}

fn put(v: &dyn TestableVolume, hash: &str, block: &[u8]) -> Check {
    v.put(hash, block)
        .map_err(|e| fail!("put {} {:?}: {}", hash, text(block), e))
}

/// Run one closure per item on its own thread, join all, and merge failures
fn run_concurrently<T, F>(items: &[T], f: F) -> Check
where
    T: Sync,
    F: Fn(&T) -> Check + Sync,
{
    let results = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = items
            .iter()
            .map(|item| {
                let f = &f;
                s.spawn(move |_| f(item))
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(fail!("worker panicked"))))
            .collect::<Vec<_>>()
    })
    .map_err(|_| fail!("worker panicked"))?;

    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|r| r.err().map(|Failure(msg)| msg))
        .collect();

    ensure!(failures.is_empty(), "{}", failures.join("; "));
    Ok(())
}

// =============================================================================
// Any Volume
// =============================================================================

/// Stored content comes back unchanged
fn get(v: &dyn TestableVolume) -> Check {
    setup(v, TEST_HASH, TEST_BLOCK)?;
    expect_content(v, TEST_HASH, TEST_BLOCK)
}

fn get_no_such_block(v: &dyn TestableVolume) -> Check {
    match v.get(TEST_HASH_2) {
        Ok(buf) => Err(fail!("got {:?} for a block never stored", text(&buf))),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(fail!("expected NotFound, got {}", e)),
    }
}

fn compare_same_content(v: &dyn TestableVolume) -> Check {
    setup(v, TEST_HASH, TEST_BLOCK)?;
    v.compare(TEST_HASH, TEST_BLOCK)
        .map_err(|e| fail!("compare with identical content: {}", e))
}

/// Caller's bytes differ from the stored bytes (collision)
fn compare_with_different_content(v: &dyn TestableVolume) -> Check {
    setup(v, TEST_HASH, TEST_BLOCK)?;
    match v.compare(TEST_HASH, BAD_BLOCK) {
        Ok(()) => Err(fail!("compare succeeded on a collision")),
        Err(e) if e.is_mismatch() => Ok(()),
        Err(e) => Err(fail!("expected Mismatch, got {}", e)),
    }
}

/// Stored bytes do not match their hash (corruption)
fn compare_with_bad_data(v: &dyn TestableVolume) -> Check {
    setup(v, TEST_HASH, BAD_BLOCK)?;
    match v.compare(TEST_HASH, TEST_BLOCK) {
        Ok(()) => Err(fail!("compare succeeded on corrupt data")),
        Err(e) if e.is_mismatch() => Ok(()),
        Err(e) => Err(fail!("expected Mismatch, got {}", e)),
    }
}

fn compare_no_such_block(v: &dyn TestableVolume) -> Check {
    match v.compare(TEST_HASH, TEST_BLOCK) {
        Ok(()) => Err(fail!("compare succeeded for a block never stored")),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(fail!("expected NotFound, got {}", e)),
    }
}

fn touch_no_such_block(v: &dyn TestableVolume) -> Check {
    match v.touch(TEST_HASH) {
        Ok(()) => Err(fail!("touch succeeded for a block never stored")),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) if e.is_read_only() && !v.writable() => Ok(()),
        Err(e) => Err(fail!("expected NotFound, got {}", e)),
    }
}

fn mtime_no_such_block(v: &dyn TestableVolume) -> Check {
    match v.mtime(NO_SUCH_HASH) {
        Ok(t) => Err(fail!("got mtime {:?} for a block never stored", t)),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(fail!("expected NotFound, got {}", e)),
    }
}

/// Listing with no prefix, matching prefixes, and unmatched prefixes
fn index_to(v: &dyn TestableVolume) -> Check {
    setup_all(v)?;

    let listing = |prefix: &str| -> Result<Vec<u8>, Failure> {
        let mut out = Vec::new();
        v.index_to(prefix, &mut out)
            .map_err(|e| fail!("index_to {:?}: {}", prefix, e))?;
        Ok(out)
    };

    let raw = listing("")?;
    ensure!(raw.ends_with(b"\n"), "index is not newline-terminated: {:?}", text(&raw));
    let mut entries =
        parse_index(&raw[..]).map_err(|e| fail!("unparseable index {:?}: {}", text(&raw), e))?;
    entries.sort();

    let hashes: Vec<&str> = entries.iter().map(|e| e.hash.as_str()).collect();
    ensure!(
        hashes == [TEST_HASH, TEST_HASH_3, TEST_HASH_2],
        "index for empty prefix lists {:?}",
        hashes
    );

    for (hash, block) in ALL_BLOCKS {
        let mtime = v.mtime(hash).map_err(|e| fail!("mtime {}: {}", hash, e))?;
        let expected = IndexEntry::new(hash, block.len() as u64, mtime);
        ensure!(
            entries.contains(&expected),
            "index has no line {:?}; got {:?}",
            expected.to_string(),
            text(&raw)
        );
    }

    for prefix in ["f", "f15", "f15ac"] {
        let raw = listing(prefix)?;
        let entries = parse_index(&raw[..])
            .map_err(|e| fail!("unparseable index {:?}: {}", text(&raw), e))?;
        ensure!(
            entries.len() == 1 && entries[0].hash == TEST_HASH_2 && raw.ends_with(b"\n"),
            "index for prefix {:?} is {:?}",
            prefix,
            text(&raw)
        );
    }

    for prefix in ["zero", "zip", "zilch"] {
        let raw = listing(prefix)?;
        ensure!(
            raw.is_empty(),
            "expected empty index for prefix {:?}, got {:?}",
            prefix,
            text(&raw)
        );
    }

    Ok(())
}

fn delete_no_such_block(v: &dyn TestableVolume) -> Check {
    match v.delete(TEST_HASH_2) {
        Ok(()) => Err(fail!("delete succeeded for a block never stored")),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) if e.is_read_only() && !v.writable() => Ok(()),
        Err(e) => Err(fail!("expected NotFound, got {}", e)),
    }
}

fn status(v: &dyn TestableVolume) -> Check {
    let status = v.status().map_err(|e| fail!("status: {}", e))?;
    ensure!(status.device_num != 0, "uninitialized device_num in {:?}", status);
    ensure!(status.bytes_free != 0, "uninitialized bytes_free in {:?}", status);
    ensure!(status.bytes_used != 0, "uninitialized bytes_used in {:?}", status);
    Ok(())
}

fn string(v: &dyn TestableVolume) -> Check {
    let id = v.to_string();
    ensure!(!id.is_empty(), "empty display identifier");
    ensure!(id == v.to_string(), "display identifier changed between calls");
    Ok(())
}

/// Every Get's buffer goes back to the pool, including on error paths.
/// Assumes nothing else is leasing from the same pool meanwhile.
fn release_buffers(v: &dyn TestableVolume) -> Check {
    let pool = v.buffer_pool();
    let before = pool.leased();

    setup_all(v)?;
    for (hash, block) in ALL_BLOCKS {
        expect_content(v, hash, block)?;
    }
    {
        let held = v.get(TEST_HASH).map_err(|e| fail!("get: {}", e))?;
        ensure!(
            pool.leased() == before + 1,
            "expected {} leased buffers while holding one, found {}",
            before + 1,
            pool.leased()
        );
        drop(held);
    }
    let _ = v.get(NO_SUCH_HASH);
    let _ = v.compare(TEST_HASH, BAD_BLOCK);

    ensure!(
        pool.leased() == before,
        "{} buffers leaked",
        pool.leased().saturating_sub(before)
    );
    Ok(())
}

// =============================================================================
// Writable Volume
// =============================================================================

/// Idempotent Put
fn put_block_with_same_content(v: &dyn TestableVolume) -> Check {
    put(v, TEST_HASH, TEST_BLOCK)?;
    put(v, TEST_HASH, TEST_BLOCK)?;
    expect_content(v, TEST_HASH, TEST_BLOCK)
}

/// Put of different content may overwrite or fail, but never corrupt
fn put_block_with_different_content(v: &dyn TestableVolume) -> Check {
    put(v, TEST_HASH, TEST_BLOCK)?;

    let put_result = v.put(TEST_HASH, TEST_BLOCK_2);
    let get_result = v.get(TEST_HASH);

    match (put_result, get_result) {
        (Ok(()), Ok(buf)) => {
            ensure!(
                &buf[..] == TEST_BLOCK_2,
                "put succeeded but get returned {:?}, expected {:?}",
                text(&buf),
                text(TEST_BLOCK_2)
            );
        }
        (Ok(()), Err(e)) => {
            return Err(fail!("put succeeded but get failed: {}", e));
        }
        (Err(_), Ok(buf)) => {
            ensure!(
                &buf[..] == TEST_BLOCK || &buf[..] == TEST_BLOCK_2,
                "put failed but get returned {:?}, which is neither {:?} nor {:?}",
                text(&buf),
                text(TEST_BLOCK),
                text(TEST_BLOCK_2)
            );
        }
        (Err(_), Err(e)) => {
            ensure!(e.is_not_found(), "put failed and get failed with {}", e);
        }
    }
    Ok(())
}

fn put_multiple_blocks(v: &dyn TestableVolume) -> Check {
    for (hash, block) in ALL_BLOCKS {
        put(v, hash, block)?;
    }
    for (hash, block) in ALL_BLOCKS {
        expect_content(v, hash, block)?;
    }
    Ok(())
}

/// Put of an existing block advances its mtime
fn put_and_touch(v: &dyn TestableVolume) -> Check {
    put(v, TEST_HASH, TEST_BLOCK)?;

    // Verify t0 < threshold <= t1
    let threshold = SystemTime::now() - MTIME_GRANULARITY;

    // Far enough back to tell "unchanged" apart from "coarse granularity"
    v.touch_with_date(TEST_HASH, SystemTime::now() - Duration::from_secs(20))
        .map_err(|e| fail!("touch_with_date: {}", e))?;

    let t0 = v.mtime(TEST_HASH).map_err(|e| fail!("mtime: {}", e))?;
    ensure!(t0 < threshold, "setting mtime failed: {:?} is not before {:?}", t0, threshold);

    put(v, TEST_HASH, TEST_BLOCK)?;

    let t1 = v.mtime(TEST_HASH).map_err(|e| fail!("mtime: {}", e))?;
    ensure!(t1 >= threshold, "t1 {:?} should be >= threshold {:?} after put", t1, threshold);
    Ok(())
}

/// Touch advances mtime to at least the moment the call started
fn touch_refreshes_mtime(v: &dyn TestableVolume) -> Check {
    put(v, TEST_HASH, TEST_BLOCK)?;
    v.touch_with_date(TEST_HASH, SystemTime::now() - Duration::from_secs(20))
        .map_err(|e| fail!("touch_with_date: {}", e))?;

    let start = SystemTime::now();
    v.touch(TEST_HASH).map_err(|e| fail!("touch: {}", e))?;

    let t1 = v.mtime(TEST_HASH).map_err(|e| fail!("mtime: {}", e))?;
    ensure!(
        t1 + MTIME_GRANULARITY >= start,
        "mtime {:?} is before touch started at {:?}",
        t1,
        start
    );
    Ok(())
}

/// Delete of a block younger than 2 × TTL succeeds and keeps the data
fn delete_new_block(v: &dyn TestableVolume) -> Check {
    put(v, TEST_HASH, TEST_BLOCK)?;
    v.delete(TEST_HASH).map_err(|e| fail!("delete: {}", e))?;
    expect_content(v, TEST_HASH, TEST_BLOCK)
}

/// Delete of a block at least 2 × TTL old removes it
fn delete_old_block(v: &dyn TestableVolume) -> Check {
    put(v, TEST_HASH, TEST_BLOCK)?;

    let policy = DeletionPolicy::new(v.signature_ttl());
    v.touch_with_date(TEST_HASH, policy.expired_as_of(SystemTime::now()))
        .map_err(|e| fail!("touch_with_date: {}", e))?;

    v.delete(TEST_HASH).map_err(|e| fail!("delete: {}", e))?;

    match v.get(TEST_HASH) {
        Ok(buf) => Err(fail!("deleted block still readable: {:?}", text(&buf))),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(fail!("expected NotFound after delete, got {}", e)),
    }
}

// =============================================================================
// Read-only Volume
// =============================================================================

/// Mutations fail with ReadOnly and leave nothing changed; reads work
fn update_read_only(v: &dyn TestableVolume) -> Check {
    setup(v, TEST_HASH, TEST_BLOCK)?;
    let mtime_before = v.mtime(TEST_HASH).map_err(|e| fail!("mtime: {}", e))?;

    expect_content(v, TEST_HASH, TEST_BLOCK)?;
    v.compare(TEST_HASH, TEST_BLOCK)
        .map_err(|e| fail!("compare on read-only volume: {}", e))?;
    let mut index = Vec::new();
    v.index_to("", &mut index)
        .map_err(|e| fail!("index_to on read-only volume: {}", e))?;
    v.status().map_err(|e| fail!("status on read-only volume: {}", e))?;

    let expect_read_only = |op: &str, result: crate::Result<()>| -> Check {
        match result {
            Ok(()) => Err(fail!("{} succeeded on a read-only volume", op)),
            Err(e) if e.is_read_only() => Ok(()),
            Err(e) => Err(fail!("{}: expected ReadOnly, got {}", op, e)),
        }
    };

    expect_read_only("put of a new block", v.put(TEST_HASH_2, TEST_BLOCK_2))?;
    ensure!(
        v.get(TEST_HASH_2).is_err(),
        "block is readable after its put was refused"
    );

    expect_read_only("touch", v.touch(TEST_HASH))?;
    expect_read_only("delete", v.delete(TEST_HASH))?;
    expect_read_only("put of an existing block", v.put(TEST_HASH, TEST_BLOCK))?;

    expect_content(v, TEST_HASH, TEST_BLOCK)?;
    let mtime_after = v.mtime(TEST_HASH).map_err(|e| fail!("mtime: {}", e))?;
    ensure!(
        mtime_before == mtime_after,
        "mtime changed from {:?} to {:?}",
        mtime_before,
        mtime_after
    );
    Ok(())
}

// =============================================================================
// Concurrency
// =============================================================================

fn get_concurrent(v: &dyn TestableVolume) -> Check {
    setup_all(v)?;
    run_concurrently(&ALL_BLOCKS, |(hash, block)| expect_content(v, hash, block))
}

fn put_concurrent(v: &dyn TestableVolume) -> Check {
    run_concurrently(&ALL_BLOCKS, |(hash, block)| put(v, hash, block))?;

    // Double check that we actually wrote the blocks we expected to write
    for (hash, block) in ALL_BLOCKS {
        expect_content(v, hash, block)?;
    }
    Ok(())
}

/// Racing Puts of identical content all succeed
fn put_same_content_concurrent(v: &dyn TestableVolume) -> Check {
    let writers = [(TEST_HASH, TEST_BLOCK); 3];
    run_concurrently(&writers, |(hash, block)| put(v, hash, block))?;
    expect_content(v, TEST_HASH, TEST_BLOCK)?;

    let mtime = v.mtime(TEST_HASH).map_err(|e| fail!("mtime: {}", e))?;
    ensure!(
        unix_seconds(mtime) + 60 >= unix_seconds(SystemTime::now()),
        "mtime {:?} was not refreshed",
        mtime
    );
    Ok(())
}
