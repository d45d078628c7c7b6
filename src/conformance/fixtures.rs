//! Fixed blocks and locators shared by the conformance scenarios
//!
//! Sorted by hash the three fixtures read `TEST_HASH < TEST_HASH_3 <
//! TEST_HASH_2`, and `TEST_HASH_2` is the only one starting with `f`.
//! The index scenario depends on both facts.

pub const TEST_BLOCK: &[u8] = b"The quick brown fox jumps over the lazy dog.";
pub const TEST_HASH: &str = "e4d909c290d0fb1ca068ffaddf22cbd0";

pub const TEST_BLOCK_2: &[u8] = b"Pack my box with five dozen liquor jugs.";
pub const TEST_HASH_2: &str = "f15ac516f788aec4f30932ffb6395c39";

pub const TEST_BLOCK_3: &[u8] = b"Now is the time for all good men to come to the aid of their country.";
pub const TEST_HASH_3: &str = "eed29bbffbc2dbe5e5ee0bb71888e61f";

/// Content that does not match any fixture hash
pub const BAD_BLOCK: &[u8] = b"baddata";

/// Well-formed locator never stored by any scenario
pub const NO_SUCH_HASH: &str = "12345678901234567890123456789012";

/// All three fixtures as (hash, block) pairs
pub const ALL_BLOCKS: [(&str, &[u8]); 3] = [
    (TEST_HASH, TEST_BLOCK),
    (TEST_HASH_2, TEST_BLOCK_2),
    (TEST_HASH_3, TEST_BLOCK_3),
];
