//! Locator hash validation
//!
//! Volumes never compute digests; they only check that a locator has the
//! shape of one: `LOCATOR_LEN` lowercase hex characters.

use crate::error::{Result, VolumeError};

/// Hex characters in a locator (a 128-bit digest)
pub const LOCATOR_LEN: usize = 32;

/// Validated locator hash, borrowed from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator<'a>(&'a str);

impl<'a> Locator<'a> {
    pub fn parse(hash: &'a str) -> Result<Self> {
        if is_valid(hash) {
            Ok(Self(hash))
        } else {
            Err(VolumeError::InvalidLocator(hash.to_string()))
        }
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }

    /// First three hex characters; used to fan blocks out across subdirectories
    pub fn prefix(&self) -> &'a str {
        &self.0[..3]
    }
}

impl std::fmt::Display for Locator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

pub fn is_valid(hash: &str) -> bool {
    hash.len() == LOCATOR_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
