//! Block index listing
//!
//! `Volume::index_to` writes one line per stored block:
//!
//! ```text
//! <hex-hash>+<decimal-size> <decimal-unix-seconds>\n
//! ```
//!
//! Lines come in no particular order. Upstream scrubbing and replication
//! audits parse this format, so its shape must not change.

use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};

/// One line of an index listing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexEntry {
    pub hash: String,
    pub size: u64,
    /// Modification time in whole seconds since the Unix epoch
    pub mtime: u64,
}

impl IndexEntry {
    pub fn new(hash: impl Into<String>, size: u64, mtime: SystemTime) -> Self {
        Self {
            hash: hash.into(),
            size,
            mtime: unix_seconds(mtime),
        }
    }

    /// Write this entry as a newline-terminated index line
    pub fn write_line(&self, sink: &mut dyn Write) -> Result<()> {
        writeln!(sink, "{}", self)?;
        Ok(())
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{} {}", self.hash, self.size, self.mtime)
    }
}

impl FromStr for IndexEntry {
    type Err = VolumeError;

    fn from_str(line: &str) -> Result<Self> {
        let malformed = || VolumeError::IndexFormat(line.to_string());

        let (locator, mtime) = line.split_once(' ').ok_or_else(malformed)?;
        let (hash, size) = locator.split_once('+').ok_or_else(malformed)?;

        if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }

        Ok(Self {
            hash: hash.to_string(),
            size: size.parse().map_err(|_| malformed())?,
            mtime: mtime.parse().map_err(|_| malformed())?,
        })
    }
}

/// Parse a complete index listing. Blank lines are skipped.
pub fn parse_index<R: BufRead>(reader: R) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        entries.push(line.parse()?);
    }
    Ok(entries)
}

/// Seconds since the Unix epoch; pre-epoch times clamp to zero
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
