//! Volume status snapshot

use serde::{Deserialize, Serialize};

/// Best-effort, live space accounting for one volume.
/// Computed on every call, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStatus {
    /// Identifier of the underlying device
    pub device_num: u64,

    /// Bytes available for new blocks
    pub bytes_free: u64,

    /// Bytes consumed on the device
    pub bytes_used: u64,
}

impl VolumeStatus {
    /// True when every field is populated
    pub fn is_populated(&self) -> bool {
        self.device_num != 0 && self.bytes_free != 0 && self.bytes_used != 0
    }
}
