//! Buffer Pool Module
//!
//! Reusable fixed-capacity read buffers shared by every volume in the process.
//!
//! ## Responsibilities
//! - Bound the number of block-sized allocations alive at once
//! - Hand out each buffer to exactly one holder at a time
//! - Take buffers back exactly once, on every exit path
//!
//! ## Ownership Protocol
//! ```text
//!   BufferPool::get(len) ──▶ PooledBuffer (move-only, derefs to [u8; len])
//!                                 │
//!                 Drop / release()│
//!                                 ▼
//!                     back on the pool's free list
//! ```
//! A caller that never drops its `PooledBuffer` keeps one lease out of the
//! pool; other holders are unaffected.

mod pool;

pub use pool::{BufferPool, PooledBuffer};
