//! # blockvol
//!
//! Storage contract for content-addressed block volumes, with:
//! - A `Volume` trait every backend implements
//! - In-memory and directory backends
//! - A bounded pool of read buffers
//! - A conformance suite any backend can be run against
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Block server / CLI                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  get / put / compare / touch / delete
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     dyn Volume                               │
//! └───────┬──────────────────────────────────────┬──────────────┘
//!         │                                      │
//!         ▼                                      ▼
//!  ┌─────────────┐   leases buffers      ┌──────────────┐
//!  │   Volume    │ ────────────────────► │  BufferPool  │
//!  │  backends   │                       │ (bounded)    │
//!  └──────┬──────┘                       └──────────────┘
//!         │ index lines, status
//!         ▼
//!  ┌─────────────┐        ┌──────────────────────┐
//!  │ IndexEntry  │        │  ConformanceSuite    │
//!  │VolumeStatus │        │ (per-scenario volume)│
//!  └─────────────┘        └──────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod buffer;
pub mod conformance;
pub mod index;
pub mod locator;
pub mod policy;
pub mod status;
pub mod volume;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use buffer::{BufferPool, PooledBuffer};
pub use config::{BackendKind, CollisionPolicy, Config, VolumeConfig};
pub use error::{Result, VolumeError};
pub use index::IndexEntry;
pub use policy::DeletionPolicy;
pub use status::VolumeStatus;
pub use volume::{open_volume, DirectoryVolume, MemoryVolume, TestableVolume, Volume};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blockvol
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
