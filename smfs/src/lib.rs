//! SMFS - Stream Master File System.
//!
//! A user-space filesystem that exposes a remote media catalog as a
//! browsable directory tree. Directory structure comes from a REST
//! catalog source; per-channel live streams appear as read-only `.ts`
//! files whose bytes are produced on demand by HTTP streaming, next to
//! `.m3u`/`.xml` playlists and `.strm` URL descriptors. User-created
//! files are persisted to a local cache directory.
//!
//! # Architecture
//!
//! - [`catalog`] - path → node map, inode allocation, snapshot rebuilds
//! - [`stream`] - reader-counted HTTP sessions feeding bounded pipes
//! - [`pipe`] - the producer/consumer byte pipe under every stream
//! - [`ops`] - filesystem operation handlers (host-agnostic)
//! - [`fuse`] - the `fuser` adapter and mount helper
//! - [`refresh`] - push-channel driven catalog refresh
//! - [`source`] - REST catalog source
//! - [`storage`] - cache-directory passthrough for user files
//! - [`shutdown`] - cooperative process-wide stop flag

pub mod catalog;
pub mod config;
pub mod error;
pub mod fuse;
pub mod logging;
pub mod ops;
pub mod pipe;
pub mod refresh;
pub mod shutdown;
pub mod source;
pub mod storage;
pub mod stream;

/// Version of the SMFS library and CLI, synchronized across the
/// workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
