//! Read-only virtual filesystem over the blitz line protocol.
//!
//! Key components:
//!
//! - [`VfsOps`] - Path-based filesystem operations
//! - [`RemoteFs`] - Serves a blitz server's tree through one protocol client
//! - [`MountCache`] - Mount-lifetime caches for listings, stats and handles
//! - [`FuseBridge`] - Exposes any [`VfsOps`] to the kernel through fuser
//!
//! ## Design Decisions
//!
//! - **Path-based, inodes at the edge**: `VfsOps` speaks paths like the
//!   wire protocol. The FUSE bridge keeps the inode ↔ path table.
//! - **Whole-file handles**: `open` downloads the file once. Reads are
//!   served from memory and never block on the channel.
//! - **No invalidation**: with caching on, results live as long as the
//!   mount.

pub mod cache;
mod error;
pub mod fuse;
mod handles;
mod inode;
mod ops;
mod remote;
mod types;

pub use cache::{CachePolicy, MountCache};
pub use error::{VfsError, VfsResult};
pub use fuse::{CACHED_TTL, FuseBridge, UNCACHED_TTL, mount_options, spawn_mount};
pub use handles::{HandleTable, OpenFile};
pub use inode::{InodeTable, ROOT_INODE};
pub use ops::VfsOps;
pub use remote::RemoteFs;
pub use types::{DirEntry, FileAttr, FileType};
