//! VFS operations trait.
//!
//! Path-based, like the wire protocol. Inode bookkeeping lives in the kernel
//! bridge, not here.

use async_trait::async_trait;

use crate::error::{VfsError, VfsResult};
use crate::types::{DirEntry, FileAttr};

/// Core VFS operations trait.
///
/// Paths are absolute remote paths (`/`, `/dir/file`). Reads go through a
/// handle returned by [`VfsOps::open`], which holds the whole file in memory.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn getattr(&self, path: &str) -> VfsResult<FileAttr>;

    /// Read directory entries, `.` and `..` first.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>>;

    /// Fetch a file and return a handle to its contents.
    async fn open(&self, path: &str) -> VfsResult<u64>;

    /// Read up to `size` bytes at `offset` from an open handle.
    ///
    /// Returns fewer bytes at end of file. Never touches the network.
    fn read(&self, handle: u64, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Done with a handle.
    fn release(&self, handle: u64) -> VfsResult<()>;

    // ========================================================================
    // Writing
    // ========================================================================

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let _ = (path, offset, data);
        Err(VfsError::unsupported("write"))
    }

    async fn create(&self, path: &str, mode: u32) -> VfsResult<FileAttr> {
        let _ = (path, mode);
        Err(VfsError::unsupported("create"))
    }

    async fn mkdir(&self, path: &str, mode: u32) -> VfsResult<FileAttr> {
        let _ = (path, mode);
        Err(VfsError::unsupported("mkdir"))
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::unsupported("unlink"))
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::unsupported("rmdir"))
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let _ = (from, to);
        Err(VfsError::unsupported("rename"))
    }

    /// Change size or attributes.
    async fn setattr(&self, path: &str, size: Option<u64>) -> VfsResult<FileAttr> {
        let _ = (path, size);
        Err(VfsError::unsupported("setattr"))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Tear down whatever backs the filesystem. Must be idempotent.
    async fn shutdown(&self) -> VfsResult<()> {
        Ok(())
    }
}
