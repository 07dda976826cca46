//! Filesystem backed by a blitz server.
//!
//! All protocol traffic shares one interactive channel, so the protocol
//! client sits behind an async mutex held for a whole command/response
//! exchange. Cache hits never take that lock.

use async_trait::async_trait;
use blitzfs_client::{ProtocolClient, ProtocolError, SshClient};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CachePolicy, MountCache};
use crate::error::{VfsError, VfsResult};
use crate::handles::HandleTable;
use crate::ops::VfsOps;
use crate::types::{DirEntry, FileAttr};

/// Read-only view of the server's tree.
pub struct RemoteFs<S> {
    client: Mutex<ProtocolClient<S>>,
    transport: Mutex<Option<SshClient>>,
    policy: CachePolicy,
    cache: MountCache,
    handles: HandleTable,
}

impl<S> RemoteFs<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a protocol client that has already seen the first prompt.
    pub fn new(client: ProtocolClient<S>, policy: CachePolicy) -> Self {
        Self {
            client: Mutex::new(client),
            transport: Mutex::new(None),
            policy,
            cache: MountCache::new(),
            handles: HandleTable::new(),
        }
    }

    /// Hand over the SSH transport so `shutdown` can close it after the
    /// channel.
    pub fn with_transport(mut self, transport: SshClient) -> Self {
        self.transport = Mutex::new(Some(transport));
        self
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn cache(&self) -> &MountCache {
        &self.cache
    }

    /// Number of payloads currently held in memory.
    pub fn open_files(&self) -> usize {
        self.handles.len()
    }

    fn caching(&self) -> bool {
        self.policy.is_enabled()
    }

    /// Close the channel stream, then the transport. Idempotent.
    pub async fn close(&self) -> VfsResult<()> {
        {
            let mut client = self.client.lock().await;
            if !client.is_closed() {
                if let Err(e) = client.shutdown().await {
                    debug!(error = %e, "channel shutdown failed");
                }
            }
        }

        let transport = self.transport.lock().await.take();
        if let Some(mut transport) = transport {
            transport
                .disconnect()
                .await
                .map_err(|e| VfsError::other(e.to_string()))?;
            info!("session closed");
        }
        Ok(())
    }
}

/// `/`, `.` and `..` never reach the server.
fn is_root(path: &str) -> bool {
    matches!(path, "" | "/" | "." | "..")
}

/// Final segment of a server-reported path, ignoring a trailing `/`.
fn final_segment(raw: &str) -> Option<&str> {
    raw.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

#[async_trait]
impl<S> VfsOps for RemoteFs<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn getattr(&self, path: &str) -> VfsResult<FileAttr> {
        if is_root(path) {
            return Ok(FileAttr::root());
        }

        let cached = if self.caching() { self.cache.stat(path) } else { None };
        let stat = match cached {
            Some(stat) => stat,
            None => {
                let result = self.client.lock().await.stat(path).await;
                match result {
                    Ok(stat) => {
                        if self.caching() {
                            self.cache.put_stat(path, stat.clone());
                        }
                        stat
                    }
                    Err(e) => {
                        warn!(path, error = %e, "stat failed");
                        return Err(VfsError::not_found(path));
                    }
                }
            }
        };

        FileAttr::from_stat(&stat).ok_or_else(|| {
            warn!(path, tag = stat.kind.tag(), "unknown entry type");
            VfsError::not_found(path)
        })
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let mut entries = vec![DirEntry::directory("."), DirEntry::directory("..")];

        let cached = if self.caching() { self.cache.listing(path) } else { None };
        let listing = match cached {
            Some(listing) => listing,
            None => {
                let result = self.client.lock().await.list(path).await;
                match result {
                    Ok(listing) => {
                        if self.caching() {
                            self.cache.put_listing(path, listing.clone());
                        }
                        listing
                    }
                    Err(e) => {
                        warn!(path, error = %e, "list failed, serving empty directory");
                        Vec::new()
                    }
                }
            }
        };

        entries.extend(
            listing
                .iter()
                .filter_map(|raw| final_segment(raw))
                .map(DirEntry::unknown),
        );
        Ok(entries)
    }

    async fn open(&self, path: &str) -> VfsResult<u64> {
        if self.caching() {
            if let Some(id) = self.cache.handle(path) {
                return Ok(id);
            }
        }

        let mut client = self.client.lock().await;
        // Another open of the same path may have finished while we waited.
        if self.caching() {
            if let Some(id) = self.cache.handle(path) {
                return Ok(id);
            }
        }

        let file = client.get(path).await.map_err(|e| match e {
            ProtocolError::Remote(text) => {
                warn!(path, error = %text, "get failed");
                VfsError::not_found(path)
            }
            other => VfsError::Protocol(other),
        })?;
        drop(client);

        let size = file.size;
        let id = self.handles.insert(path, file);
        if self.caching() {
            self.cache.put_handle(path, id);
        }
        debug!(path, handle = id, size, "opened");
        Ok(id)
    }

    fn read(&self, handle: u64, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let file = self.handles.get(handle).ok_or(VfsError::BadHandle(handle))?;
        Ok(file.slice(offset, size).to_vec())
    }

    fn release(&self, handle: u64) -> VfsResult<()> {
        if self.caching() {
            return Ok(());
        }
        if let Some(file) = self.handles.remove(handle) {
            debug!(handle, path = %file.path, name = %file.name, size = file.size, "released");
        }
        Ok(())
    }

    async fn shutdown(&self) -> VfsResult<()> {
        self.close().await
    }
}
