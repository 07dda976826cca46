//! Open file table.
//!
//! `open` pulls the whole file over the wire; reads are served from memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use blitzfs_client::RemoteFile;
use dashmap::DashMap;

/// A fetched file.
#[derive(Debug)]
pub struct OpenFile {
    /// Remote path that was opened.
    pub path: String,
    /// Name reported by the server.
    pub name: String,
    pub size: u64,
    data: Vec<u8>,
}

impl OpenFile {
    /// Bytes in `[offset, offset + size)`, clamped to the payload.
    pub fn slice(&self, offset: u64, size: u32) -> &[u8] {
        let len = self.data.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(size as usize).min(len);
        &self.data[start..end]
    }
}

/// Handle id → payload. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct HandleTable {
    next_id: AtomicU64,
    files: DashMap<u64, Arc<OpenFile>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            files: DashMap::new(),
        }
    }

    /// Store a fetched file under a fresh handle id.
    pub fn insert(&self, path: &str, file: RemoteFile) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.files.insert(
            id,
            Arc::new(OpenFile {
                path: path.to_string(),
                name: file.name,
                size: file.size,
                data: file.data,
            }),
        );
        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<OpenFile>> {
        self.files.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: u64) -> Option<Arc<OpenFile>> {
        self.files.remove(&id).map(|(_, file)| file)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
