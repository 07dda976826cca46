//! Inode ↔ path mapping for the kernel bridge.
//!
//! The kernel addresses everything by inode; the server only understands
//! paths. Inodes are handed out on first sight and never reused.

use std::collections::HashMap;

/// Inode number of the mount root.
pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
pub struct InodeTable {
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: ROOT_INODE + 1,
        };
        table.paths.insert(ROOT_INODE, "/".to_string());
        table.inodes.insert("/".to_string(), ROOT_INODE);
        table
    }

    /// Path for an inode.
    pub fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Inode for a path, allocating one if needed.
    pub fn get_or_insert(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inodes.insert(path.to_string(), ino);
        ino
    }

    /// Inode of the directory containing `ino`. The root is its own parent.
    pub fn parent(&mut self, ino: u64) -> u64 {
        match self.path(ino).map(parent_path) {
            Some(parent) => {
                let parent = parent.to_string();
                self.get_or_insert(&parent)
            }
            None => ROOT_INODE,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Join a directory path and an entry name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Directory part of an absolute path.
pub fn parent_path(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}
