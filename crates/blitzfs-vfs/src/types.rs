//! Attribute and directory records.
//!
//! Path-based records synthesized from protocol responses. The server only
//! reports a type tag and a size, so permissions and timestamps are filled
//! in locally.

use std::time::SystemTime;

use blitzfs_client::{EntryKind, StatResult};

/// Size reported for the root and the `.`/`..` entries.
pub const ROOT_DIR_SIZE: u64 = 36;

/// Permissions for directories (rwxr-xr-x).
pub const DIR_PERM: u32 = 0o755;

/// Permissions for files (rw-r--r--).
pub const FILE_PERM: u32 = 0o644;

/// What a path is. Only the two kinds the server can report are mountable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Map a `stat` type tag. Unknown tags have no local equivalent.
    pub fn from_entry_kind(kind: &EntryKind) -> Option<Self> {
        match kind {
            EntryKind::Directory => Some(FileType::Directory),
            EntryKind::File => Some(FileType::File),
            EntryKind::Other(_) => None,
        }
    }
}

/// Attributes served to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    /// Size as reported by `stat`.
    pub size: u64,
    pub kind: FileType,
    pub perm: u32,
    pub mtime: SystemTime,
    pub atime: SystemTime,
    pub ctime: SystemTime,
    pub nlink: u32,
}

impl FileAttr {
    /// Attributes for a regular file.
    pub fn file(size: u64) -> Self {
        Self::new(FileType::File, size, FILE_PERM, 1)
    }

    /// Attributes for a directory.
    pub fn directory(size: u64) -> Self {
        Self::new(FileType::Directory, size, DIR_PERM, 2)
    }

    /// The fixed record served for `/`, `.` and `..`.
    pub fn root() -> Self {
        Self::directory(ROOT_DIR_SIZE)
    }

    /// Attributes for a `stat` response, if its type is one we can mount.
    pub fn from_stat(stat: &StatResult) -> Option<Self> {
        FileType::from_entry_kind(&stat.kind).map(|kind| match kind {
            FileType::File => Self::file(stat.size),
            FileType::Directory => Self::directory(stat.size),
        })
    }

    fn new(kind: FileType, size: u64, perm: u32, nlink: u32) -> Self {
        // The server has no timestamps; everything looks freshly touched.
        let now = SystemTime::now();
        Self {
            size,
            kind,
            perm,
            mtime: now,
            atime: now,
            ctime: now,
            nlink,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// One name in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Final path segment only.
    pub name: String,
    /// Entry type, when known without another round trip.
    pub kind: Option<FileType>,
}

impl DirEntry {
    /// An entry whose type has not been looked up.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
        }
    }

    /// An entry known to be a directory (`.` and `..`).
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(FileType::Directory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_attr_constructors() {
        let file = FileAttr::file(1024);
        assert!(file.is_file());
        assert_eq!(file.size, 1024);
        assert_eq!(file.perm, 0o644);
        assert_eq!(file.nlink, 1);

        let dir = FileAttr::directory(4096);
        assert!(dir.is_dir());
        assert_eq!(dir.perm, 0o755);

        let root = FileAttr::root();
        assert!(root.is_dir());
        assert_eq!(root.size, ROOT_DIR_SIZE);
    }

    #[test]
    fn test_from_stat() {
        let stat = StatResult {
            kind: EntryKind::File,
            size: 5,
            name: "f".into(),
        };
        assert_eq!(FileAttr::from_stat(&stat).unwrap().size, 5);

        let odd = StatResult {
            kind: EntryKind::Other("PIPE".into()),
            size: 0,
            name: "p".into(),
        };
        assert!(FileAttr::from_stat(&odd).is_none());
    }

    #[test]
    fn test_dir_entry() {
        let dot = DirEntry::directory(".");
        assert_eq!(dot.kind, Some(FileType::Directory));
        assert_eq!(DirEntry::unknown("x").kind, None);
    }
}
