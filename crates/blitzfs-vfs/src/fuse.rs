//! FUSE bridge.
//!
//! Implements the fuser `Filesystem` trait on top of any [`VfsOps`]. fuser
//! calls in from its own session thread; async operations are driven to
//! completion with a handle to the tokio runtime that owns the connection.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    BackgroundSession, FileAttr as FuseAttr, FileType as FuseFileType, Filesystem, KernelConfig,
    MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::error::VfsError;
use crate::inode::{InodeTable, child_path};
use crate::ops::VfsOps;
use crate::types::{DirEntry, FileAttr, FileType};

/// Block size reported to the kernel.
const BLOCK_SIZE: u32 = 4096;

/// Attribute TTL when every call goes to the server.
pub const UNCACHED_TTL: Duration = Duration::from_secs(1);

/// Attribute TTL when results are cached for the whole mount.
pub const CACHED_TTL: Duration = Duration::from_secs(3600);

/// Filesystem name shown in the mount table.
pub const FS_NAME: &str = "blitzfs";

/// One directory entry as handed to the kernel: inode, resume cookie, type,
/// name. The cookie is the offset of the entry that follows.
pub type DirSlot = (u64, i64, FileType, String);

/// FUSE adapter for a path-based [`VfsOps`].
pub struct FuseBridge<F> {
    fs: Arc<F>,
    runtime: Handle,
    inodes: InodeTable,
    /// Resolved entries of the directory being listed, reused while the
    /// kernel resumes the same listing at a non-zero offset.
    sweep: Option<(u64, Vec<(u64, FileType, String)>)>,
    ttl: Duration,
    uid: u32,
    gid: u32,
}

impl<F: VfsOps + 'static> FuseBridge<F> {
    /// Files are owned by the mounting user.
    pub fn new(fs: Arc<F>, runtime: Handle, ttl: Duration) -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            fs,
            runtime,
            inodes: InodeTable::new(),
            sweep: None,
            ttl,
            uid,
            gid,
        }
    }

    fn to_fuse_attr(&self, ino: u64, attr: &FileAttr) -> FuseAttr {
        FuseAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.ctime,
            kind: to_fuse_kind(attr.kind),
            perm: attr.perm as u16,
            nlink: attr.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn path_of(&self, ino: u64) -> Result<String, c_int> {
        self.inodes
            .path(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let parent = self.path_of(parent)?;
        let name = name
            .to_str()
            .ok_or_else(|| VfsError::InvalidPath(name.to_string_lossy().into_owned()).to_errno())?;
        Ok(child_path(&parent, name))
    }

    /// Resolve `name` under `parent` and assign it an inode.
    pub fn lookup_entry(&mut self, parent: u64, name: &OsStr) -> Result<(u64, FileAttr), c_int> {
        let path = self.child_of(parent, name)?;
        trace!(parent, path = %path, "lookup");

        let attr = self
            .runtime
            .block_on(self.fs.getattr(&path))
            .map_err(|e| e.to_errno())?;
        Ok((self.inodes.get_or_insert(&path), attr))
    }

    /// Entries of directory `ino` from `offset` on.
    ///
    /// Offset 0 starts a fresh listing. Later offsets continue the last one
    /// without going back to the server.
    pub fn dir_entries(&mut self, ino: u64, offset: i64) -> Result<Vec<DirSlot>, c_int> {
        let offset = offset.max(0) as usize;
        let resuming = offset > 0 && matches!(&self.sweep, Some((dir, _)) if *dir == ino);
        if !resuming {
            let resolved = self.resolve_dir(ino)?;
            self.sweep = Some((ino, resolved));
        }

        let entries = self.sweep.as_ref().map(|(_, e)| e.as_slice()).unwrap_or_default();
        Ok(entries
            .iter()
            .enumerate()
            .skip(offset)
            .map(|(i, (entry_ino, kind, name))| (*entry_ino, (i + 1) as i64, *kind, name.clone()))
            .collect())
    }

    fn resolve_dir(&mut self, ino: u64) -> Result<Vec<(u64, FileType, String)>, c_int> {
        let path = self.path_of(ino)?;
        trace!(ino, path = %path, "readdir");

        let entries = self
            .runtime
            .block_on(self.fs.readdir(&path))
            .map_err(|e| e.to_errno())?;

        let mut resolved = Vec::with_capacity(entries.len());
        for DirEntry { name, kind } in entries {
            let (entry_ino, kind) = match name.as_str() {
                "." => (ino, FileType::Directory),
                ".." => (self.inodes.parent(ino), FileType::Directory),
                child_name => {
                    let child = child_path(&path, child_name);
                    // fuser has no DT_UNKNOWN and tools like find trust d_type,
                    // so every child costs one stat unless the mount caches.
                    let kind = match kind {
                        Some(kind) => kind,
                        None => self
                            .runtime
                            .block_on(self.fs.getattr(&child))
                            .map(|attr| attr.kind)
                            .unwrap_or(FileType::File),
                    };
                    (self.inodes.get_or_insert(&child), kind)
                }
            };
            resolved.push((entry_ino, kind, name));
        }
        Ok(resolved)
    }

    /// Run an unsupported mutation through the filesystem to get its errno.
    fn refuse<T>(&self, result: Result<T, VfsError>, op: &str, path: &str) -> c_int {
        match result {
            Ok(_) => libc::EIO,
            Err(e) => {
                debug!(op, path, error = %e, "refused");
                e.to_errno()
            }
        }
    }
}

fn to_fuse_kind(kind: FileType) -> FuseFileType {
    match kind {
        FileType::File => FuseFileType::RegularFile,
        FileType::Directory => FuseFileType::Directory,
    }
}

/// Mount options for a read-only blitz mount.
pub fn mount_options() -> Vec<MountOption> {
    vec![
        MountOption::RO,
        MountOption::FSName(FS_NAME.to_string()),
        MountOption::Subtype(FS_NAME.to_string()),
        MountOption::DefaultPermissions,
        MountOption::NoDev,
        MountOption::NoSuid,
    ]
}

/// Mount in a background thread. `BackgroundSession::join` unmounts and waits
/// for `destroy` to finish; dropping the session only unmounts.
pub fn spawn_mount<F: VfsOps + 'static>(
    bridge: FuseBridge<F>,
    mountpoint: &Path,
) -> io::Result<BackgroundSession> {
    info!(mountpoint = %mountpoint.display(), "mounting");
    fuser::spawn_mount2(bridge, mountpoint, &mount_options())
}

impl<F: VfsOps + 'static> Filesystem for FuseBridge<F> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.runtime.block_on(self.fs.shutdown()) {
            warn!(error = %e, "shutdown after unmount failed");
        }
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_entry(parent, name) {
            Ok((ino, attr)) => reply.entry(&self.ttl, &self.to_fuse_attr(ino, &attr), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        trace!(ino, path = %path, "getattr");

        match self.runtime.block_on(self.fs.getattr(&path)) {
            Ok(attr) => reply.attr(&self.ttl, &self.to_fuse_attr(ino, &attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let slots = match self.dir_entries(ino, offset) {
            Ok(slots) => slots,
            Err(errno) => return reply.error(errno),
        };
        for (entry_ino, cookie, kind, name) in slots {
            // add() returns true once the reply buffer is full
            if reply.add(entry_ino, cookie, to_fuse_kind(kind), &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return reply.error(VfsError::unsupported("open for writing").to_errno());
        }
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        trace!(ino, path = %path, "open");

        match self.runtime.block_on(self.fs.open(&path)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(fh, offset, size, "read");
        match self.fs.read(fh, offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = self.path_of(ino).unwrap_or_default();
        let result = self.runtime.block_on(self.fs.write(&path, offset.max(0) as u64, data));
        reply.error(self.refuse(result, "write", &path));
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let result = self.runtime.block_on(self.fs.create(&path, mode));
        reply.error(self.refuse(result, "create", &path));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let result = self.runtime.block_on(self.fs.mkdir(&path, mode));
        reply.error(self.refuse(result, "mkdir", &path));
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let result = self.runtime.block_on(self.fs.unlink(&path));
        reply.error(self.refuse(result, "unlink", &path));
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let result = self.runtime.block_on(self.fs.rmdir(&path));
        reply.error(self.refuse(result, "rmdir", &path));
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (from, to) = match (self.child_of(parent, name), self.child_of(newparent, newname)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(errno), _) | (_, Err(errno)) => return reply.error(errno),
        };
        let result = self.runtime.block_on(self.fs.rename(&from, &to));
        reply.error(self.refuse(result, "rename", &from));
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let result = self.runtime.block_on(self.fs.setattr(&path, size));
        reply.error(self.refuse(result, "setattr", &path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use blitzfs_client::ProtocolClient;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
    use tokio::runtime::Runtime;

    use crate::cache::CachePolicy;
    use crate::inode::ROOT_INODE;
    use crate::remote::RemoteFs;

    type RequestLog = Arc<Mutex<Vec<String>>>;

    const TREE: &[(&str, &str)] = &[
        ("stat /docs", "DIR 0 docs\n"),
        ("list /docs", "/docs/a.txt\n/docs/sub/\n/docs/b.txt\n"),
        ("stat /docs/a.txt", "FILE 3 a.txt\n"),
        ("stat /docs/sub", "DIR 0 sub\n"),
        ("list /docs/sub", "/docs/sub/c\n"),
        ("stat /docs/sub/c", "FILE 1 c\n"),
    ];

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    /// Bridge over a scripted server. Unknown requests get an `ERROR` body.
    fn bridge(rt: &Runtime) -> (FuseBridge<RemoteFs<DuplexStream>>, RequestLog) {
        let responses: HashMap<String, String> = TREE
            .iter()
            .map(|(request, body)| (request.to_string(), body.to_string()))
            .collect();
        let log: RequestLog = Arc::new(Mutex::new(Vec::new()));

        let (client, server) = duplex(64 * 1024);
        let server_log = log.clone();
        rt.spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request = line.trim_end_matches('\r').to_string();
                server_log.lock().unwrap().push(request.clone());
                let body = responses
                    .get(&request)
                    .cloned()
                    .unwrap_or_else(|| "ERROR: No such file or directory\n".to_string());
                let reply = format!("OK\n\n{body}>");
                if write.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let fs = RemoteFs::new(ProtocolClient::new(client), CachePolicy::Disabled);
        let bridge = FuseBridge::new(Arc::new(fs), rt.handle().clone(), UNCACHED_TTL);
        (bridge, log)
    }

    fn requests(log: &RequestLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn names(slots: &[DirSlot]) -> Vec<&str> {
        slots.iter().map(|(_, _, _, name)| name.as_str()).collect()
    }

    #[test]
    fn test_lookup_joins_parent_and_name() {
        let rt = runtime();
        let (mut bridge, log) = bridge(&rt);

        let (docs, attr) = bridge.lookup_entry(ROOT_INODE, OsStr::new("docs")).unwrap();
        assert_ne!(docs, ROOT_INODE);
        assert_eq!(attr.kind, FileType::Directory);

        let (file, attr) = bridge.lookup_entry(docs, OsStr::new("a.txt")).unwrap();
        assert_eq!(attr.kind, FileType::File);
        assert_eq!(attr.size, 3);
        assert_eq!(bridge.lookup_entry(docs, OsStr::new("a.txt")).unwrap().0, file);

        let err = bridge.lookup_entry(docs, OsStr::new("missing")).unwrap_err();
        assert_eq!(err, libc::ENOENT);
        assert_eq!(
            bridge.lookup_entry(4242, OsStr::new("x")).unwrap_err(),
            libc::ENOENT
        );

        assert_eq!(
            requests(&log),
            vec![
                "stat /docs",
                "stat /docs/a.txt",
                "stat /docs/a.txt",
                "stat /docs/missing",
            ]
        );
    }

    #[test]
    fn test_readdir_slots_and_kinds() {
        let rt = runtime();
        let (mut bridge, log) = bridge(&rt);
        let (docs, _) = bridge.lookup_entry(ROOT_INODE, OsStr::new("docs")).unwrap();

        let slots = bridge.dir_entries(docs, 0).unwrap();
        assert_eq!(names(&slots), vec![".", "..", "a.txt", "sub", "b.txt"]);

        let cookies: Vec<i64> = slots.iter().map(|slot| slot.1).collect();
        assert_eq!(cookies, vec![1, 2, 3, 4, 5]);

        let kinds: Vec<FileType> = slots.iter().map(|slot| slot.2).collect();
        assert_eq!(
            kinds,
            vec![
                FileType::Directory,
                FileType::Directory,
                FileType::File,
                FileType::Directory,
                // stat fails; reported as a regular file
                FileType::File,
            ]
        );

        assert_eq!(slots[0].0, docs);
        assert_eq!(slots[1].0, ROOT_INODE);
        assert!(requests(&log).contains(&"stat /docs/b.txt".to_string()));
    }

    #[test]
    fn test_readdir_resumes_at_offset() {
        let rt = runtime();
        let (mut bridge, log) = bridge(&rt);
        let (docs, _) = bridge.lookup_entry(ROOT_INODE, OsStr::new("docs")).unwrap();

        let first = bridge.dir_entries(docs, 0).unwrap();
        let sent = requests(&log).len();

        let rest = bridge.dir_entries(docs, 3).unwrap();
        assert_eq!(names(&rest), vec!["sub", "b.txt"]);
        assert_eq!(rest[0], first[3]);
        assert_eq!(rest[1].1, 5);
        assert!(bridge.dir_entries(docs, 5).unwrap().is_empty());
        assert_eq!(requests(&log).len(), sent);

        // Offset 0 starts over against the server.
        bridge.dir_entries(docs, 0).unwrap();
        assert!(requests(&log).len() > sent);
    }

    #[test]
    fn test_dotdot_of_nested_dir() {
        let rt = runtime();
        let (mut bridge, _log) = bridge(&rt);
        let (docs, _) = bridge.lookup_entry(ROOT_INODE, OsStr::new("docs")).unwrap();
        let (sub, _) = bridge.lookup_entry(docs, OsStr::new("sub")).unwrap();

        let slots = bridge.dir_entries(sub, 0).unwrap();
        assert_eq!(names(&slots), vec![".", "..", "c"]);
        assert_eq!(slots[0].0, sub);
        assert_eq!(slots[1].0, docs);
        assert_eq!(slots[2].2, FileType::File);
    }

    #[test]
    fn test_readdir_unknown_inode() {
        let rt = runtime();
        let (mut bridge, _log) = bridge(&rt);
        assert_eq!(bridge.dir_entries(4242, 0).unwrap_err(), libc::ENOENT);
    }

    #[test]
    fn test_mount_options_are_read_only() {
        let options = mount_options();
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::FSName(FS_NAME.to_string())));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(to_fuse_kind(FileType::File), FuseFileType::RegularFile);
        assert_eq!(to_fuse_kind(FileType::Directory), FuseFileType::Directory);
    }
}
